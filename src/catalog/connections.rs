/// Data connection registry
///
/// Connections are scoped to a config generation. Values written as `$VAR`
/// (or containing further `${VAR}` references after a leading `$`) are expanded
/// from the process environment every time a connection is resolved, so
/// credentials never end up in the stored config.

use crate::{
    catalog::store::ConfigStore,
    definitions::DataConnection,
    error::Result,
};
use regex_lite::{Captures, Regex};
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct DataConnectionRegistry {
    store: ConfigStore,
}

impl DataConnectionRegistry {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    /// Connection `id` of generation `hash`, environment references expanded
    pub async fn resolve(&self, hash: &str, id: &str) -> Result<DataConnection> {
        let mut connection = self.store.data_connection(hash, id).await?;
        connection.path = expand_value(&connection.path);
        connection.connection_string = expand_value(&connection.connection_string);
        Ok(connection)
    }

    /// All connections of generation `hash`, values left unexpanded
    pub async fn list(&self, hash: &str) -> Result<Vec<DataConnection>> {
        self.store.data_connections(hash).await
    }
}

/// Expand a stored value if it opts in with a leading `$`
fn expand_value(value: &str) -> String {
    if value.starts_with('$') {
        expand_env_with(value, |name| std::env::var(name).ok())
    } else {
        value.to_string()
    }
}

/// `${NAME}` or `$NAME`
fn env_reference_regex() -> &'static Regex {
    static ENV_REFERENCE_REGEX: OnceLock<Regex> = OnceLock::new();
    ENV_REFERENCE_REGEX.get_or_init(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("valid regex"))
}

/// Replace `$NAME` and `${NAME}` using `lookup`; unset names expand to "".
pub fn expand_env_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    env_reference_regex()
        .replace_all(value, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{definitions::ConfigBase, storage::Database};

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOST" => Some("db.internal".into()),
            "PORT" => Some("5432".into()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_env() {
        assert_eq!(expand_env_with("$HOST", lookup), "db.internal");
        assert_eq!(
            expand_env_with("${HOST}:$PORT/app", lookup),
            "db.internal:5432/app"
        );
        assert_eq!(expand_env_with("$MISSING", lookup), "");
        assert_eq!(expand_env_with("cost $ 5", lookup), "cost $ 5");
        assert_eq!(expand_env_with("plain", lookup), "plain");
        assert_eq!(expand_env_with("${HOST", lookup), "${HOST");
        assert_eq!(expand_env_with("$HOST$PORT", lookup), "db.internal5432");
    }

    #[tokio::test]
    async fn test_resolve_expands_at_call_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(Database::open_in(dir.path()).await.unwrap());
        let yaml = r#"
data_connections:
  - { id: pg, type: postgres, connection_string: $TASKJOIN_TEST_CONN_A1 }
  - { id: raw, type: postgres, connection_string: "postgres://u:pa$$word@h/db" }
"#;
        let hash = store.load(yaml, &ConfigBase::None).await.unwrap().hash;
        let registry = DataConnectionRegistry::new(store);

        std::env::set_var("TASKJOIN_TEST_CONN_A1", "postgres://first");
        let first = registry.resolve(&hash, "pg").await.unwrap();
        assert_eq!(first.connection_string, "postgres://first");

        std::env::set_var("TASKJOIN_TEST_CONN_A1", "postgres://second");
        let second = registry.resolve(&hash, "pg").await.unwrap();
        assert_eq!(second.connection_string, "postgres://second");

        let raw = registry.resolve(&hash, "raw").await.unwrap();
        assert_eq!(raw.connection_string, "postgres://u:pa$$word@h/db");

        let listed = registry.list(&hash).await.unwrap();
        assert_eq!(listed[0].connection_string, "$TASKJOIN_TEST_CONN_A1");

        assert!(registry.resolve(&hash, "nope").await.is_err());
    }
}
