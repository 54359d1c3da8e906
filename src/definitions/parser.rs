/// Configuration document parser
///
/// Turns YAML into a validated `ConfigDocument`. Relative csv paths are
/// anchored to where the document came from, so the stored generation is
/// self-contained.

use crate::{
    definitions::{
        types::{ConfigDocument, ConnectionKind},
        validator::validate_document,
    },
    error::{Error, Result},
};
use reqwest::Url;
use std::path::{Path, PathBuf};

/// Where a configuration document was read from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigBase {
    /// No anchor; relative paths stay relative to the working directory
    None,
    /// Directory containing a config file on disk
    Directory(PathBuf),
    /// URL of a remote config file (source-control contents API)
    Remote(Url),
}

impl ConfigBase {
    /// Base of a config file on disk: its parent directory.
    pub fn for_file(path: &Path) -> Self {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                ConfigBase::Directory(parent.to_path_buf())
            }
            _ => ConfigBase::None,
        }
    }

    /// Base of a remote config file; unparseable URLs anchor nothing.
    pub fn for_url(url: &str) -> Self {
        match Url::parse(url) {
            Ok(url) => ConfigBase::Remote(url),
            Err(_) => ConfigBase::None,
        }
    }

    fn anchor(&self, path: &str) -> String {
        if path.starts_with('$') || is_url(path) || Path::new(path).is_absolute() {
            return path.to_string();
        }
        match self {
            ConfigBase::None => path.to_string(),
            ConfigBase::Directory(dir) => dir.join(path).to_string_lossy().into_owned(),
            ConfigBase::Remote(base) => match base.join(path) {
                Ok(mut anchored) => {
                    // Sibling files are read from the same branch or tag
                    if let Some((_, git_ref)) = base.query_pairs().find(|(key, _)| key == "ref") {
                        anchored.query_pairs_mut().append_pair("ref", &git_ref);
                    }
                    anchored.to_string()
                }
                Err(_) => path.to_string(),
            },
        }
    }
}

pub(crate) fn is_url(path: &str) -> bool {
    Url::parse(path)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str, base: &ConfigBase) -> Result<ConfigDocument> {
    let mut document: ConfigDocument = if content.trim().is_empty() {
        ConfigDocument::default()
    } else {
        serde_yaml::from_str(content).map_err(|e| {
            let msg = e.to_string();
            match extract_missing_field(&msg) {
                Some(field) => Error::Parse(format!("missing required field: {}", field)),
                None => Error::Parse(format!("invalid YAML: {}", msg)),
            }
        })?
    };

    for connection in &mut document.data_connections {
        if connection.kind == ConnectionKind::Csv && !connection.path.is_empty() {
            connection.path = base.anchor(&connection.path);
        }
    }

    validate_document(&document)?;
    Ok(document)
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}
