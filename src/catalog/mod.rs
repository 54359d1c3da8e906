/// Config Catalog
///
/// Durable, content-hashed config generations and the lookups built on them:
/// - `store`: ConfigStore (load, latest generation, typed reads)
/// - `connections`: DataConnectionRegistry with lazy env expansion
/// - `source`: file / GitHub config sources

pub mod store;

pub mod connections;

pub mod source;

pub use connections::DataConnectionRegistry;
pub use source::ConfigSource;
pub use store::{ConfigStore, LoadedConfig};
