//! Configuration: scope path resolution and the typed `configuration.toml`.

pub mod paths;
pub mod schema;
pub mod store;

pub use paths::{resolve_agents_dir, resolve_archive_dir, resolve_config_dir, resolve_skills_dir};
pub use schema::{ArtifactConfig, MpmConfig, ReverifyPolicy, StartupConfig, SyncConfig};
pub use store::ConfigStore;
