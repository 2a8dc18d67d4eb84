//! Filesystem primitives shared across features.

pub mod hash;
pub mod home;
pub mod materialize;

pub use hash::{hash_artifact, hash_bytes, hash_file, hash_tree};
pub use home::{MPM_TEST_HOME_VAR, mpm_home_dir};
