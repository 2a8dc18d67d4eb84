//! Home directory resolution with test isolation support.
//!
//! All user-scope paths resolve through [`mpm_home_dir`] so tests can point
//! the user scope at a temporary directory. `dirs::home_dir()` ignores `HOME`
//! on Windows, which makes an explicit override variable necessary.

use std::path::PathBuf;

/// Overrides the home directory for every mpm-internal path when set.
pub const MPM_TEST_HOME_VAR: &str = "MPM_TEST_HOME";

/// Home directory used for user-scope paths.
///
/// Falls back to `.` when no home directory can be determined so path
/// resolution stays infallible.
pub fn mpm_home_dir() -> PathBuf {
    std::env::var_os(MPM_TEST_HOME_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}
