//! Subcommand implementations.

pub mod config;
pub mod evaluate;
pub mod gei;
pub mod results;

use std::path::{Path, PathBuf};

/// Expand `~` in a user-supplied path.
pub(crate) fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}
