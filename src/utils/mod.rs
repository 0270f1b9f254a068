use std::path::PathBuf;
use which::which;

use crate::errors::{BackupError, Result};

/// Resolves a client program name (or explicit path) against PATH.
pub fn find_executable(program: &str) -> Result<PathBuf> {
    which(program).map_err(|source| BackupError::ToolNotFound {
        program: program.to_string(),
        source,
    })
}
