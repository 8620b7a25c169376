//! `.env` loading
//!
//! Called first thing in each binary, before argument parsing and before the
//! logging and service configs read the environment.

use anyhow::{Context, Result};
use std::path::Path;

/// Load variables from a `.env` file into the process environment
///
/// With `None` the usual upward `.env` lookup runs and a missing file is not
/// an error. Variables already set in the process environment are kept.
pub fn load_env_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("Failed to load {}", path.display()))?;
        },
        None => {
            dotenvy::dotenv().ok();
        },
    }
    Ok(())
}
