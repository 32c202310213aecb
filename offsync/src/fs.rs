//! File system-related utilities.

use std::path::{Path, PathBuf};

use eyre::Result;
use log::debug;

use crate::Error;

/// Deployment descriptor names, in the order they are looked for.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["serverless.yml", "serverless.yaml", "serverless.json"];

/// Canonicalize the given path if it exists. If it does not exist, returns
/// `Ok(None)`.
pub fn maybe_canonicalize<P>(path: P) -> Result<Option<PathBuf>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if path.exists() {
        Ok(Some(path.canonicalize()?))
    } else {
        Ok(None)
    }
}

/// Finds the deployment descriptor in the given directory.
pub fn find_config<P>(dir: P) -> Result<PathBuf>
where
    P: AsRef<Path>,
{
    let dir = dir.as_ref();
    for name in CONFIG_FILE_NAMES {
        if let Some(path) = maybe_canonicalize(dir.join(name))? {
            debug!("Found configuration file: {}", path.display());
            return Ok(path);
        }
    }
    Err(Error::ConfigNotFound(dir.join(CONFIG_FILE_NAMES[0])).into())
}
