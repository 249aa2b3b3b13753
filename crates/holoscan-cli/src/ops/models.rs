//! Model discovery for `--models`.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Model name to host path.
pub type Models = BTreeMap<String, PathBuf>;

/// Finds the models under `path`.
///
/// A file is one model named by its stem. A directory holding only files is
/// one model named after the directory; otherwise each sub-directory is a
/// model.
pub fn discover(path: Option<&Path>) -> io::Result<Models> {
    let mut models = Models::new();
    let Some(path) = path else {
        return Ok(models);
    };

    if path.is_file() {
        let name = path
            .file_stem()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "model file has no name"))?;
        models.insert(name.to_string_lossy().into_owned(), path.to_path_buf());
    } else if path.is_dir() {
        let entries = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;

        if entries.iter().all(|p| p.is_file()) {
            let name = path.file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "model directory has no name")
            })?;
            models.insert(name.to_string_lossy().into_owned(), path.to_path_buf());
        } else {
            for dir in entries.into_iter().filter(|p| p.is_dir()) {
                if let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) {
                    models.insert(name, dir);
                }
            }
        }
    } else {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("models path not found: {}", path.display()),
        ));
    }

    debug!("Found {} model(s): {:?}", models.len(), models.keys());
    Ok(models)
}
