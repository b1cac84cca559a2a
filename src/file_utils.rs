use anyhow::{Result, Context};
use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, warn};

// @module: File and directory utilities

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    /// Write a string to a file
    pub fn write_to_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                Self::ensure_dir(parent)?;
            }
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write to file: {:?}", path.as_ref()))?;

        Ok(())
    }

    // @returns: `id` reduced to characters that are safe in a file name
    pub fn safe_file_stem(id: &str) -> String {
        let stem: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();

        match stem.trim_matches('.') {
            "" => "task".to_string(),
            trimmed => trimmed.to_string(),
        }
    }

    /// Remove local artifacts, logging instead of failing.
    ///
    /// Returns the number of files actually removed.
    pub async fn remove_files(paths: &[PathBuf]) -> usize {
        let mut removed = 0;

        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    debug!("Removed local artifact {:?}", path);
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove local artifact {:?}: {}", path, e),
            }
        }

        removed
    }
}
