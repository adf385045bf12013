use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

const LABELS_SUFFIX: &str = ".labels";

/// Directory-like store of named model files.
pub trait ModelStorage: Send + Sync {
    /// Names of all stored models, sorted.
    fn list_names(&self) -> Result<Vec<String>>;

    fn read(&self, name: &str) -> Result<Vec<u8>>;

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Delete a model and its labels. Deleting a missing model is not an error.
    fn delete(&self, name: &str) -> Result<()>;

    /// Class labels stored next to the model, empty when none were stored.
    fn read_labels(&self, name: &str) -> Result<Vec<String>>;

    fn write_labels(&self, name: &str, labels: &[String]) -> Result<()>;

    /// Where `name` lives, as recorded in the model's `file_path`.
    fn location(&self, name: &str) -> String {
        name.to_string()
    }
}

/// Models kept as plain files in one directory, with a `<name>.labels` sidecar
/// holding one class label per line.
#[derive(Debug, Clone)]
pub struct FsModelStorage {
    dir: PathBuf,
}

impl FsModelStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    fn labels_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}{LABELS_SUFFIX}")))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
        && !name.ends_with(LABELS_SUFFIX);
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid model name {name:?}")))
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl ModelStorage for FsModelStorage {
    fn list_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(LABELS_SUFFIX) && !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name)?;
        fs::read(&path).map_err(|e| Error::load(name, format!("{}: {e}", path.display())))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(name)?;
        fs::write(&path, bytes)
            .map_err(|e| Error::Storage(format!("failed to write {}: {e}", path.display())))?;
        debug!(path = %path.display(), bytes = bytes.len(), "stored model file");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        remove_if_present(&self.path_of(name)?)?;
        remove_if_present(&self.labels_path(name)?)
    }

    fn read_labels(&self, name: &str) -> Result<Vec<String>> {
        match fs::read_to_string(self.labels_path(name)?) {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_labels(&self, name: &str, labels: &[String]) -> Result<()> {
        let mut text = labels.join("\n");
        text.push('\n');
        fs::write(self.labels_path(name)?, text)?;
        Ok(())
    }

    fn location(&self, name: &str) -> String {
        self.dir.join(name).display().to_string()
    }
}
