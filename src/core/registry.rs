use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::core::storage::ModelStorage;
use crate::detection::model::{DetectionModel, ModelLoader};
use crate::error::{Error, Result};

/// The set of loaded detection models, keyed by model file name.
///
/// Lookups share a read lock and hand out `Arc` clones. `add` and `remove` are serialized
/// against each other, and a replacement model is fully loaded before it is published with a
/// single map insert, so a concurrent `get` sees either the old or the new handle.
pub struct ModelRegistry {
    storage: Arc<dyn ModelStorage>,
    loader: Arc<dyn ModelLoader>,
    models: RwLock<HashMap<String, Arc<dyn DetectionModel>>>,
    mutation: Mutex<()>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.list())
            .finish()
    }
}

impl ModelRegistry {
    /// Registry with nothing loaded.
    pub fn empty(storage: Arc<dyn ModelStorage>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            storage,
            loader,
            models: RwLock::new(HashMap::new()),
            mutation: Mutex::new(()),
        }
    }

    /// Build a registry and eagerly load every model present in storage.
    ///
    /// Files that fail to load are logged and skipped.
    pub fn open(storage: Arc<dyn ModelStorage>, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        let registry = Self::empty(storage, loader);
        for name in registry.storage.list_names()? {
            match registry.load(&name) {
                Ok(model) => {
                    registry.models.write().insert(name.clone(), model);
                    info!(model = %name, "loaded detection model");
                }
                Err(e) => warn!(model = %name, error = %e, "skipping model that failed to load"),
            }
        }
        Ok(registry)
    }

    fn load(&self, name: &str) -> Result<Arc<dyn DetectionModel>> {
        let bytes = self.storage.read(name)?;
        let labels = self.storage.read_labels(name)?;
        self.loader.load(name, bytes, labels)
    }

    /// Load `name` from storage and publish it, replacing any previous handle.
    pub fn add(&self, name: &str) -> Result<()> {
        let _guard = self.mutation.lock();
        let model = self.load(name)?;
        let replaced = self.models.write().insert(name.to_string(), model).is_some();
        info!(model = %name, replaced, "added detection model");
        Ok(())
    }

    /// Evict `name` and delete its backing file. Unknown names are a no-op.
    pub fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.mutation.lock();
        let evicted = self.models.write().remove(name).is_some();
        self.storage.delete(name)?;
        if evicted {
            info!(model = %name, "removed detection model");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DetectionModel>> {
        let models = self.models.read();
        match models.get(name) {
            Some(model) => Ok(model.clone()),
            None => {
                let mut available: Vec<String> = models.keys().cloned().collect();
                available.sort();
                Err(Error::ModelNotFound {
                    name: name.to_string(),
                    available,
                })
            }
        }
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn storage(&self) -> &Arc<dyn ModelStorage> {
        &self.storage
    }
}
