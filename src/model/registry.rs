use crate::error::FitError;
use crate::model::{Model, builtin};

use lazy_static::lazy_static;
use std::collections::BTreeMap;
use std::sync::Arc;

lazy_static! {
    static ref BUILTIN_REGISTRY: ModelRegistry = {
        let mut registry = ModelRegistry::new();
        for model in builtin::models() {
            registry
                .register(model)
                .expect("built-in model ids are unique");
        }
        registry
    };
}

/// Lookup table of models by their stable id
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: BTreeMap<u32, Arc<Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the models from [builtin]
    pub fn builtin() -> &'static Self {
        &BUILTIN_REGISTRY
    }

    pub fn register(&mut self, model: Model) -> Result<Arc<Model>, FitError> {
        let id = model.id();
        if self.models.contains_key(&id) {
            return Err(FitError::DuplicateModel(id));
        }
        let model = Arc::new(model);
        self.models.insert(id, model.clone());
        Ok(model)
    }

    pub fn get(&self, id: u32) -> Option<Arc<Model>> {
        self.models.get(&id).cloned()
    }

    pub fn model(&self, id: u32) -> Result<Arc<Model>, FitError> {
        self.get(id).ok_or(FitError::UnknownModel(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.models.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
