//! The model registry (spec section 4.3): a process-wide map from both
//! slug and numeric id to the same loaded model descriptor. Swapped
//! atomically on a full reload, merged atomically on a single-model
//! alteration -- readers always observe a fully-constructed descriptor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::field::Field;
use crate::model::ModelDescriptor;

/// A model reference that accepts either its slug or its numeric id,
/// uniformly -- per the engine's destroy path, which is observed to pass an
/// id where a slug is conventionally expected (design note, open question 1).
#[derive(Debug, Clone)]
pub enum SlugOrId {
    Slug(String),
    Id(i32),
}

impl From<&str> for SlugOrId {
    fn from(s: &str) -> Self {
        SlugOrId::Slug(s.to_string())
    }
}

impl From<String> for SlugOrId {
    fn from(s: String) -> Self {
        SlugOrId::Slug(s)
    }
}

impl From<i32> for SlugOrId {
    fn from(id: i32) -> Self {
        SlugOrId::Id(id)
    }
}

impl std::fmt::Display for SlugOrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlugOrId::Slug(s) => write!(f, "{s}"),
            SlugOrId::Id(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Default)]
pub struct Registry {
    by_slug: HashMap<String, Arc<ModelDescriptor>>,
    by_id: HashMap<i32, Arc<ModelDescriptor>>,
}

impl Registry {
    pub fn get(&self, key: &SlugOrId) -> EngineResult<Arc<ModelDescriptor>> {
        let found = match key {
            SlugOrId::Slug(s) => self.by_slug.get(s),
            SlugOrId::Id(id) => self.by_id.get(id),
        };
        found.cloned().ok_or_else(|| EngineError::MissingModel {
            slug_or_id: key.to_string(),
        })
    }

    /// Merge one descriptor into the registry under both its slug and id.
    pub fn alter(&mut self, model: ModelDescriptor) {
        let arc = Arc::new(model);
        self.by_slug.insert(arc.row.slug.clone(), arc.clone());
        self.by_id.insert(arc.row.id, arc);
    }

    pub fn remove(&mut self, slug: &str, id: i32) {
        self.by_slug.remove(slug);
        self.by_id.remove(&id);
    }

    /// Atomically replace the entire registry contents (a full
    /// `invoke_models` reload).
    pub fn swap(&mut self, models: Vec<ModelDescriptor>) {
        let mut by_slug = HashMap::with_capacity(models.len());
        let mut by_id = HashMap::with_capacity(models.len());
        for model in models {
            let arc = Arc::new(model);
            by_slug.insert(arc.row.slug.clone(), arc.clone());
            by_id.insert(arc.row.id, arc);
        }
        self.by_slug = by_slug;
        self.by_id = by_id;
    }

    /// Replace a single field within a model descriptor already present in
    /// the registry (used by `collection`/`part` reciprocal setup).
    pub fn alter_field(&mut self, model_id: i32, field: Field) -> EngineResult<()> {
        let current = self.get(&SlugOrId::Id(model_id))?;
        let mut model = (*current).clone();
        model.fields.insert(field.row.slug.clone(), field);
        self.alter(model);
        Ok(())
    }

    pub fn remove_field(&mut self, model_id: i32, field_slug: &str) -> EngineResult<()> {
        let current = self.get(&SlugOrId::Id(model_id))?;
        let mut model = (*current).clone();
        model.fields.remove(field_slug);
        self.alter(model);
        Ok(())
    }

    /// Set `field_id`'s `link_id` to `peer_id` in whichever model currently
    /// owns it, without requiring the caller to know which model that is.
    pub fn set_link(&mut self, field_id: i32, peer_id: i32) -> EngineResult<()> {
        for model in self.by_id.values().cloned().collect::<Vec<_>>() {
            if let Some(field) = model.field_by_id(field_id) {
                let mut updated = (*model).clone();
                if let Some(f) = updated.fields.get_mut(&field.row.slug) {
                    f.row.link_id = Some(peer_id);
                }
                self.alter(updated);
                return Ok(());
            }
        }
        Ok(())
    }
}
