//! The lifecycle-hook dispatcher (spec section 4.4): a small algebra of
//! interceptors over a shared environment map, one ordered mapping per
//! (slug, timing).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::handle::EngineHandle;
use crate::model::ModelDescriptor;
use crate::types::Content;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timing {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeSave,
    AfterSave,
    BeforeDestroy,
    AfterDestroy,
}

impl Timing {
    pub const ALL: [Timing; 8] = [
        Timing::BeforeCreate,
        Timing::AfterCreate,
        Timing::BeforeUpdate,
        Timing::AfterUpdate,
        Timing::BeforeSave,
        Timing::AfterSave,
        Timing::BeforeDestroy,
        Timing::AfterDestroy,
    ];
}

/// The mutable record threaded through a hook chain. Absent members are
/// represented by an empty `Content` map, consistent with the rest of the
/// engine's "plain value map" discipline.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub model: Option<Arc<ModelDescriptor>>,
    pub spec: Content,
    pub values: Content,
    pub content: Content,
    pub original: Content,
}

impl Env {
    pub fn with_model(model: Arc<ModelDescriptor>) -> Self {
        Self {
            model: Some(model),
            ..Default::default()
        }
    }
}

pub type HookFn = for<'a> fn(&'a EngineHandle, Env) -> BoxFuture<'a, EngineResult<Env>>;

#[derive(Default)]
pub struct HookDispatcher {
    hooks: HashMap<(String, Timing), Vec<(String, HookFn)>>,
}

impl HookDispatcher {
    /// Provision empty interceptor lists for all eight timings on `slug`.
    /// Idempotent.
    pub fn make_lifecycle_hooks(&mut self, slug: &str) {
        for timing in Timing::ALL {
            self.hooks.entry((slug.to_string(), timing)).or_default();
        }
    }

    /// Upsert an interceptor by id, preserving its original position on
    /// re-registration.
    pub fn add_hook(&mut self, slug: &str, timing: Timing, id: &str, f: HookFn) {
        let entries = self.hooks.entry((slug.to_string(), timing)).or_default();
        if let Some(existing) = entries.iter_mut().find(|(existing_id, _)| existing_id == id) {
            existing.1 = f;
        } else {
            entries.push((id.to_string(), f));
        }
    }

    /// Fold every interceptor registered for `(slug, timing)` over `env`,
    /// in registration order. Unknown pairs are a no-op. A hook error
    /// aborts the fold and propagates.
    pub async fn run_hook(&self, handle: &EngineHandle, slug: &str, timing: Timing, env: Env) -> EngineResult<Env> {
        let Some(entries) = self.hooks.get(&(slug.to_string(), timing)) else {
            return Ok(env);
        };
        let mut env = env;
        for (id, hook) in entries.clone() {
            env = hook(handle, env).await.map_err(|e| EngineError::Hook {
                slug: slug.to_string(),
                timing,
                message: format!("{id}: {e}"),
            })?;
        }
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &EngineHandle, mut env: Env) -> BoxFuture<'_, EngineResult<Env>> {
        Box::pin(async move {
            env.values.insert("touched".to_string(), serde_json::Value::from(true));
            Ok(env)
        })
    }

    #[test]
    fn make_lifecycle_hooks_is_idempotent() {
        let mut dispatcher = HookDispatcher::default();
        dispatcher.make_lifecycle_hooks("widget");
        dispatcher.make_lifecycle_hooks("widget");
        assert_eq!(dispatcher.hooks.len(), 8);
    }

    #[test]
    fn add_hook_upserts_in_place() {
        let mut dispatcher = HookDispatcher::default();
        dispatcher.add_hook("widget", Timing::BeforeSave, "a", noop);
        dispatcher.add_hook("widget", Timing::BeforeSave, "b", noop);
        dispatcher.add_hook("widget", Timing::BeforeSave, "a", noop);
        let entries = &dispatcher.hooks[&("widget".to_string(), Timing::BeforeSave)];
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[1].0, "b");
    }
}
