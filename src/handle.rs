//! The engine handle (design note 9): registry, hook dispatcher and SQL
//! collaborator live behind one explicit handle passed to every public
//! call, with a process-singleton convenience default for callers that
//! want the classic global-engine ergonomics.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::bootstrap;
use crate::crud;
use crate::error::EngineResult;
use crate::field::Field;
use crate::hooks::{Env, HookDispatcher, HookFn, Timing};
use crate::model::ModelDescriptor;
use crate::registry::{Registry, SlugOrId};
use crate::sql::SqlBackend;
use crate::types::{Content, QueryOpts, ReadOpts};

pub struct EngineHandle {
    pub sql: Arc<dyn SqlBackend>,
    registry: Arc<RwLock<Registry>>,
    hooks: Arc<RwLock<HookDispatcher>>,
    slug_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

static DEFAULT_HANDLE: OnceCell<Arc<EngineHandle>> = OnceCell::new();

impl EngineHandle {
    pub fn new(sql: Arc<dyn SqlBackend>) -> Arc<Self> {
        Arc::new(Self {
            sql,
            registry: Arc::new(RwLock::new(Registry::default())),
            hooks: Arc::new(RwLock::new(HookDispatcher::default())),
            slug_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// A view of this handle that shares the same registry, hooks and
    /// slug locks but drives every SQL call through `sql` instead — used to
    /// scope one CRUD call to a single transaction (spec section 7).
    pub(crate) fn with_sql(&self, sql: Arc<dyn SqlBackend>) -> EngineHandle {
        EngineHandle {
            sql,
            registry: self.registry.clone(),
            hooks: self.hooks.clone(),
            slug_locks: self.slug_locks.clone(),
        }
    }

    /// Install this handle as the process-wide default. Returns the handle
    /// that actually ended up installed (idempotent under races).
    pub fn install_default(handle: Arc<EngineHandle>) -> Arc<EngineHandle> {
        DEFAULT_HANDLE.get_or_init(|| handle).clone()
    }

    pub fn default_handle() -> Option<Arc<EngineHandle>> {
        DEFAULT_HANDLE.get().cloned()
    }

    /// Bootstrap the `model`/`field` meta-models and do a full reload.
    pub async fn init(self: &Arc<Self>) -> EngineResult<()> {
        bootstrap::init(self).await
    }

    pub async fn invoke_models(&self) -> EngineResult<()> {
        bootstrap::invoke_models(self).await
    }

    pub async fn create(&self, slug: impl Into<SlugOrId>, spec: Content) -> EngineResult<Content> {
        crud::create(self, slug.into(), spec).await
    }

    pub async fn update(&self, slug: impl Into<SlugOrId>, id: i32, spec: Content) -> EngineResult<Content> {
        crud::update(self, slug.into(), id, spec).await
    }

    pub async fn destroy(&self, slug: impl Into<SlugOrId>, id: i32) -> EngineResult<Content> {
        crud::destroy(self, slug.into(), id).await
    }

    pub async fn rally(&self, slug: impl Into<SlugOrId>, opts: QueryOpts) -> EngineResult<Vec<Content>> {
        crud::rally(self, slug.into(), opts).await
    }

    pub async fn progenitors(&self, slug: impl Into<SlugOrId>, id: i32, opts: ReadOpts) -> EngineResult<Vec<Content>> {
        crud::progenitors(self, slug.into(), id, opts).await
    }

    pub async fn descendents(&self, slug: impl Into<SlugOrId>, id: i32, opts: ReadOpts) -> EngineResult<Vec<Content>> {
        crud::descendents(self, slug.into(), id, opts).await
    }

    pub async fn from(&self, model: &ModelDescriptor, row: &Content, opts: &ReadOpts) -> EngineResult<Content> {
        crud::from(self, model, row, opts).await
    }

    pub async fn model_render(&self, model: &ModelDescriptor, row: &Content, opts: &ReadOpts) -> EngineResult<Content> {
        crud::model_render(self, model, row, opts).await
    }

    pub async fn add_hook(&self, slug: &str, timing: Timing, id: &str, f: HookFn) {
        let mut hooks = self.hooks.write().await;
        hooks.make_lifecycle_hooks(slug);
        hooks.add_hook(slug, timing, id, f);
    }

    pub(crate) async fn run_hook(&self, slug: &str, timing: Timing, env: Env) -> EngineResult<Env> {
        let hooks = self.hooks.read().await;
        hooks.run_hook(self, slug, timing, env).await
    }

    pub(crate) async fn registry_get(&self, key: SlugOrId) -> EngineResult<Arc<ModelDescriptor>> {
        self.registry.read().await.get(&key)
    }

    pub(crate) async fn registry_alter(&self, model: ModelDescriptor) {
        self.registry.write().await.alter(model);
    }

    pub(crate) async fn registry_remove(&self, slug: &str, id: i32) {
        self.registry.write().await.remove(slug, id);
    }

    pub(crate) async fn registry_swap(&self, models: Vec<ModelDescriptor>) {
        self.registry.write().await.swap(models);
    }

    pub(crate) async fn registry_alter_field(&self, model_id: i32, field: Field) -> EngineResult<()> {
        self.registry.write().await.alter_field(model_id, field)
    }

    pub(crate) async fn registry_remove_field(&self, model_id: i32, field_slug: &str) -> EngineResult<()> {
        self.registry.write().await.remove_field(model_id, field_slug)
    }

    pub(crate) async fn registry_set_link(&self, field_id: i32, peer_id: i32) -> EngineResult<()> {
        self.registry.write().await.set_link(field_id, peer_id)
    }

    /// Acquire the slug-granular lock for the duration of a single CRUD
    /// call (spec section 5): no two schema mutations or reciprocal-field
    /// syntheses on the same slug may interleave.
    pub(crate) async fn lock_slug(&self, slug: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.slug_locks.lock().await;
            locks.entry(slug.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        mutex.lock_owned().await
    }
}
