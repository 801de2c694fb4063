//! Thread- and task-safe tool catalogue.

use crate::executor::ToolExecutor;
use ensemble_contract::{ErrorMapper, Tool, ToolDescriptor};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

struct RegistryInner {
    tools: HashMap<String, Arc<dyn Tool>>,
    error_mapper: ErrorMapper,
}

/// Catalogue of callable tools keyed by name.
///
/// Cloning is cheap and shares the underlying map. All critical sections
/// are await-free, so one lock serves callers on parallel threads and on
/// cooperative tasks alike; executors work on immutable snapshots so
/// concurrent registration never disturbs a running batch.
#[derive(Clone)]
pub struct ToolRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry with the default error mapper.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                tools: HashMap::new(),
                error_mapper: ErrorMapper::default(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a tool by its descriptor name.
    ///
    /// Tools with empty names are rejected silently apart from a warning,
    /// since a nameless tool can never be called.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name;
        if name.trim().is_empty() {
            tracing::warn!("ignoring tool registration with empty name");
            return;
        }
        let mut inner = self.write();
        if inner.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "replaced existing tool registration");
        }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read().tools.get(name).cloned()
    }

    /// Snapshot of registered descriptors, sorted by name.
    ///
    /// The copy keeps iteration stable while other callers mutate the
    /// registry.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .read()
            .tools
            .values()
            .map(|t| t.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Snapshot of the registered tool map.
    pub fn snapshot(&self) -> HashMap<String, Arc<dyn Tool>> {
        self.read().tools.clone()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.read().tools.len()
    }

    /// Returns `true` when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.read().tools.is_empty()
    }

    /// Install the error mapper consulted when a tool invocation raises.
    pub fn set_error_mapper(&self, mapper: ErrorMapper) {
        self.write().error_mapper = mapper;
    }

    /// Current error mapper.
    pub fn error_mapper(&self) -> ErrorMapper {
        self.read().error_mapper.clone()
    }

    /// Build an executor bound to the current snapshot and error mapper.
    pub fn make_executor(&self) -> ToolExecutor {
        let inner = self.read();
        ToolExecutor::new(inner.tools.clone(), inner.error_mapper.clone())
    }

    /// Build an executor with an explicit per-call timeout and interrupt set.
    pub fn make_executor_with(
        &self,
        call_timeout: Duration,
        interrupt_before: HashSet<String>,
    ) -> ToolExecutor {
        self.make_executor()
            .with_call_timeout(call_timeout)
            .with_interrupt_before(interrupt_before)
    }
}
