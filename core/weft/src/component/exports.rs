//! Publication of component exports.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tokio::sync::Notify;

use crate::eval::Value;
use crate::graph::ComponentId;
use crate::schema::Schema;

/// Values exported by a component, by export name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Exports(IndexMap<String, Value>);

/// An immutable view of the exports of a component at some point in time.
#[derive(Debug, Clone, Default)]
pub struct ExportSnapshot {
    /// `None` until the component publishes its exports for the first time.
    pub exports: Option<Arc<Exports>>,
    /// Incremented each time the exports change.
    pub version: u64,
}

/// Latest exports of a node, shared between the component and the controller.
///
/// The cell outlives the component instances: when a node is rebuilt, the exports
/// of the previous instance stay visible until the new one publishes.
#[derive(Clone, Default)]
pub(crate) struct ExportCell(Arc<Mutex<ExportSnapshot>>);

/// Allows a component to publish its exports.
#[derive(Clone)]
pub struct ExportHandle {
    id: ComponentId,
    cell: ExportCell,
    schema: Arc<Schema>,
    /// Cleared when the instance that owns this handle is discarded.
    active: Arc<AtomicBool>,
    notifier: Arc<ChangeNotifier>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ExportError {
    #[error("`{0}` is not an export of this component")]
    Unknown(String),
    #[error("export `{0}` contains a NaN or infinite number")]
    NotFinite(String),
    #[error("wrong type for export `{field}`: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },
}

/// Collects the nodes whose exports have changed and wakes the controller up.
///
/// Several changes of the same node before the controller wakes up are coalesced.
#[derive(Default)]
pub(crate) struct ChangeNotifier {
    dirty: Mutex<IndexSet<ComponentId>>,
    notify: Notify,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Map(self.0.clone())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Exports {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl ExportCell {
    fn lock(&self) -> MutexGuard<'_, ExportSnapshot> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ExportSnapshot {
        self.lock().clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }
}

impl ExportHandle {
    pub(crate) fn new(id: ComponentId, cell: ExportCell, schema: Arc<Schema>, notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            id,
            cell,
            schema,
            active: Arc::new(AtomicBool::new(true)),
            notifier,
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// Publishes new exports.
    ///
    /// Each export is converted to the type declared in the export schema, and NaN or infinite
    /// floats are rejected. If the exports
    /// are equal to the current ones, nothing happens: the version is not incremented and the
    /// dependents are not re-evaluated. After the component has been stopped or replaced,
    /// publishing is silently ignored.
    pub fn publish(&self, exports: Exports) -> Result<(), ExportError> {
        let mut checked = IndexMap::with_capacity(exports.len());
        for (name, value) in exports.0 {
            let Some(field) = self.schema.get(&name) else {
                return Err(ExportError::Unknown(name));
            };
            if !value.is_finite() {
                return Err(ExportError::NotFinite(name));
            }
            let value = match field.value_type() {
                Some(ty) => ty.coerce(value).map_err(|e| ExportError::TypeMismatch {
                    field: format!("{name}{}", e.path),
                    expected: e.expected,
                    found: e.found,
                })?,
                None => value,
            };
            checked.insert(name, value);
        }
        let exports = Exports(checked);

        if !self.is_active() {
            log::debug!("{} is no longer active, ignoring published exports", self.id);
            return Ok(());
        }
        let mut snapshot = self.cell.lock();
        if snapshot.exports.as_deref() == Some(&exports) {
            return Ok(());
        }
        snapshot.exports = Some(Arc::new(exports));
        snapshot.version += 1;
        let version = snapshot.version;
        drop(snapshot);

        log::trace!("{} published exports version {version}", self.id);
        self.notifier.mark(self.id.clone());
        Ok(())
    }

    /// Returns the latest exports published through this handle, or by the previous instances of the node.
    pub fn current(&self) -> ExportSnapshot {
        self.cell.snapshot()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl ChangeNotifier {
    pub fn mark(&self, id: ComponentId) {
        let mut dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);
        let inserted = dirty.insert(id);
        drop(dirty);
        if inserted {
            self.notify.notify_one();
        }
    }

    /// Takes all the dirty marks.
    pub fn take(&self) -> IndexSet<ComponentId> {
        let mut dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *dirty)
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }
}
