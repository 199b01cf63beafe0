use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::component::{Component, ExportCell, ExportHandle};
use crate::eval::Arguments;
use crate::graph::{ComponentId, Declaration};
use crate::syntax::diag::DiagnosticCode;

/// Lifecycle state of a component node.
///
/// ```text
/// Unevaluated → Evaluating → Running ⇄ Updating
///                   ↓           ↓         ↓
///                 Failed ←──────┴─────────┘
/// any state → Stopping → Stopped
/// ```
///
/// `Failed` is left on the next load, or when the upstream exports that the node could
/// not resolve become available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Declared, not evaluated yet.
    Unevaluated,
    /// Arguments evaluated, instance being built.
    Evaluating,
    Running,
    /// New arguments being applied to the running instance.
    Updating,
    Failed,
    Stopping,
    Stopped,
}

/// Health of a node, as reported by introspection.
#[derive(Debug, Clone, PartialEq)]
pub enum Health {
    Healthy,
    Unhealthy { code: DiagnosticCode, message: String },
}

/// Entry of the live node table.
pub(crate) struct Node {
    pub id: ComponentId,
    pub declaration: Declaration,
    pub state: NodeState,
    pub health: Health,
    /// Last arguments accepted by the component.
    pub arguments: Option<Arguments>,
    /// Survives the instances of the node.
    pub exports: ExportCell,
    /// Version of the upstream exports used by the last evaluation, per upstream node.
    pub seen: FxHashMap<ComponentId, u64>,
    pub instance: Option<Instance>,
    /// Number of successful calls to `update`.
    pub updates: u64,
}

/// A live instance of a component.
pub(crate) struct Instance {
    pub component: Arc<dyn Component>,
    pub exports: ExportHandle,
    pub token: CancellationToken,
    pub task: Option<JoinHandle<()>>,
    pub generation: u64,
}

impl Instance {
    /// Deactivates the export handle of the instance and shuts the component down.
    ///
    /// The run task must be finished, or cancelled.
    pub fn release(self, id: &ComponentId) {
        self.exports.deactivate();
        let component = self.component;
        if catch_unwind(AssertUnwindSafe(|| component.shutdown())).is_err() {
            log::error!("{id}: shutdown panicked");
        }
    }
}

impl NodeState {
    /// Returns `true` if the node has reached a stable state, in which its dependents can be evaluated.
    pub fn is_settled(self) -> bool {
        matches!(self, NodeState::Running | NodeState::Failed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Unevaluated => "unevaluated",
            NodeState::Evaluating => "evaluating",
            NodeState::Running => "running",
            NodeState::Updating => "updating",
            NodeState::Failed => "failed",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }

    /// The code of the diagnostic that made the node unhealthy.
    pub fn code(&self) -> Option<DiagnosticCode> {
        match self {
            Health::Healthy => None,
            Health::Unhealthy { code, .. } => Some(*code),
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Healthy => f.write_str("healthy"),
            Health::Unhealthy { code, message } => write!(f, "{code:?}: {message}"),
        }
    }
}

impl Node {
    pub fn new(declaration: Declaration) -> Self {
        Self {
            id: declaration.id.clone(),
            declaration,
            state: NodeState::Unevaluated,
            health: Health::Healthy,
            arguments: None,
            exports: ExportCell::default(),
            seen: FxHashMap::default(),
            instance: None,
            updates: 0,
        }
    }

    pub fn set_state(&mut self, state: NodeState) {
        if self.state != state {
            log::debug!("{}: {} -> {}", self.id, self.state, state);
            self.state = state;
        }
    }

    pub fn fail(&mut self, code: DiagnosticCode, message: String) {
        log::error!("{} failed: {message}", self.id);
        self.health = Health::Unhealthy { code, message };
        self.set_state(NodeState::Failed);
    }

    /// Returns `true` if the failure of the node comes from the evaluation of its arguments,
    /// which may succeed once its upstream nodes publish new exports.
    pub fn failed_on_evaluation(&self) -> bool {
        self.state == NodeState::Failed
            && matches!(
                self.health.code(),
                Some(DiagnosticCode::UnresolvedReference | DiagnosticCode::TypeMismatch)
            )
    }

    /// Returns `true` if the instance is alive, i.e. it has been built and its run task has not finished.
    pub fn is_alive(&self) -> bool {
        self.instance.as_ref().is_some_and(|i| i.task.as_ref().is_some_and(|t| !t.is_finished()))
    }
}
