//! Introspection of the running components.

use std::fmt;

use crate::component::ExportSnapshot;
use crate::eval::Arguments;
use crate::graph::ComponentId;

use super::node::{Health, Node, NodeState};

/// State of a component, as seen by the controller.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub state: NodeState,
    pub health: Health,
    /// Arguments accepted by the current instance, if any.
    pub arguments: Option<Arguments>,
    pub exports: ExportSnapshot,
    pub dependencies: Vec<ComponentId>,
    pub dependents: Vec<ComponentId>,
    /// Number of successful updates of the arguments.
    pub updates: u64,
}

impl ComponentInfo {
    pub(super) fn of(node: &Node, dependencies: Vec<ComponentId>, dependents: Vec<ComponentId>) -> Self {
        Self {
            id: node.id.clone(),
            state: node.state,
            health: node.health.clone(),
            arguments: node.arguments.clone(),
            exports: node.exports.snapshot(),
            dependencies,
            dependents,
            updates: node.updates,
        }
    }

    /// Returns the value of an export, if the component has published it.
    pub fn export(&self, name: &str) -> Option<&crate::eval::Value> {
        self.exports.exports.as_deref().and_then(|e| e.get(name))
    }
}

impl fmt::Display for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.id, self.state, self.health)?;
        if let Some(exports) = &self.exports.exports {
            write!(f, " exports(v{}) = {}", self.exports.version, exports.to_value())?;
        }
        Ok(())
    }
}
