//! Lifecycle management of the component graph.
//!
//! The [`Controller`] owns the graph and the live instances of the components. It runs
//! as a single task, which is the only writer of the graph: configuration loads and
//! introspection queries are sent to it through a [`ControlHandle`], while the components
//! run in their own tasks and notify the controller when their exports change.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use weft::controller::{Controller, ControllerOptions};
//! use weft::schema::Registry;
//!
//! # async fn example(registry: Registry) -> anyhow::Result<()> {
//! let shutdown = CancellationToken::new();
//! let controller = Controller::new(registry, ControllerOptions::default());
//! let (handle, task) = controller.start(shutdown, &tokio::runtime::Handle::current());
//!
//! let summary = handle.load(r#"local.file "a" { filename = "/tmp/a" }"#, Duration::from_secs(5)).await?;
//! println!("{} components added", summary.added.len());
//!
//! handle.shutdown();
//! task.await?;
//! # Ok(())
//! # }
//! ```

use std::{fmt, sync::Arc, time::Duration};

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::{runtime, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::component::ChangeNotifier;
use crate::graph::{self, ComponentGraph, ComponentId};
use crate::schema::Registry;
use crate::syntax::{self, diag::Diagnostics};

mod error;
mod handle;
mod info;
mod main_loop;
mod messages;
mod node;
mod scheduler;

pub use error::{ControlError, LoadError};
pub use handle::{ControlHandle, DispatchError, SendWaitError};
pub use info::ComponentInfo;
pub use node::{Health, NodeState};

use node::{Node, NodeState as State};

/// Tuning of the controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Maximum time that a component constructor or `update` call may take.
    pub evaluation_timeout: Duration,
    /// Maximum time to wait for the run task of a component to stop, after cancelling it.
    /// The task is aborted after this delay.
    pub stop_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            evaluation_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    /// Components that did not exist in the previous configuration.
    pub added: Vec<ComponentId>,
    /// Components that no longer exist, and have been stopped.
    pub removed: Vec<ComponentId>,
    /// Kept components that have been evaluated again.
    pub reevaluated: Vec<ComponentId>,
    /// Kept components that have not been touched.
    pub unchanged: Vec<ComponentId>,
    /// Non-fatal diagnostics found in the configuration.
    pub warnings: Diagnostics,
}

/// Manages the components of the current configuration.
pub struct Controller {
    registry: Registry,
    options: ControllerOptions,
    graph: ComponentGraph,
    nodes: FxHashMap<ComponentId, Node>,
    notifier: Arc<ChangeNotifier>,
    /// Incremented for each new instance, to ignore the events of replaced instances.
    generation: u64,
    run_events_tx: mpsc::UnboundedSender<main_loop::RunEvent>,
    run_events: mpsc::UnboundedReceiver<main_loop::RunEvent>,
}

/// Parses a configuration and builds its component graph, without starting anything.
///
/// On success, returns the graph and the warnings. On failure, returns every diagnostic:
/// syntax errors stop the process before the graph is built.
pub fn compile(source: &str, registry: &Registry) -> Result<(ComponentGraph, Diagnostics), Diagnostics> {
    let (body, diags) = syntax::parse(source);
    if diags.has_errors() {
        return Err(diags);
    }
    let (graph, graph_diags) = graph::build(&body, registry);
    let mut all = diags;
    all.extend(graph_diags);
    match graph {
        Some(graph) => Ok((graph, all)),
        None => Err(all),
    }
}

impl Controller {
    pub fn new(registry: Registry, options: ControllerOptions) -> Self {
        let (run_events_tx, run_events) = mpsc::unbounded_channel();
        Self {
            registry,
            options,
            graph: ComponentGraph::default(),
            nodes: FxHashMap::default(),
            notifier: Arc::new(ChangeNotifier::default()),
            generation: 0,
            run_events_tx,
            run_events,
        }
    }

    /// Starts the controller task on the given runtime.
    ///
    /// The controller, and every component, stops when `shutdown` is cancelled
    /// (see [`ControlHandle::shutdown`]) or when every control handle has been dropped.
    pub fn start(self, shutdown: CancellationToken, on: &runtime::Handle) -> (ControlHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let task = self.run(shutdown.clone(), rx);
        let control_handle = ControlHandle {
            tx,
            shutdown_token: shutdown,
        };
        let task_handle = on.spawn(task);
        (control_handle, task_handle)
    }

    /// Replaces the current configuration.
    ///
    /// If the new configuration is invalid, nothing changes. Otherwise, the components that
    /// no longer exist are stopped, the new ones are built, and the kept ones are evaluated
    /// again if their block, their dependencies or the exports they depend on have changed.
    pub(crate) async fn load(&mut self, source: &str) -> Result<LoadSummary, LoadError> {
        let (new_graph, warnings) = compile(source, &self.registry).map_err(LoadError::Invalid)?;
        for w in &warnings {
            log::warn!("{w}");
        }

        // stop the removed nodes, dependents first
        let removed: Vec<ComponentId> = self
            .graph
            .topological_order()
            .into_iter()
            .rev()
            .filter(|id| !new_graph.contains(id))
            .collect();
        for id in &removed {
            self.stop(id).await;
            self.nodes.remove(id);
        }

        // diff the kept nodes
        let mut added = Vec::new();
        let mut targets = IndexSet::new();
        let mut unchanged = Vec::new();
        for decl in new_graph.declarations() {
            let id = &decl.id;
            match self.nodes.get_mut(id) {
                None => {
                    self.nodes.insert(id.clone(), Node::new(decl.clone()));
                    added.push(id.clone());
                    targets.insert(id.clone());
                }
                Some(node) => {
                    let old_deps: FxHashSet<&ComponentId> = self.graph.dependencies(id).collect();
                    let new_deps: FxHashSet<&ComponentId> = new_graph.dependencies(id).collect();
                    let changed = node.declaration.text != decl.text
                        || old_deps != new_deps
                        || node.state == State::Failed
                        || !node.is_alive();
                    node.declaration = decl.clone();
                    if changed {
                        targets.insert(id.clone());
                    } else {
                        unchanged.push(id.clone());
                    }
                }
            }
        }

        // kept nodes whose upstream exports have changed since their last evaluation
        let versions: FxHashMap<&ComponentId, u64> =
            self.nodes.iter().map(|(id, n)| (id, n.exports.version())).collect();
        let stale: FxHashSet<ComponentId> = unchanged
            .iter()
            .filter(|id| {
                self.nodes.get(*id).is_some_and(|node| {
                    new_graph.dependencies(id).any(|dep| {
                        let current = versions.get(dep).copied().unwrap_or_default();
                        node.seen.get(dep).copied().unwrap_or_default() != current
                    })
                })
            })
            .cloned()
            .collect();
        unchanged.retain(|id| !stale.contains(id));
        targets.extend(stale);

        self.graph = new_graph;
        let reevaluated: Vec<ComponentId> = targets.iter().filter(|id| !added.contains(id)).cloned().collect();
        self.evaluate(targets).await;

        let summary = LoadSummary {
            added,
            removed,
            reevaluated,
            unchanged,
            warnings,
        };
        log::info!("Configuration loaded: {summary}");
        Ok(summary)
    }

    /// Stops a node: cancels its run task, waits for it, then shuts the component down.
    async fn stop(&mut self, id: &ComponentId) {
        let stop_timeout = self.options.stop_timeout;
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.set_state(State::Stopping);
        if let Some(mut instance) = node.instance.take() {
            instance.token.cancel();
            if let Some(task) = instance.task.take() {
                let abort = task.abort_handle();
                match tokio::time::timeout(stop_timeout, task).await {
                    Ok(Ok(())) => log::trace!("{id}: run task stopped"),
                    Ok(Err(e)) => log::error!("{id}: run task failed to stop: {e:?}"),
                    Err(_) => {
                        log::warn!(
                            "{id} did not stop within {}, aborting it",
                            humantime::format_duration(stop_timeout)
                        );
                        abort.abort();
                    }
                }
            }
            instance.release(id);
        }
        node.set_state(State::Stopped);
    }

    /// Stops every node, dependents first.
    async fn stop_all(&mut self) {
        let order = self.graph.topological_order();
        log::info!("Stopping {} components...", order.len());
        for id in order.iter().rev() {
            self.stop(id).await;
        }
        let failed = self.nodes.values().filter(|n| !n.health.is_healthy()).count();
        if failed > 0 {
            log::warn!("{failed} components were unhealthy at shutdown");
        }
    }

    fn introspect(&self, body: messages::IntrospectionBody) -> Result<Vec<ComponentInfo>, ControlError> {
        let info = |id: &ComponentId| {
            self.nodes.get(id).map(|node| {
                let dependencies = self.graph.dependencies(id).cloned().collect();
                let dependents = self.graph.dependents(id).cloned().collect();
                ComponentInfo::of(node, dependencies, dependents)
            })
        };
        match body {
            messages::IntrospectionBody::List => {
                Ok(self.graph.topological_order().iter().filter_map(info).collect())
            }
            messages::IntrospectionBody::Info(id) => match info(&id) {
                Some(i) => Ok(vec![i]),
                None => Err(ControlError::UnknownComponent(id)),
            },
        }
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} removed, {} re-evaluated, {} unchanged",
            self.added.len(),
            self.removed.len(),
            self.reevaluated.len(),
            self.unchanged.len()
        )?;
        if !self.warnings.is_empty() {
            write!(f, ", {} warnings", self.warnings.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::compile;
    use crate::schema::{Registration, Registry, Schema, ValueType};
    use crate::syntax::diag::DiagnosticCode;

    fn registry() -> Registry {
        let mut builder = Registry::builder();
        builder
            .register(Registration::new(
                "constant",
                Schema::builder().required("value", ValueType::Any).build(),
                Schema::builder().optional("value", ValueType::Any).build(),
                |_, _| Err(anyhow::anyhow!("never built in these tests")),
            ))
            .unwrap();
        builder.build()
    }

    #[test]
    fn syntax_errors_stop_before_the_graph() {
        // the unknown kind is not reported, since the graph is not built
        let diags = compile("unknown {}\nconstant \"a\" { value = }", &registry()).unwrap_err();
        let codes: Vec<_> = diags.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::Syntax]);
    }

    #[test]
    fn valid_configuration() {
        let (graph, warnings) = compile("constant \"a\" { value = 1 }\nconstant \"b\" { value = constant.a.value }", &registry()).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(graph.len(), 2);
    }
}
