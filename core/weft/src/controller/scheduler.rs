//! Evaluation of the nodes, in dependency order.

use std::{
    cell::RefCell,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::component::{BuildContext, Component, ExportHandle, RunContext};
use crate::eval::{self, Arguments, EvalError, ReferenceResolver, Value};
use crate::graph::{ComponentGraph, ComponentId};
use crate::syntax::ast;
use crate::syntax::diag::DiagnosticCode;
use crate::syntax::{Span, Spanned};

use super::{
    main_loop::RunEvent,
    node::{Health, Instance, Node, NodeState},
    Controller,
};

/// Result of a call to a component constructor or to `update`.
struct Finished {
    id: ComponentId,
    arguments: Arguments,
    outcome: Outcome,
}

enum Outcome {
    Built(Arc<dyn Component>, ExportHandle),
    BuildFailed(ExportHandle, String),
    Updated,
    UpdateFailed(String),
}

/// Resolves references against the latest exports, and records the version of each export it reads.
struct SnapshotResolver<'a> {
    graph: &'a ComponentGraph,
    nodes: &'a FxHashMap<ComponentId, Node>,
    seen: RefCell<FxHashMap<ComponentId, u64>>,
}

impl ReferenceResolver for SnapshotResolver<'_> {
    fn resolve(&self, path: &[Spanned<String>], span: Span) -> Result<Value, EvalError> {
        let unresolved = |reason: String| EvalError::UnresolvedReference {
            reference: ast::path_to_string(path),
            reason,
            span,
        };
        let reference = self
            .graph
            .resolve_path(path, span)
            .ok_or_else(|| unresolved(String::from("there is no such component")))?;
        let node = self
            .nodes
            .get(&reference.target)
            .ok_or_else(|| unresolved(format!("`{}` is not running", reference.target)))?;

        let snapshot = node.exports.snapshot();
        self.seen.borrow_mut().insert(reference.target.clone(), snapshot.version);
        let exports = snapshot
            .exports
            .ok_or_else(|| unresolved(format!("`{}` has not published its exports yet", reference.target)))?;
        let mut value = exports.get(&reference.field).ok_or_else(|| {
            unresolved(format!("`{}` has not exported `{}`", reference.target, reference.field))
        })?;
        for key in &reference.path {
            value = value
                .get(key)
                .ok_or_else(|| unresolved(format!("`{}.{}` has no key `{key}`", reference.target, reference.field)))?;
        }
        Ok(value.clone())
    }
}

impl Controller {
    /// Evaluates the target nodes, each one after its dependencies.
    ///
    /// Nodes whose dependencies are settled are processed concurrently: their constructors and
    /// `update` calls run on the blocking thread pool. Returns when every target is settled.
    pub(super) async fn evaluate(&mut self, targets: IndexSet<ComponentId>) {
        let mut pending: IndexSet<ComponentId> = self
            .graph
            .topological_order()
            .into_iter()
            .filter(|id| targets.contains(id))
            .collect();
        let mut in_flight: FxHashSet<ComponentId> = FxHashSet::default();
        let mut jobs: JoinSet<Finished> = JoinSet::new();

        loop {
            let eligible: Vec<ComponentId> = pending
                .iter()
                .filter(|id| {
                    self.graph
                        .dependencies(id)
                        .all(|dep| !pending.contains(dep) && !in_flight.contains(dep))
                })
                .cloned()
                .collect();
            for id in eligible {
                pending.shift_remove(&id);
                if let Some(job) = self.prepare(&id) {
                    in_flight.insert(id);
                    jobs.spawn(job);
                }
            }

            match jobs.join_next().await {
                Some(Ok(finished)) => {
                    in_flight.remove(&finished.id);
                    self.apply(finished);
                }
                Some(Err(e)) => log::error!("evaluation job failed: {e:?}"),
                None => break,
            }
        }
        if !pending.is_empty() {
            log::warn!("{} components could not be evaluated", pending.len());
        }
    }

    /// Evaluates the arguments of a node and decides what to do with them.
    ///
    /// Returns the job to run, if the component must be built or updated.
    fn prepare(&mut self, id: &ComponentId) -> Option<BoxFuture<'static, Finished>> {
        let node = self.nodes.get(id)?;
        let declaration = node.declaration.clone();
        let resolver = SnapshotResolver {
            graph: &self.graph,
            nodes: &self.nodes,
            seen: RefCell::new(FxHashMap::default()),
        };
        let result = eval::evaluate_body(
            &declaration.block.body,
            &declaration.registration.arguments,
            &resolver,
        );
        let seen = resolver.seen.into_inner();

        let timeout = self.options.evaluation_timeout;
        let notifier = self.notifier.clone();
        let node = self.nodes.get_mut(id)?;
        node.seen = seen;
        let arguments = match result {
            Ok(args) => args,
            Err(e) => {
                node.fail(e.code(), e.to_string());
                return None;
            }
        };

        if node.is_alive() {
            if node.arguments.as_ref() == Some(&arguments) {
                log::trace!("{id}: arguments unchanged");
                node.health = Health::Healthy;
                node.set_state(NodeState::Running);
                return None;
            }
            let component = node.instance.as_ref()?.component.clone();
            node.set_state(NodeState::Updating);
            let id = id.clone();
            Some(Box::pin(async move {
                let args = arguments.clone();
                let task = tokio::task::spawn_blocking(move || component.update(args));
                let outcome = match job_result(tokio::time::timeout(timeout, task).await, timeout) {
                    Ok(()) => Outcome::Updated,
                    Err(e) => Outcome::UpdateFailed(e),
                };
                Finished { id, arguments, outcome }
            }))
        } else {
            // the run task may have finished before its end was reported
            if let Some(instance) = node.instance.take() {
                log::debug!("{id}: replacing an instance whose run task has finished");
                instance.release(id);
            }
            let exports = ExportHandle::new(
                id.clone(),
                node.exports.clone(),
                declaration.registration.exports.clone(),
                notifier,
            );
            let ctx = BuildContext {
                id: id.clone(),
                exports: exports.clone(),
            };
            node.set_state(NodeState::Evaluating);
            let registration = declaration.registration;
            let id = id.clone();
            Some(Box::pin(async move {
                let args = arguments.clone();
                let task = tokio::task::spawn_blocking(move || registration.build(ctx, args));
                let outcome = match job_result(tokio::time::timeout(timeout, task).await, timeout) {
                    Ok(component) => Outcome::Built(component, exports),
                    Err(e) => Outcome::BuildFailed(exports, e),
                };
                Finished { id, arguments, outcome }
            }))
        }
    }

    /// Applies the result of a job to its node.
    fn apply(&mut self, finished: Finished) {
        let Finished { id, arguments, outcome } = finished;
        let Some(node) = self.nodes.get_mut(&id) else {
            if let Outcome::Built(component, exports) = outcome {
                exports.deactivate();
                component.shutdown();
            }
            return;
        };
        match outcome {
            Outcome::Built(component, exports) => {
                self.generation += 1;
                let generation = self.generation;
                let token = CancellationToken::new();
                let ctx = RunContext {
                    id: id.clone(),
                    token: token.clone(),
                    exports: exports.clone(),
                };
                let task = tokio::spawn(run_component(
                    component.clone(),
                    ctx,
                    generation,
                    self.run_events_tx.clone(),
                ));
                node.instance = Some(Instance {
                    component,
                    exports,
                    token,
                    task: Some(task),
                    generation,
                });
                node.arguments = Some(arguments);
                node.health = Health::Healthy;
                node.set_state(NodeState::Running);
                log::info!("{id} started");
            }
            Outcome::BuildFailed(exports, e) => {
                exports.deactivate();
                node.fail(DiagnosticCode::InitializationError, format!("failed to build the component: {e}"));
            }
            Outcome::Updated => {
                node.arguments = Some(arguments);
                node.updates += 1;
                node.health = Health::Healthy;
                node.set_state(NodeState::Running);
                log::debug!("{id} updated");
            }
            Outcome::UpdateFailed(e) => {
                // the instance keeps running with its previous arguments
                node.fail(DiagnosticCode::UpdateRejected, format!("the component rejected its new arguments: {e}"));
            }
        }
    }

    /// Re-evaluates the dependents of the nodes whose exports have changed.
    ///
    /// The changes that happened since the last call are coalesced: each dependent is
    /// evaluated at most once, against the latest exports.
    pub(super) async fn propagate(&mut self) {
        let dirty = self.notifier.take();
        let mut targets = IndexSet::new();
        for upstream in &dirty {
            let Some(version) = self.nodes.get(upstream).map(|n| n.exports.version()) else {
                continue;
            };
            for dependent in self.graph.dependents(upstream) {
                let Some(node) = self.nodes.get(dependent) else {
                    continue;
                };
                let stale = node.seen.get(upstream).copied().unwrap_or_default() != version;
                let eligible = node.state == NodeState::Running || node.failed_on_evaluation();
                if stale && eligible {
                    targets.insert(dependent.clone());
                }
            }
        }
        if !targets.is_empty() {
            log::debug!("exports changed, re-evaluating {} components", targets.len());
            self.evaluate(targets).await;
        }
    }
}

async fn run_component(
    component: Arc<dyn Component>,
    ctx: RunContext,
    generation: u64,
    events: tokio::sync::mpsc::UnboundedSender<RunEvent>,
) {
    let id = ctx.id.clone();
    let outcome = match AssertUnwindSafe(component.run(ctx)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    };
    // the controller may have stopped already
    let _ = events.send(RunEvent { id, generation, outcome });
}

fn job_result<T>(
    res: Result<Result<anyhow::Result<T>, JoinError>, tokio::time::error::Elapsed>,
    timeout: Duration,
) -> Result<T, String> {
    match res {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(format!("{e:#}")),
        Ok(Err(e)) if e.is_panic() => Err(panic_message(e.into_panic().as_ref())),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}", humantime::format_duration(timeout))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic payload"));
    format!("panicked: {message}")
}
