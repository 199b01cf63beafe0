//! The contract between the controller and the components.
//!
//! A component kind is a type that implements [`ComponentKind`]. The controller creates
//! one instance per block of that kind, with [`ComponentKind::build`], then spawns its
//! [`run`](Component::run) task. When the arguments of the block change, the controller
//! calls [`update`](Component::update) on the running instance.
//!
//! Components publish their exports through an [`ExportHandle`], which they obtain from the
//! [`BuildContext`] or the [`RunContext`].
//!
//! ## Example
//!
//! ```
//! use weft::component::{BuildContext, Component, ComponentKind, Exports};
//! use weft::eval::Arguments;
//! use weft::schema::{Schema, ValueType};
//!
//! struct Constant {
//!     ctx: BuildContext,
//! }
//!
//! impl ComponentKind for Constant {
//!     fn name() -> &'static str {
//!         "constant"
//!     }
//!
//!     fn arguments() -> Schema {
//!         Schema::builder().required("value", ValueType::Any).build()
//!     }
//!
//!     fn exports() -> Schema {
//!         Schema::builder().optional("value", ValueType::Any).build()
//!     }
//!
//!     fn build(ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
//!         let component = Self { ctx };
//!         component.update(args)?;
//!         Ok(component)
//!     }
//! }
//!
//! impl Component for Constant {
//!     fn update(&self, args: Arguments) -> anyhow::Result<()> {
//!         let value = args.get("value").cloned().unwrap_or_default();
//!         self.ctx.exports().publish(Exports::new().with("value", value))?;
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::eval::Arguments;
use crate::graph::ComponentId;
use crate::schema::Schema;

mod exports;

pub use exports::{ExportError, ExportHandle, ExportSnapshot, Exports};
pub(crate) use exports::{ChangeNotifier, ExportCell};

/// A running instance of a component.
pub trait Component: Send + Sync + 'static {
    /// Applies new arguments to the running instance.
    ///
    /// If this returns an error, the node enters the failed state but keeps running
    /// with its previous arguments, and its last exports stay visible to the dependents.
    fn update(&self, args: Arguments) -> anyhow::Result<()>;

    /// Runs the component until the cancellation token of `ctx` is cancelled.
    ///
    /// Returning before the cancellation, or returning an error, puts the node in the failed state.
    /// The default implementation waits for the cancellation.
    fn run(self: Arc<Self>, ctx: RunContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            ctx.cancelled().await;
            Ok(())
        })
    }

    /// Releases the resources of the component, after its `run` task has finished.
    ///
    /// Must be idempotent.
    fn shutdown(&self) {}
}

/// A kind of component, for instance `local.file`.
pub trait ComponentKind: Component + Sized {
    /// Dotted name of the kind, used as the block name in configuration files.
    fn name() -> &'static str;

    fn arguments() -> Schema;

    fn exports() -> Schema {
        Schema::empty()
    }

    /// Creates a new instance from validated and evaluated arguments.
    ///
    /// The function is called on a thread where blocking is allowed.
    fn build(ctx: BuildContext, args: Arguments) -> anyhow::Result<Self>;
}

/// Given to [`ComponentKind::build`].
#[derive(Clone)]
pub struct BuildContext {
    pub(crate) id: ComponentId,
    pub(crate) exports: ExportHandle,
}

/// Given to [`Component::run`].
#[derive(Clone)]
pub struct RunContext {
    pub(crate) id: ComponentId,
    pub(crate) token: CancellationToken,
    pub(crate) exports: ExportHandle,
}

impl BuildContext {
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn exports(&self) -> &ExportHandle {
        &self.exports
    }
}

impl RunContext {
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn exports(&self) -> &ExportHandle {
        &self.exports
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the component must stop.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
