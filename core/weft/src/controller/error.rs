use thiserror::Error;

use crate::graph::ComponentId;
use crate::syntax::diag::Diagnostics;

/// Error returned by [`load`](super::ControlHandle::load).
#[derive(Debug, Error)]
pub enum LoadError {
    /// The configuration is invalid. The running graph has not been modified.
    #[error("invalid configuration ({} errors)", .0.errors().count())]
    Invalid(Diagnostics),
}

/// An error that can occur when processing a control request.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("unknown component `{0}`")]
    UnknownComponent(ComponentId),
    #[error("failed to send control response")]
    ResponseNotSent,
}

impl LoadError {
    pub fn diagnostics(&self) -> &Diagnostics {
        match self {
            LoadError::Invalid(diags) => diags,
        }
    }
}
