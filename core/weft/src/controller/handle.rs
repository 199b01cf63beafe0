use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc::error::SendTimeoutError, oneshot};
use tokio_util::sync::CancellationToken;

use crate::graph::ComponentId;

use super::{
    error::ControlError,
    info::ComponentInfo,
    messages::{self, ControlRequest, IntrospectionBody, RequestMessage},
    LoadSummary,
};

/// A handle to send requests to a running [`Controller`](super::Controller).
///
/// The handle is cheap to clone. All the clones send their requests to the same controller.
#[derive(Clone)]
pub struct ControlHandle {
    pub(super) tx: messages::Sender,
    pub(super) shutdown_token: CancellationToken,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The controller was not available.
    /// This happens when the controller is shut down before dispatching the request.
    #[error("dispatch failed: controller not available")]
    NotAvailable,
    /// The deadline has expired.
    #[error("dispatch failed: timeout expired")]
    Timeout,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SendWaitError {
    /// The controller was not available.
    /// This happens when the controller is shut down before processing the request.
    #[error("send_wait failed: controller not available")]
    NotAvailable,
    /// The deadline has expired.
    #[error("send_wait failed: timeout expired")]
    Timeout,
    /// The request was processed by the controller, but it returned an error.
    #[error("send_wait failed: processing the request returned an error")]
    Operation(#[source] ControlError),
}

impl ControlHandle {
    /// Shuts the controller down, which stops every component.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Returns a token that is cancelled when the controller begins to shut down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Loads a new configuration and waits for the graph to settle.
    ///
    /// # Errors
    /// If the configuration is invalid, returns a [`LoadError`](super::LoadError) wrapped in
    /// `SendWaitError::Operation`. The diagnostics can be obtained from it. In that case, the
    /// components of the previous configuration keep running as before.
    pub async fn load(
        &self,
        source: impl Into<String>,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<LoadSummary, SendWaitError> {
        let (msg, rx) = RequestMessage::new(source.into());
        self.impl_send_wait(ControlRequest::Load(msg), rx, timeout.into()).await
    }

    /// Sends a configuration to load, without waiting for the result.
    ///
    /// Errors in the configuration are logged by the controller.
    pub async fn dispatch_load(
        &self,
        source: impl Into<String>,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<(), DispatchError> {
        let msg = RequestMessage::without_response(source.into());
        self.impl_dispatch(ControlRequest::Load(msg), timeout.into()).await
    }

    /// Lists every component, each one after its dependencies.
    pub async fn list_components(
        &self,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<Vec<ComponentInfo>, SendWaitError> {
        let (msg, rx) = RequestMessage::new(IntrospectionBody::List);
        self.impl_send_wait(ControlRequest::Introspect(msg), rx, timeout.into())
            .await
    }

    /// Returns the state of one component.
    pub async fn component_info(
        &self,
        id: ComponentId,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<ComponentInfo, SendWaitError> {
        let (msg, rx) = RequestMessage::new(IntrospectionBody::Info(id.clone()));
        let mut infos = self
            .impl_send_wait(ControlRequest::Introspect(msg), rx, timeout.into())
            .await?;
        infos
            .pop()
            .ok_or(SendWaitError::Operation(ControlError::UnknownComponent(id)))
    }

    async fn impl_dispatch(&self, msg: ControlRequest, timeout: Option<Duration>) -> Result<(), DispatchError> {
        match timeout {
            Some(timeout) => self.tx.send_timeout(msg, timeout).await.map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DispatchError::Timeout,
                SendTimeoutError::Closed(_) => DispatchError::NotAvailable,
            }),
            None => self.tx.send(msg).await.map_err(|_| DispatchError::NotAvailable),
        }
    }

    async fn impl_send_wait<R>(
        &self,
        msg: ControlRequest,
        rx: oneshot::Receiver<Result<R, ControlError>>,
        timeout: Option<Duration>,
    ) -> Result<R, SendWaitError> {
        // send the message
        match timeout {
            Some(timeout) => self.tx.send_timeout(msg, timeout).await.map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SendWaitError::Timeout,
                SendTimeoutError::Closed(_) => SendWaitError::NotAvailable,
            }),
            None => self.tx.send(msg).await.map_err(|_| SendWaitError::NotAvailable),
        }?;
        // wait for a response
        let response = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, rx)
                .await
                .map_err(|_| SendWaitError::Timeout)?,
            None => rx.await,
        };
        match response {
            Ok(Ok(ret)) => Ok(ret),
            Ok(Err(err)) => Err(SendWaitError::Operation(err)),
            Err(_recv_error) => Err(SendWaitError::NotAvailable),
        }
    }
}

impl SendWaitError {
    /// Returns the diagnostics of a rejected configuration, if that is the cause of the error.
    pub fn diagnostics(&self) -> Option<&crate::syntax::diag::Diagnostics> {
        match self {
            SendWaitError::Operation(ControlError::Load(e)) => Some(e.diagnostics()),
            _ => None,
        }
    }
}
