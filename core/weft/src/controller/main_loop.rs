use tokio_util::sync::CancellationToken;

use crate::graph::ComponentId;
use crate::syntax::diag::DiagnosticCode;

use super::{
    error::{ControlError, LoadError},
    messages::{self, RequestMessage},
    Controller,
};

/// Sent by the run task of a component when it finishes.
#[derive(Debug)]
pub(crate) struct RunEvent {
    pub id: ComponentId,
    pub generation: u64,
    /// `Err` contains the error message, or the panic message.
    pub outcome: Result<(), String>,
}

impl Controller {
    async fn handle_message(&mut self, msg: messages::ControlRequest) -> Result<(), ControlError> {
        /// Responds to a message with a value of type `Result<R, ControlError>`.
        fn send_response<R>(
            result: Result<R, ControlError>,
            response_tx: Option<messages::ResponseSender<R>>,
        ) -> Result<(), ControlError> {
            match response_tx {
                Some(tx) => tx.send(result).map_err(|_| ControlError::ResponseNotSent),
                None => {
                    // those who has sent the message does not care about the response, discard it
                    result.map(|_| ())
                }
            }
        }

        match msg {
            messages::ControlRequest::Load(RequestMessage { response_tx, body }) => {
                let result = self.load(&body).await;
                if let Err(LoadError::Invalid(diags)) = &result {
                    log::warn!("Configuration rejected, the running components are left untouched:\n{diags}");
                }
                send_response(result.map_err(ControlError::from), response_tx)
            }
            messages::ControlRequest::Introspect(RequestMessage { response_tx, body }) => {
                let result = self.introspect(body);
                send_response(result, response_tx)
            }
        }
    }

    /// Handles the end of the run task of a component.
    fn run_finished(&mut self, event: RunEvent) {
        let Some(node) = self.nodes.get_mut(&event.id) else {
            return;
        };
        let Some(instance) = &node.instance else {
            return;
        };
        if instance.generation != event.generation || instance.token.is_cancelled() {
            // stopped by the controller, or replaced
            log::trace!("{}: run task of generation {} finished", event.id, event.generation);
            return;
        }

        let message = match event.outcome {
            Ok(()) => String::from("the component stopped on its own"),
            Err(e) => format!("the component stopped with an error: {e}"),
        };
        if let Some(instance) = node.instance.take() {
            instance.release(&event.id);
        }
        // the exports of the last instance stay visible to the dependents
        node.fail(DiagnosticCode::ComponentExited, message);
    }

    /// Main loop of the controller.
    ///
    /// The role of this function is to "oversee" the components by:
    /// - checking if the controller should be shut down
    /// - receiving control messages (loads and introspection)
    /// - re-evaluating the dependents of the components whose exports have changed
    /// - detecting the components that stop before being asked to
    ///
    /// When the controller is requested to shut down, `run` exits from the loop and stops
    /// every component, waiting at most `stop_timeout` for each one.
    pub(super) async fn run(mut self, shutdown: CancellationToken, mut rx: messages::Receiver) {
        let notifier = self.notifier.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                },
                message = rx.recv() => {
                    match message {
                        Some(msg) => {
                            log::trace!("handling {msg:?}");
                            if let Err(e) = self.handle_message(msg).await {
                                log::error!("error in message handling: {e}");
                            }
                        },
                        None => {
                            log::debug!("Every control handle has been dropped.");
                            break;
                        }
                    }
                },
                _ = notifier.notified() => {
                    self.propagate().await;
                },
                Some(event) = self.run_events.recv() => {
                    self.run_finished(event);
                },
            }
        }
        log::debug!("Controller shutting down...");
        self.stop_all().await;
    }
}
