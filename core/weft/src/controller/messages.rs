use tokio::sync::{mpsc, oneshot};

use crate::graph::ComponentId;

use super::{error::ControlError, info::ComponentInfo, LoadSummary};

pub type Receiver = mpsc::Receiver<ControlRequest>;
pub type Sender = mpsc::Sender<ControlRequest>;

#[derive(Debug)]
pub enum ControlRequest {
    Load(RequestMessage<String, LoadSummary>),
    Introspect(RequestMessage<IntrospectionBody, Vec<ComponentInfo>>),
}

pub type ResponseSender<R> = oneshot::Sender<Result<R, ControlError>>;

#[derive(Debug)]
pub struct RequestMessage<Body, Response> {
    pub(super) response_tx: Option<ResponseSender<Response>>,
    pub(super) body: Body,
}

#[derive(Debug)]
pub enum IntrospectionBody {
    /// Every component, in dependency order.
    List,
    Info(ComponentId),
}

impl<Body, Response> RequestMessage<Body, Response> {
    pub(super) fn new(body: Body) -> (Self, oneshot::Receiver<Result<Response, ControlError>>) {
        let (tx, rx) = oneshot::channel();
        let msg = Self {
            response_tx: Some(tx),
            body,
        };
        (msg, rx)
    }

    pub(super) fn without_response(body: Body) -> Self {
        Self {
            response_tx: None,
            body,
        }
    }
}
