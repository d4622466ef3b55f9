//! Caller-side halves of the four call shapes
//!
//! Each handle owns the spawned handler task and settles exactly one terminal
//! [`Status`] for its call. Dropping a handle before that point cancels the
//! call's context.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tracing::{debug, info};

use crate::errors::Status;
use crate::rpc::{
    channel::{channel, ChannelCapacity, ChannelError, MessageReceiver, MessageSender},
    context::CallContext,
    dispatcher::{CallShape, MethodId},
    handler::{
        decode, BidiStreamHandler, ClientStreamHandler, ServerStreamHandler, UnaryHandler,
    },
};

#[derive(Debug)]
struct CallGuard {
    context: CallContext,
    armed: bool,
}

impl CallGuard {
    fn new(context: &CallContext) -> Self {
        Self {
            context: context.clone(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("call handle dropped before completion; cancelling");
            self.context.cancel();
        }
    }
}

fn settle<T>(joined: Result<Result<T, Status>, JoinError>) -> Result<T, Status> {
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => Err(Status::internal(format!("handler panicked: {err}"))),
        Err(_) => Err(Status::cancelled("handler was aborted")),
    }
}

fn audit<T>(method: &MethodId, shape: CallShape, outcome: &Result<T, Status>, started: Instant) {
    let outcome = match outcome {
        Ok(_) => "ok",
        Err(status) => status.code().as_str(),
    };
    info!(
        method = %method,
        shape = %shape,
        outcome,
        duration_ms = started.elapsed().as_millis() as u64,
        "call completed"
    );
}

pub struct UnaryCall {
    method: MethodId,
    context: CallContext,
    handler: Arc<dyn UnaryHandler>,
}

impl UnaryCall {
    pub(crate) fn new(
        method: MethodId,
        context: CallContext,
        handler: Arc<dyn UnaryHandler>,
    ) -> Self {
        Self {
            method,
            context,
            handler,
        }
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Sends the single request and waits for the response, or for the
    /// context to end, whichever comes first.
    pub async fn invoke(self, request: Value) -> Result<Value, Status> {
        let started = Instant::now();
        let mut guard = CallGuard::new(&self.context);
        let handler = self.handler;
        let task_context = self.context.clone();
        let mut task = tokio::spawn(async move { handler.call(task_context, request).await });

        let outcome = tokio::select! {
            biased;
            err = self.context.done() => {
                task.abort();
                Err(Status::from(err))
            }
            joined = &mut task => settle(joined),
        };

        guard.disarm();
        audit(&self.method, CallShape::Unary, &outcome, started);
        outcome
    }
}

pub struct ServerStreamCall {
    method: MethodId,
    context: CallContext,
    capacity: ChannelCapacity,
    handler: Arc<dyn ServerStreamHandler>,
}

impl ServerStreamCall {
    pub(crate) fn new(
        method: MethodId,
        context: CallContext,
        capacity: ChannelCapacity,
        handler: Arc<dyn ServerStreamHandler>,
    ) -> Self {
        Self {
            method,
            context,
            capacity,
            handler,
        }
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    pub fn start(self, request: Value) -> ResponseStream {
        let (responses, messages) = channel(&self.context, self.capacity);
        let handler = self.handler;
        let task_context = self.context.clone();
        let task =
            tokio::spawn(async move { handler.call(task_context, request, responses).await });

        ResponseStream::new(
            self.method,
            CallShape::ServerStream,
            self.context,
            messages,
            task,
        )
    }
}

/// Lazily consumed response direction of a streaming call. Not restartable:
/// once the terminal status has been returned every further read is
/// `Ok(None)`.
pub struct ResponseStream {
    method: MethodId,
    shape: CallShape,
    context: CallContext,
    started: Instant,
    messages: MessageReceiver<Value>,
    task: Option<JoinHandle<Result<(), Status>>>,
    guard: CallGuard,
}

impl ResponseStream {
    fn new(
        method: MethodId,
        shape: CallShape,
        context: CallContext,
        messages: MessageReceiver<Value>,
        task: JoinHandle<Result<(), Status>>,
    ) -> Self {
        let guard = CallGuard::new(&context);
        Self {
            method,
            shape,
            context,
            started: Instant::now(),
            messages,
            task: Some(task),
            guard,
        }
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    pub fn delivered(&self) -> u64 {
        self.messages.received()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_none()
    }

    /// Next response in emission order. After the handler's last message this
    /// returns its terminal status: `Ok(None)` on success, the error otherwise.
    pub async fn message(&mut self) -> Result<Option<Value>, Status> {
        if self.task.is_none() {
            return Ok(None);
        }

        let outcome = match self.messages.recv().await {
            Ok(Some(message)) => return Ok(Some(message)),
            Ok(None) => self.terminal_status().await,
            Err(err) => Err(err.into()),
        };

        self.finish(outcome).map(|()| None)
    }

    pub async fn message_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>, Status> {
        match self.message().await? {
            Some(message) => decode(message).map(Some),
            None => Ok(None),
        }
    }

    async fn terminal_status(&mut self) -> Result<(), Status> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };

        tokio::select! {
            biased;
            err = self.context.done() => Err(err.into()),
            joined = task => settle(joined),
        }
    }

    fn finish(&mut self, outcome: Result<(), Status>) -> Result<(), Status> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.guard.disarm();
        audit(&self.method, self.shape, &outcome, self.started);
        outcome
    }
}

pub struct ClientStreamCall {
    method: MethodId,
    context: CallContext,
    started: Instant,
    requests: MessageSender<Value>,
    task: JoinHandle<Result<Value, Status>>,
    guard: CallGuard,
}

impl ClientStreamCall {
    pub(crate) fn spawn(
        method: MethodId,
        context: CallContext,
        capacity: ChannelCapacity,
        handler: Arc<dyn ClientStreamHandler>,
    ) -> Self {
        let (requests, inbound) = channel(&context, capacity);
        let task_context = context.clone();
        let task = tokio::spawn(async move { handler.call(task_context, inbound).await });
        let guard = CallGuard::new(&context);

        Self {
            method,
            context,
            started: Instant::now(),
            requests,
            task,
            guard,
        }
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Fails with [`ChannelError::PeerGone`] when the handler has already
    /// finished; `close_and_receive` then reports why.
    pub async fn send(&mut self, message: Value) -> Result<(), ChannelError> {
        self.requests.send(message).await
    }

    /// Half-closes the request direction and waits for the single response.
    pub async fn close_and_receive(mut self) -> Result<Value, Status> {
        if !self.requests.is_closed() {
            self.requests.close()?;
        }

        let outcome = tokio::select! {
            biased;
            err = self.context.done() => {
                self.task.abort();
                Err(Status::from(err))
            }
            joined = &mut self.task => settle(joined),
        };

        self.guard.disarm();
        audit(&self.method, CallShape::ClientStream, &outcome, self.started);
        outcome
    }
}

/// Request direction of a bidirectional call. Dropping it half-closes.
pub struct RequestSink {
    requests: MessageSender<Value>,
}

impl RequestSink {
    pub async fn send(&mut self, message: Value) -> Result<(), ChannelError> {
        self.requests.send(message).await
    }

    pub fn close(&mut self) -> Result<(), ChannelError> {
        self.requests.close()
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

/// Both directions of a bidirectional call. Split them with
/// [`BidiStreamCall::into_parts`] and drive each from its own flow; driving
/// both from one sequential loop can deadlock on bounded channels.
pub struct BidiStreamCall {
    requests: RequestSink,
    responses: ResponseStream,
}

impl BidiStreamCall {
    pub(crate) fn spawn(
        method: MethodId,
        context: CallContext,
        capacity: ChannelCapacity,
        handler: Arc<dyn BidiStreamHandler>,
    ) -> Self {
        let (requests, inbound) = channel(&context, capacity);
        let (outbound, messages) = channel(&context, capacity);
        let task_context = context.clone();
        let task =
            tokio::spawn(async move { handler.call(task_context, inbound, outbound).await });

        Self {
            requests: RequestSink { requests },
            responses: ResponseStream::new(
                method,
                CallShape::BidiStream,
                context,
                messages,
                task,
            ),
        }
    }

    pub fn context(&self) -> &CallContext {
        self.responses.context()
    }

    pub fn into_parts(self) -> (RequestSink, ResponseStream) {
        (self.requests, self.responses)
    }
}
