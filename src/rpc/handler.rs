//! Handler-side contracts for the four call shapes
//!
//! Handlers exchange `serde_json::Value` messages with the dispatcher; the
//! `decode`/`encode` helpers and the `*_json` channel methods give them typed
//! access at their own boundary. Any `Fn` returning a matching future is a
//! handler, so services register plain async closures.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::errors::Status;
use crate::rpc::{
    channel::{MessageReceiver, MessageSender},
    context::CallContext,
    dispatcher::CallShape,
};

#[async_trait]
pub trait UnaryHandler: Send + Sync + 'static {
    async fn call(&self, context: CallContext, request: Value) -> Result<Value, Status>;
}

#[async_trait]
pub trait ServerStreamHandler: Send + Sync + 'static {
    async fn call(
        &self,
        context: CallContext,
        request: Value,
        responses: MessageSender<Value>,
    ) -> Result<(), Status>;
}

#[async_trait]
pub trait ClientStreamHandler: Send + Sync + 'static {
    async fn call(
        &self,
        context: CallContext,
        requests: MessageReceiver<Value>,
    ) -> Result<Value, Status>;
}

/// Receives both directions as owned halves so it can drive them from
/// independent flows.
#[async_trait]
pub trait BidiStreamHandler: Send + Sync + 'static {
    async fn call(
        &self,
        context: CallContext,
        requests: MessageReceiver<Value>,
        responses: MessageSender<Value>,
    ) -> Result<(), Status>;
}

#[async_trait]
impl<F, Fut> UnaryHandler for F
where
    F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Status>> + Send + 'static,
{
    async fn call(&self, context: CallContext, request: Value) -> Result<Value, Status> {
        (self)(context, request).await
    }
}

#[async_trait]
impl<F, Fut> ServerStreamHandler for F
where
    F: Fn(CallContext, Value, MessageSender<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    async fn call(
        &self,
        context: CallContext,
        request: Value,
        responses: MessageSender<Value>,
    ) -> Result<(), Status> {
        (self)(context, request, responses).await
    }
}

#[async_trait]
impl<F, Fut> ClientStreamHandler for F
where
    F: Fn(CallContext, MessageReceiver<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Status>> + Send + 'static,
{
    async fn call(
        &self,
        context: CallContext,
        requests: MessageReceiver<Value>,
    ) -> Result<Value, Status> {
        (self)(context, requests).await
    }
}

#[async_trait]
impl<F, Fut> BidiStreamHandler for F
where
    F: Fn(CallContext, MessageReceiver<Value>, MessageSender<Value>) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    async fn call(
        &self,
        context: CallContext,
        requests: MessageReceiver<Value>,
        responses: MessageSender<Value>,
    ) -> Result<(), Status> {
        (self)(context, requests, responses).await
    }
}

/// A registered handler; the variant declares the call shape it implements.
#[derive(Clone)]
pub enum Handler {
    Unary(Arc<dyn UnaryHandler>),
    ServerStream(Arc<dyn ServerStreamHandler>),
    ClientStream(Arc<dyn ClientStreamHandler>),
    BidiStream(Arc<dyn BidiStreamHandler>),
}

impl Handler {
    pub fn unary(handler: impl UnaryHandler) -> Self {
        Self::Unary(Arc::new(handler))
    }

    pub fn server_stream(handler: impl ServerStreamHandler) -> Self {
        Self::ServerStream(Arc::new(handler))
    }

    pub fn client_stream(handler: impl ClientStreamHandler) -> Self {
        Self::ClientStream(Arc::new(handler))
    }

    pub fn bidi_stream(handler: impl BidiStreamHandler) -> Self {
        Self::BidiStream(Arc::new(handler))
    }

    pub fn shape(&self) -> CallShape {
        match self {
            Self::Unary(_) => CallShape::Unary,
            Self::ServerStream(_) => CallShape::ServerStream,
            Self::ClientStream(_) => CallShape::ClientStream,
            Self::BidiStream(_) => CallShape::BidiStream,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}

/// Parses a request message; malformed input is the caller's fault.
pub fn decode<T: DeserializeOwned>(message: Value) -> Result<T, Status> {
    serde_json::from_value(message)
        .map_err(|err| Status::invalid_argument(format!("malformed message: {err}")))
}

pub fn encode<T: Serialize>(message: &T) -> Result<Value, Status> {
    serde_json::to_value(message).map_err(Status::internal)
}

impl MessageSender<Value> {
    pub async fn send_json<T: Serialize>(&mut self, message: &T) -> Result<(), Status> {
        let value = encode(message)?;
        self.send(value).await.map_err(Status::from)
    }
}

impl MessageReceiver<Value> {
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>, Status> {
        match self.recv().await? {
            Some(value) => decode(value).map(Some),
            None => Ok(None),
        }
    }
}
