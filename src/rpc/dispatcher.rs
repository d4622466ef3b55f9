//! Method registry and call routing
//!
//! Binds `service/method` identifiers to handlers and turns an incoming call
//! into the caller-side handle for the handler's shape.

use std::{collections::HashMap, fmt};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::Status;
use crate::rpc::{
    call::{BidiStreamCall, ClientStreamCall, ResponseStream, ServerStreamCall, UnaryCall},
    channel::ChannelCapacity,
    context::CallContext,
    handler::Handler,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MethodId {
    service: String,
    method: String,
}

impl MethodId {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallShape {
    Unary,
    ServerStream,
    ClientStream,
    BidiStream,
}

impl CallShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::ServerStream => "server_stream",
            Self::ClientStream => "client_stream",
            Self::BidiStream => "bidi_stream",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("method {0} is already registered")]
    DuplicateRegistration(MethodId),
    #[error("method {0} is not registered")]
    MethodNotFound(MethodId),
    #[error("method {method} is {actual}, not {expected}")]
    ShapeMismatch {
        method: MethodId,
        expected: CallShape,
        actual: CallShape,
    },
}

impl From<DispatchError> for Status {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::MethodNotFound(_) => Status::not_found(err.to_string()),
            DispatchError::ShapeMismatch { .. } => Status::invalid_argument(err.to_string()),
            DispatchError::DuplicateRegistration(_) => Status::internal(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub method: MethodId,
    pub context: CallContext,
}

impl IncomingCall {
    pub fn new(method: MethodId, context: CallContext) -> Self {
        Self { method, context }
    }
}

/// A dispatched call, ready for the caller to drive.
pub enum Call {
    Unary(UnaryCall),
    ServerStream(ServerStreamCall),
    ClientStream(ClientStreamCall),
    BidiStream(BidiStreamCall),
}

impl Call {
    pub fn shape(&self) -> CallShape {
        match self {
            Self::Unary(_) => CallShape::Unary,
            Self::ServerStream(_) => CallShape::ServerStream,
            Self::ClientStream(_) => CallShape::ClientStream,
            Self::BidiStream(_) => CallShape::BidiStream,
        }
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    routes: HashMap<MethodId, Handler>,
    capacity: ChannelCapacity,
}

impl Dispatcher {
    pub fn new(capacity: ChannelCapacity) -> Self {
        Self {
            routes: HashMap::new(),
            capacity,
        }
    }

    pub fn register(&mut self, method: MethodId, handler: Handler) -> Result<(), DispatchError> {
        if self.routes.contains_key(&method) {
            return Err(DispatchError::DuplicateRegistration(method));
        }

        debug!(method = %method, shape = %handler.shape(), "registered handler");
        self.routes.insert(method, handler);
        Ok(())
    }

    /// Registered methods, sorted by id.
    pub fn methods(&self) -> Vec<(MethodId, CallShape)> {
        let mut methods: Vec<_> = self
            .routes
            .iter()
            .map(|(method, handler)| (method.clone(), handler.shape()))
            .collect();
        methods.sort();
        methods
    }

    pub fn shape_of(&self, method: &MethodId) -> Result<CallShape, DispatchError> {
        self.lookup(method).map(Handler::shape)
    }

    fn lookup(&self, method: &MethodId) -> Result<&Handler, DispatchError> {
        self.routes.get(method).ok_or_else(|| {
            warn!(method = %method, "call for unregistered method");
            DispatchError::MethodNotFound(method.clone())
        })
    }

    fn expect_shape(&self, method: &MethodId, expected: CallShape) -> Result<(), DispatchError> {
        let actual = self.shape_of(method)?;
        if actual != expected {
            return Err(DispatchError::ShapeMismatch {
                method: method.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Routes `incoming` to its handler. Streaming handlers whose request
    /// direction is open from the start are spawned immediately; unary and
    /// server-streaming handlers start once the caller supplies the request.
    pub fn dispatch(&self, incoming: IncomingCall) -> Result<Call, DispatchError> {
        let IncomingCall { method, context } = incoming;
        let handler = self.lookup(&method)?.clone();
        let context = context.with_cancel();

        debug!(method = %method, shape = %handler.shape(), "dispatching call");
        let call = match handler {
            Handler::Unary(handler) => Call::Unary(UnaryCall::new(method, context, handler)),
            Handler::ServerStream(handler) => Call::ServerStream(ServerStreamCall::new(
                method,
                context,
                self.capacity,
                handler,
            )),
            Handler::ClientStream(handler) => Call::ClientStream(ClientStreamCall::spawn(
                method,
                context,
                self.capacity,
                handler,
            )),
            Handler::BidiStream(handler) => Call::BidiStream(BidiStreamCall::spawn(
                method,
                context,
                self.capacity,
                handler,
            )),
        };
        Ok(call)
    }

    pub async fn unary(
        &self,
        method: &MethodId,
        context: &CallContext,
        request: Value,
    ) -> Result<Value, Status> {
        self.expect_shape(method, CallShape::Unary)?;
        match self.dispatch(IncomingCall::new(method.clone(), context.clone()))? {
            Call::Unary(call) => call.invoke(request).await,
            other => Err(mismatch(method, CallShape::Unary, &other)),
        }
    }

    pub fn server_stream(
        &self,
        method: &MethodId,
        context: &CallContext,
        request: Value,
    ) -> Result<ResponseStream, Status> {
        self.expect_shape(method, CallShape::ServerStream)?;
        match self.dispatch(IncomingCall::new(method.clone(), context.clone()))? {
            Call::ServerStream(call) => Ok(call.start(request)),
            other => Err(mismatch(method, CallShape::ServerStream, &other)),
        }
    }

    pub fn client_stream(
        &self,
        method: &MethodId,
        context: &CallContext,
    ) -> Result<ClientStreamCall, Status> {
        self.expect_shape(method, CallShape::ClientStream)?;
        match self.dispatch(IncomingCall::new(method.clone(), context.clone()))? {
            Call::ClientStream(call) => Ok(call),
            other => Err(mismatch(method, CallShape::ClientStream, &other)),
        }
    }

    pub fn bidi_stream(
        &self,
        method: &MethodId,
        context: &CallContext,
    ) -> Result<BidiStreamCall, Status> {
        self.expect_shape(method, CallShape::BidiStream)?;
        match self.dispatch(IncomingCall::new(method.clone(), context.clone()))? {
            Call::BidiStream(call) => Ok(call),
            other => Err(mismatch(method, CallShape::BidiStream, &other)),
        }
    }
}

fn mismatch(method: &MethodId, expected: CallShape, call: &Call) -> Status {
    DispatchError::ShapeMismatch {
        method: method.clone(),
        expected,
        actual: call.shape(),
    }
    .into()
}
