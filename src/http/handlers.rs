//! Axum HTTP handlers for the web server
//!
//! Maps one HTTP request onto one logical call: the path names the method, the
//! body carries the request message(s) and the response carries every message
//! the handler produced.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{CallFailure, Status};
use crate::rpc::{Call, CallContext, CallShape, IncomingCall, MethodId, ResponseStream};
use crate::AppState;

pub const CALL_TIMEOUT_HEADER: &str = "x-call-timeout-ms";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MethodDescriptor {
    pub method: String,
    pub shape: CallShape,
}

#[derive(Debug, Serialize)]
pub struct MethodsResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub methods: Vec<MethodDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub messages: Vec<Value>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn list_methods(State(state): State<AppState>) -> Json<MethodsResponse> {
    let methods = state
        .dispatcher
        .methods()
        .into_iter()
        .map(|(method, shape)| MethodDescriptor {
            method: method.to_string(),
            shape,
        })
        .collect();

    Json(MethodsResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        methods,
    })
}

pub async fn rpc_endpoint(
    State(state): State<AppState>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match run_call(&state, MethodId::new(service, method), &headers, &body).await {
        Ok(messages) => Json(CallResponse { messages }).into_response(),
        Err(failure) => failure.into_response(),
    }
}

async fn run_call(
    state: &AppState,
    method: MethodId,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Vec<Value>, CallFailure> {
    let shape = state.dispatcher.shape_of(&method).map_err(Status::from)?;
    let context = call_context(headers, state.default_timeout)?;
    let payload = parse_body(body, shape)?;

    debug!(method = %method, shape = %shape, "dispatching HTTP call");
    let call = state
        .dispatcher
        .dispatch(IncomingCall::new(method, context))
        .map_err(Status::from)?;

    match call {
        Call::Unary(call) => Ok(vec![call.invoke(single(payload)).await?]),
        Call::ServerStream(call) => drain(call.start(single(payload))).await,
        Call::ClientStream(mut call) => {
            for message in many(payload) {
                // the handler stopped reading; its status explains why
                if call.send(message).await.is_err() {
                    break;
                }
            }
            Ok(vec![call.close_and_receive().await?])
        }
        Call::BidiStream(call) => {
            let (mut sink, responses) = call.into_parts();
            let send = async move {
                for message in many(payload) {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                if !sink.is_closed() {
                    let _ = sink.close();
                }
            };
            let ((), received) = tokio::join!(send, drain(responses));
            received
        }
    }
}

/// Collects a response stream up to its terminal status. Messages delivered
/// before an error are kept in the failure.
async fn drain(mut responses: ResponseStream) -> Result<Vec<Value>, CallFailure> {
    let mut delivered = Vec::new();
    loop {
        match responses.message().await {
            Ok(Some(message)) => delivered.push(message),
            Ok(None) => return Ok(delivered),
            Err(status) => return Err(CallFailure { status, delivered }),
        }
    }
}

fn call_context(
    headers: &HeaderMap,
    default_timeout: Option<Duration>,
) -> Result<CallContext, Status> {
    let mut context = CallContext::background();

    if let Some(request_id) = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        context = context.with_metadata(REQUEST_ID_HEADER, request_id);
    }

    let timeout = match headers.get(CALL_TIMEOUT_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .ok_or_else(|| {
                    Status::invalid_argument(format!(
                        "{CALL_TIMEOUT_HEADER} must be a whole number of milliseconds"
                    ))
                })?,
        ),
        None => default_timeout,
    };

    Ok(match timeout {
        Some(timeout) => context.with_timeout(timeout),
        None => context,
    })
}

enum Payload {
    Single(Value),
    Many(Vec<Value>),
}

fn parse_body(body: &[u8], shape: CallShape) -> Result<Payload, Status> {
    let streaming_requests = matches!(shape, CallShape::ClientStream | CallShape::BidiStream);

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(if streaming_requests {
            Payload::Many(Vec::new())
        } else {
            Payload::Single(json!({}))
        });
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|err| Status::invalid_argument(format!("request body is not JSON: {err}")))?;

    if !streaming_requests {
        return Ok(Payload::Single(value));
    }
    match value {
        Value::Array(messages) => Ok(Payload::Many(messages)),
        _ => Err(Status::invalid_argument(format!(
            "{shape} calls take a JSON array of request messages"
        ))),
    }
}

fn single(payload: Payload) -> Value {
    match payload {
        Payload::Single(message) => message,
        Payload::Many(messages) => Value::Array(messages),
    }
}

fn many(payload: Payload) -> Vec<Value> {
    match payload {
        Payload::Many(messages) => messages,
        Payload::Single(message) => vec![message],
    }
}
