//! Greeting service
//!
//! The business logic is string formatting; the interesting part is the
//! timing. `GreetManyTimes` paces its stream and `GreetWithDeadline` waits in
//! steps, and both waits race the call context.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::Status;
use crate::rpc::{
    decode, encode, CallContext, DispatchError, Dispatcher, Handler, MessageReceiver,
    MessageSender, MethodId,
};

pub const SERVICE: &str = "greet.GreetService";
pub const GREET_MANY_TIMES_COUNT: usize = 10;
pub const DEADLINE_STEPS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreetSettings {
    pub stream_interval: Duration,
    pub deadline_step: Duration,
}

impl Default for GreetSettings {
    fn default() -> Self {
        Self {
            stream_interval: Duration::from_secs(1),
            deadline_step: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Greeting {
    pub first_name: String,
    pub last_name: String,
}

impl Greeting {
    fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Deserialize)]
pub struct GreetRequest {
    pub greeting: Greeting,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GreetResponse {
    pub result: String,
}

pub fn register(dispatcher: &mut Dispatcher, settings: GreetSettings) -> Result<(), DispatchError> {
    dispatcher.register(MethodId::new(SERVICE, "Greet"), Handler::unary(greet))?;
    dispatcher.register(
        MethodId::new(SERVICE, "GreetManyTimes"),
        Handler::server_stream(
            move |context: CallContext, request: Value, responses: MessageSender<Value>| {
                greet_many_times(settings.stream_interval, context, request, responses)
            },
        ),
    )?;
    dispatcher.register(
        MethodId::new(SERVICE, "LongGreet"),
        Handler::client_stream(long_greet),
    )?;
    dispatcher.register(
        MethodId::new(SERVICE, "GreetEveryone"),
        Handler::bidi_stream(greet_everyone),
    )?;
    dispatcher.register(
        MethodId::new(SERVICE, "GreetWithDeadline"),
        Handler::unary(move |context: CallContext, request: Value| {
            greet_with_deadline(settings.deadline_step, context, request)
        }),
    )?;
    Ok(())
}

async fn greet(_context: CallContext, request: Value) -> Result<Value, Status> {
    let GreetRequest { greeting } = decode(request)?;
    info!(?greeting, "received Greet call");

    encode(&GreetResponse {
        result: format!("Hello {}", greeting.full_name()),
    })
}

async fn greet_many_times(
    interval: Duration,
    context: CallContext,
    request: Value,
    mut responses: MessageSender<Value>,
) -> Result<(), Status> {
    let GreetRequest { greeting } = decode(request)?;
    info!(?greeting, "received GreetManyTimes call");

    for index in 0..GREET_MANY_TIMES_COUNT {
        responses
            .send_json(&GreetResponse {
                result: format!("Hello {} number {index}", greeting.full_name()),
            })
            .await?;
        if index + 1 < GREET_MANY_TIMES_COUNT {
            context.sleep(interval).await?;
        }
    }
    Ok(())
}

async fn long_greet(
    _context: CallContext,
    mut requests: MessageReceiver<Value>,
) -> Result<Value, Status> {
    info!("received LongGreet call");

    let mut result = String::from("Hello ");
    while let Some(GreetRequest { greeting }) = requests.recv_json().await? {
        result.push_str(&greeting.full_name());
        result.push_str("! ");
    }

    encode(&GreetResponse { result })
}

async fn greet_everyone(
    _context: CallContext,
    mut requests: MessageReceiver<Value>,
    mut responses: MessageSender<Value>,
) -> Result<(), Status> {
    info!("received GreetEveryone call");

    while let Some(GreetRequest { greeting }) = requests.recv_json().await? {
        responses
            .send_json(&GreetResponse {
                result: format!("Hello {}! ", greeting.full_name()),
            })
            .await?;
    }
    Ok(())
}

async fn greet_with_deadline(
    step: Duration,
    context: CallContext,
    request: Value,
) -> Result<Value, Status> {
    let GreetRequest { greeting } = decode(request)?;
    info!(?greeting, "received GreetWithDeadline call");

    for _ in 0..DEADLINE_STEPS {
        if let Err(err) = context.sleep(step).await {
            warn!(error = %err, "caller gave up on GreetWithDeadline");
            return Err(err.into());
        }
    }

    encode(&GreetResponse {
        result: format!("Hello {}", greeting.full_name()),
    })
}
