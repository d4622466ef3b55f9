//! Arithmetic service covering all four call shapes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::Status;
use crate::rpc::{
    decode, encode, CallContext, DispatchError, Dispatcher, Handler, MessageReceiver,
    MessageSender, MethodId,
};

pub const SERVICE: &str = "calculator.CalculatorService";

#[derive(Debug, Deserialize)]
pub struct SumRequest {
    pub first_number: i32,
    pub second_number: i32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SumResponse {
    pub sum_result: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NumberRequest {
    pub number: i32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PrimeFactorResponse {
    pub prime_factor: i32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AverageResponse {
    pub average: f64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct MaximumResponse {
    pub maximum: i32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SquareRootResponse {
    pub number_root: f64,
}

pub fn register(dispatcher: &mut Dispatcher) -> Result<(), DispatchError> {
    dispatcher.register(MethodId::new(SERVICE, "Sum"), Handler::unary(sum))?;
    dispatcher.register(
        MethodId::new(SERVICE, "PrimeNumberDecomposition"),
        Handler::server_stream(prime_number_decomposition),
    )?;
    dispatcher.register(
        MethodId::new(SERVICE, "ComputeAverage"),
        Handler::client_stream(compute_average),
    )?;
    dispatcher.register(
        MethodId::new(SERVICE, "FindMaximum"),
        Handler::bidi_stream(find_maximum),
    )?;
    dispatcher.register(
        MethodId::new(SERVICE, "SquareRoot"),
        Handler::unary(square_root),
    )?;
    Ok(())
}

async fn sum(_context: CallContext, request: Value) -> Result<Value, Status> {
    let request: SumRequest = decode(request)?;
    info!(
        first_number = request.first_number,
        second_number = request.second_number,
        "received Sum call"
    );

    encode(&SumResponse {
        sum_result: i64::from(request.first_number) + i64::from(request.second_number),
    })
}

pub fn prime_factors(mut number: i32) -> Vec<i32> {
    let mut factors = Vec::new();
    let mut divisor = 2;
    while number > 1 {
        if number % divisor == 0 {
            factors.push(divisor);
            number /= divisor;
        } else if divisor > number / divisor {
            // what is left has no divisor below its square root
            factors.push(number);
            break;
        } else {
            divisor += 1;
        }
    }
    factors
}

async fn prime_number_decomposition(
    _context: CallContext,
    request: Value,
    mut responses: MessageSender<Value>,
) -> Result<(), Status> {
    let NumberRequest { number } = decode(request)?;
    info!(number, "received PrimeNumberDecomposition call");

    if number < 1 {
        return Err(Status::invalid_argument(format!(
            "cannot decompose a non-positive number: {number}"
        )));
    }

    for prime_factor in prime_factors(number) {
        responses
            .send_json(&PrimeFactorResponse { prime_factor })
            .await?;
    }
    Ok(())
}

async fn compute_average(
    _context: CallContext,
    mut requests: MessageReceiver<Value>,
) -> Result<Value, Status> {
    info!("received ComputeAverage call");

    let mut sum = 0i64;
    let mut count = 0u32;
    while let Some(NumberRequest { number }) = requests.recv_json().await? {
        sum += i64::from(number);
        count += 1;
    }

    if count == 0 {
        return Err(Status::invalid_argument(
            "cannot average an empty stream of numbers",
        ));
    }

    encode(&AverageResponse {
        average: sum as f64 / f64::from(count),
    })
}

async fn find_maximum(
    _context: CallContext,
    mut requests: MessageReceiver<Value>,
    mut responses: MessageSender<Value>,
) -> Result<(), Status> {
    info!("received FindMaximum call");

    let mut maximum: Option<i32> = None;
    while let Some(NumberRequest { number }) = requests.recv_json().await? {
        if maximum.is_some_and(|current| number <= current) {
            continue;
        }
        maximum = Some(number);
        debug!(maximum = number, "new maximum observed");
        responses
            .send_json(&MaximumResponse { maximum: number })
            .await?;
    }
    Ok(())
}

async fn square_root(_context: CallContext, request: Value) -> Result<Value, Status> {
    let NumberRequest { number } = decode(request)?;
    info!(number, "received SquareRoot call");

    if number < 0 {
        return Err(Status::invalid_argument(format!(
            "received a negative number: {number}"
        )));
    }

    encode(&SquareRootResponse {
        number_root: f64::from(number).sqrt(),
    })
}
