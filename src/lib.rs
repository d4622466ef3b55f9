use std::{sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
pub mod record_store;
pub mod rpc;
pub mod services;

use rpc::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub default_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, default_timeout: Option<Duration>) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            default_timeout,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/rpc", get(http::handlers::list_methods))
        .route("/rpc/{service}/{method}", post(http::handlers::rpc_endpoint))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::record_store::InMemoryRecordStore;
    use crate::rpc::ChannelCapacity;
    use crate::services::{build_dispatcher, GreetSettings};

    use super::*;

    fn app_with(default_timeout: Option<Duration>) -> Router {
        let dispatcher = build_dispatcher(
            ChannelCapacity::Bounded(2),
            GreetSettings::default(),
            Arc::new(InMemoryRecordStore::new()),
        )
        .expect("build dispatcher");
        build_app(AppState::new(dispatcher, default_timeout))
    }

    fn app() -> Router {
        app_with(None)
    }

    fn rpc_request(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("request execution");
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let body = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("json body")
        };
        (status, body)
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert_eq!(body, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn method_listing_reports_shapes() {
        let (status, body) = send(
            app(),
            Request::builder()
                .uri("/rpc")
                .method("GET")
                .body(Body::empty())
                .expect("request build"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let methods = body["methods"].as_array().expect("methods array");
        assert_eq!(methods.len(), 15);
        assert!(methods.contains(&json!({
            "method": "calculator.CalculatorService/Sum",
            "shape": "unary"
        })));
        assert!(methods.contains(&json!({
            "method": "greet.GreetService/GreetEveryone",
            "shape": "bidi_stream"
        })));
    }

    #[tokio::test]
    async fn unary_call_returns_single_message() {
        let (status, body) = send(
            app(),
            rpc_request(
                "/rpc/calculator.CalculatorService/Sum",
                r#"{"first_number": 3, "second_number": 10}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "messages": [{ "sum_result": 13 }] }));
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let (status, body) = send(
            app(),
            rpc_request("/rpc/calculator.CalculatorService/Multiply", "{}"),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn invalid_argument_maps_to_bad_request() {
        let (status, body) = send(
            app(),
            rpc_request("/rpc/calculator.CalculatorService/SquareRoot", r#"{"number": -10}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({
                "code": "invalid_argument",
                "message": "received a negative number: -10",
                "details": { "delivered": [] }
            })
        );
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (status, body) = send(
            app(),
            rpc_request("/rpc/calculator.CalculatorService/Sum", "{not json"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn server_stream_collects_every_message() {
        let (status, body) = send(
            app(),
            rpc_request(
                "/rpc/calculator.CalculatorService/PrimeNumberDecomposition",
                r#"{"number": 120}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let factors: Vec<i64> = body["messages"]
            .as_array()
            .expect("messages")
            .iter()
            .filter_map(|message| message["prime_factor"].as_i64())
            .collect();
        assert_eq!(factors, vec![2, 2, 2, 3, 5]);
    }

    #[tokio::test]
    async fn empty_body_means_empty_request() {
        let (status, body) = send(app(), rpc_request("/rpc/blog.BlogService/ListBlog", "")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "messages": [] }));
    }

    #[tokio::test]
    async fn client_stream_takes_an_array() {
        let (status, body) = send(
            app(),
            rpc_request(
                "/rpc/calculator.CalculatorService/ComputeAverage",
                r#"[{"number": 1}, {"number": 2}, {"number": 3}, {"number": 4}]"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "messages": [{ "average": 2.5 }] }));
    }

    #[tokio::test]
    async fn client_stream_rejects_a_single_object() {
        let (status, body) = send(
            app(),
            rpc_request(
                "/rpc/calculator.CalculatorService/ComputeAverage",
                r#"{"number": 1}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn bidi_stream_runs_both_directions() {
        let numbers: Vec<Value> = (0..100).map(|number| json!({ "number": number })).collect();
        let (status, body) = send(
            app(),
            rpc_request(
                "/rpc/calculator.CalculatorService/FindMaximum",
                &Value::Array(numbers).to_string(),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"].as_array().expect("messages").len(), 100);
        assert_eq!(body["messages"][99], json!({ "maximum": 99 }));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_header_sets_the_deadline() {
        let mut request = rpc_request(
            "/rpc/greet.GreetService/GreetWithDeadline",
            r#"{"greeting": {"first_name": "Minh", "last_name": "Tran"}}"#,
        );
        request
            .headers_mut()
            .insert("x-call-timeout-ms", "1000".parse().expect("header"));

        let (status, body) = send(app(), request).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["code"], "deadline_exceeded");
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_applies_without_header() {
        let (status, body) = send(
            app_with(Some(Duration::from_millis(2_500))),
            rpc_request(
                "/rpc/greet.GreetService/GreetManyTimes",
                r#"{"greeting": {"first_name": "Minh", "last_name": "Tran"}}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        let delivered = body["details"]["delivered"].as_array().expect("delivered");
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[2]["result"], "Hello Minh Tran number 2");
    }

    #[tokio::test]
    async fn maximal_timeout_header_is_accepted() {
        let mut request = rpc_request(
            "/rpc/calculator.CalculatorService/Sum",
            r#"{"first_number": 1, "second_number": 2}"#,
        );
        request.headers_mut().insert(
            "x-call-timeout-ms",
            u64::MAX.to_string().parse().expect("header"),
        );

        let (status, body) = send(app(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "messages": [{ "sum_result": 3 }] }));
    }

    #[tokio::test]
    async fn malformed_timeout_header_is_bad_request() {
        let mut request = rpc_request("/rpc/calculator.CalculatorService/Sum", "{}");
        request
            .headers_mut()
            .insert("x-call-timeout-ms", "soon".parse().expect("header"));

        let (status, _) = send(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blog_round_trip_over_http() {
        let app = app();

        let (status, created) = send(
            app.clone(),
            rpc_request(
                "/rpc/blog.BlogService/CreateBlog",
                r#"{"blog": {"author_id": "A", "title": "T", "content": "C"}}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = created["messages"][0]["blog"]["id"]
            .as_str()
            .expect("id")
            .to_string();

        let (status, read) = send(
            app.clone(),
            rpc_request(
                "/rpc/blog.BlogService/ReadBlog",
                &json!({ "blog_id": id }).to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["messages"][0]["blog"]["title"], "T");

        let (status, _) = send(
            app.clone(),
            rpc_request(
                "/rpc/blog.BlogService/DeleteBlog",
                &json!({ "blog_id": id }).to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            app,
            rpc_request(
                "/rpc/blog.BlogService/ReadBlog",
                &json!({ "blog_id": id }).to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }
}
