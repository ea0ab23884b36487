//! In-process identity and inference stubs for unit tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::token::Clock;

pub enum ExchangeBehavior {
    Token(&'static str),
    Status(StatusCode),
}

pub enum InferenceBehavior {
    Envelope(Value),
    Status(StatusCode),
    RawBody(&'static str),
}

#[derive(Clone, Default)]
struct Recorded {
    exchange_calls: Arc<AtomicUsize>,
    inference_calls: Arc<AtomicUsize>,
    exchange_bodies: Arc<Mutex<Vec<Value>>>,
    inference_bodies: Arc<Mutex<Vec<Value>>>,
    authorizations: Arc<Mutex<Vec<String>>>,
}

pub struct StubServer {
    base_url: String,
    recorded: Recorded,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub async fn spawn(exchange: ExchangeBehavior, inference: InferenceBehavior) -> Self {
        let recorded = Recorded::default();
        let exchange = Arc::new(exchange);
        let inference = Arc::new(inference);

        let exchange_recorded = recorded.clone();
        let inference_recorded = recorded.clone();
        let app = Router::new()
            .route(
                "/auth",
                post(move |Json(body): Json<Value>| {
                    let recorded = exchange_recorded.clone();
                    let exchange = exchange.clone();
                    async move {
                        recorded.exchange_calls.fetch_add(1, Ordering::SeqCst);
                        recorded
                            .exchange_bodies
                            .lock()
                            .expect("exchange bodies lock")
                            .push(body);
                        exchange_response(&exchange)
                    }
                }),
            )
            .route(
                "/ask",
                post(move |headers: HeaderMap, Json(body): Json<Value>| {
                    let recorded = inference_recorded.clone();
                    let inference = inference.clone();
                    async move {
                        recorded.inference_calls.fetch_add(1, Ordering::SeqCst);
                        let authorization = headers
                            .get(AUTHORIZATION)
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        recorded
                            .authorizations
                            .lock()
                            .expect("authorizations lock")
                            .push(authorization);
                        recorded
                            .inference_bodies
                            .lock()
                            .expect("inference bodies lock")
                            .push(body);
                        inference_response(&inference)
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub listener addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            recorded,
            handle,
        }
    }

    pub fn auth_url(&self) -> String {
        format!("{}/auth", self.base_url)
    }

    pub fn ask_url(&self) -> String {
        format!("{}/ask", self.base_url)
    }

    pub fn exchange_calls(&self) -> usize {
        self.recorded.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn inference_calls(&self) -> usize {
        self.recorded.inference_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_bodies(&self) -> Vec<Value> {
        self.recorded
            .exchange_bodies
            .lock()
            .expect("exchange bodies lock")
            .clone()
    }

    pub fn inference_bodies(&self) -> Vec<Value> {
        self.recorded
            .inference_bodies
            .lock()
            .expect("inference bodies lock")
            .clone()
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.recorded
            .authorizations
            .lock()
            .expect("authorizations lock")
            .clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn exchange_response(behavior: &ExchangeBehavior) -> Response {
    match behavior {
        ExchangeBehavior::Token(token) => Json(json!({ "idToken": token })).into_response(),
        ExchangeBehavior::Status(status) => (*status, "exchange rejected").into_response(),
    }
}

fn inference_response(behavior: &InferenceBehavior) -> Response {
    match behavior {
        InferenceBehavior::Envelope(envelope) => Json(envelope.clone()).into_response(),
        InferenceBehavior::Status(status) => (*status, "inference failed").into_response(),
        InferenceBehavior::RawBody(body) => {
            (StatusCode::OK, [(CONTENT_TYPE, "application/json")], *body).into_response()
        }
    }
}

pub fn sample_envelope() -> Value {
    json!({
        "response": "Plants use sunlight to turn water and carbon dioxide into food.",
        "conversation_id": "student-123-1700000000",
        "metadata": {
            "role": "student",
            "age": "teen",
            "industry": "education",
            "device": "desktop",
            "guardrail_applied": true,
            "guardrail_config": "teen-education"
        }
    })
}

pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_epoch_seconds: u64) -> Self {
        Self {
            now: AtomicU64::new(start_epoch_seconds),
        }
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
