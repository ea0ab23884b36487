#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::post};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub struct Backend {
    pub base_url: String,
    pub exchange_calls: Arc<AtomicUsize>,
    pub inference_calls: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

impl Backend {
    pub fn exchanges(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn inferences(&self) -> usize {
        self.inference_calls.load(Ordering::SeqCst)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Serves `/auth` and `/ask`. `exchange_status` other than 200 makes the
/// identity service reject every exchange.
pub async fn spawn_backend(exchange_status: StatusCode, inference_status: StatusCode) -> Result<Backend> {
    let exchange_calls = Arc::new(AtomicUsize::new(0));
    let inference_calls = Arc::new(AtomicUsize::new(0));

    let exchanges = exchange_calls.clone();
    let inferences = inference_calls.clone();
    let app = Router::new()
        .route(
            "/auth",
            post(move |Json(body): Json<Value>| {
                let exchanges = exchanges.clone();
                async move {
                    exchanges.fetch_add(1, Ordering::SeqCst);
                    if exchange_status != StatusCode::OK {
                        return (exchange_status, "rejected").into_response();
                    }
                    let username = body["username"].as_str().unwrap_or_default();
                    Json(json!({ "idToken": format!("issued-{username}") })).into_response()
                }
            }),
        )
        .route(
            "/ask",
            post(move |Json(body): Json<Value>| {
                let inferences = inferences.clone();
                async move {
                    inferences.fetch_add(1, Ordering::SeqCst);
                    if inference_status != StatusCode::OK {
                        return (inference_status, "boom").into_response();
                    }
                    Json(json!({
                        "response": format!("echo: {}", body["query"].as_str().unwrap_or_default()),
                        "metadata": {
                            "role": "student",
                            "age": "teen",
                            "industry": "education",
                            "device": "desktop",
                            "guardrail_applied": true
                        }
                    }))
                    .into_response()
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(Backend {
        base_url: format!("http://{addr}"),
        exchange_calls,
        inference_calls,
        handle,
    })
}

pub fn write_config(dir: &Path, backend: Option<&Backend>) -> Result<PathBuf> {
    let contents = match backend {
        Some(backend) => json!({
            "api_endpoint": format!("{}/ask", backend.base_url),
            "auth_endpoint": format!("{}/auth", backend.base_url),
            "identity": { "user_pool_id": "pool-test", "client_id": "client-test" },
            "request_timeout_secs": 5
        }),
        None => json!({}),
    };
    let path = dir.join("config.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&contents)?)?;
    Ok(path)
}

/// Runs the binary with an isolated environment, optionally feeding stdin.
pub async fn run_askgate(config: &Path, args: &[&str], stdin: Option<&str>) -> Result<Output> {
    let bin = env!("CARGO_BIN_EXE_askgate");
    let mut child = Command::new(bin)
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("ASKGATE_CONFIG")
        .env_remove("ASKGATE_API_ENDPOINT")
        .env_remove("ASKGATE_AUTH_ENDPOINT")
        .env("RUST_LOG", "warn")
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        pipe.shutdown().await?;
    }

    Ok(child.wait_with_output().await?)
}
