//! HTTP surface for readers and operators
//!
//! Readers get the latest status, preview and metrics without touching the
//! pipeline. Operator edits are turned into `ZoneCommand`s and queued with
//! `try_send`; a full queue answers 503 instead of blocking the connection.

use crate::domain::types::{Point, Zone};
use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::engine::ZoneCommand;
use crate::services::status::StatusPublisher;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared state for every connection
pub struct HttpState {
    publisher: Arc<StatusPublisher>,
    metrics: Arc<Metrics>,
    commands: mpsc::Sender<ZoneCommand>,
    site_id: String,
    preview_content_type: String,
}

impl HttpState {
    pub fn new(
        publisher: Arc<StatusPublisher>,
        metrics: Arc<Metrics>,
        commands: mpsc::Sender<ZoneCommand>,
        site_id: String,
        preview_content_type: String,
    ) -> Self {
        Self { publisher, metrics, commands, site_id, preview_content_type }
    }
}

#[derive(Deserialize)]
struct AnyClassBody {
    enabled: bool,
}

/// Map an operator route and body to a command
///
/// Returns `None` when the route is not an operator edit.
fn command_for(method: &Method, path: &str, body: &[u8]) -> Option<Result<ZoneCommand, serde_json::Error>> {
    let command = match (method, path) {
        (&Method::PUT, "/zones") => serde_json::from_slice::<Vec<Zone>>(body).map(ZoneCommand::Replace),
        (&Method::POST, "/zones") => serde_json::from_slice::<Zone>(body).map(ZoneCommand::Append),
        (&Method::DELETE, "/zones") => Ok(ZoneCommand::RemoveAll),
        (&Method::POST, "/zones/point") => serde_json::from_slice::<Point>(body).map(ZoneCommand::AddPoint),
        (&Method::POST, "/zones/clear-draft") => Ok(ZoneCommand::ClearDraft),
        (&Method::POST, "/zones/remove-last") => Ok(ZoneCommand::RemoveLast),
        (&Method::POST, "/mode/any-class") => {
            serde_json::from_slice::<AnyClassBody>(body).map(|b| ZoneCommand::SetAnyClass(b.enabled))
        }
        _ => return None,
    };
    Some(command)
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(body.into()))
        .expect("static response should not fail")
}

fn json_error(status: StatusCode, error: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "ok": false, "error": error }).to_string();
    respond(status, "application/json", body)
}

/// Handle one HTTP request
pub async fn handle_request<B>(req: Request<B>, state: Arc<HttpState>) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::GET, "/status") => {
            let snapshot = state.publisher.read();
            match serde_json::to_vec(&*snapshot) {
                Ok(body) => Ok(respond(StatusCode::OK, "application/json", body)),
                Err(e) => {
                    error!(error = %e, "status_serialize_error");
                    Ok(json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialize"))
                }
            }
        }
        (&Method::GET, "/preview") => match state.publisher.read_preview() {
            Some(bytes) => Ok(respond(StatusCode::OK, &state.preview_content_type, bytes)),
            None => Ok(respond(StatusCode::NOT_FOUND, "text/plain", "no preview")),
        },
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&state.metrics, &state.site_id);
            Ok(respond(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body))
        }
        (&Method::GET, "/health") => Ok(respond(StatusCode::OK, "text/plain", "ok")),
        (&Method::OPTIONS, _) => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail")),
        _ => {
            let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(path = %path, error = %e, "http_body_rejected");
                    return Ok(json_error(StatusCode::BAD_REQUEST, "body"));
                }
            };

            match command_for(&method, &path, &body) {
                Some(Ok(command)) => Ok(enqueue(&state, command)),
                Some(Err(e)) => {
                    debug!(path = %path, error = %e, "http_command_malformed");
                    Ok(json_error(StatusCode::BAD_REQUEST, &e.to_string()))
                }
                None => Ok(respond(StatusCode::NOT_FOUND, "text/plain", "Not Found")),
            }
        }
    }
}

fn enqueue(state: &HttpState, command: ZoneCommand) -> Response<Full<Bytes>> {
    let kind = command.as_str();
    match state.commands.try_send(command) {
        Ok(()) => {
            debug!(command = %kind, "zone_command_queued");
            respond(StatusCode::ACCEPTED, "application/json", r#"{"ok":true}"#)
        }
        Err(TrySendError::Full(_)) => {
            state.metrics.record_zone_command_dropped();
            warn!(command = %kind, "zone_command_dropped: queue full");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_full")
        }
        Err(TrySendError::Closed(_)) => json_error(StatusCode::SERVICE_UNAVAILABLE, "pipeline_stopped"),
    }
}

/// Start the HTTP server
pub async fn start_http_server(
    port: u16,
    state: Arc<HttpState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, state.clone()));

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
