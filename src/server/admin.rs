//! Operator endpoints under `/_modules`
//!
//! Install, enable and mode changes only touch the registry or the mode
//! selector; they take effect through a scheduled reload.

use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::module::dispatch::text_response;
use crate::module::loader::LoaderMode;
use crate::module::reload::ReloadOrchestrator;
use crate::module::traits::{Coordinate, ModuleError};

pub const ADMIN_PREFIX: &str = "/_modules";

pub fn is_admin_path(path: &str) -> bool {
    path == ADMIN_PREFIX
        || path
            .strip_prefix(ADMIN_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Percent-decoded query parameters; a repeated key keeps its last value
fn query_params(request: &Request<Bytes>) -> HashMap<String, String> {
    let query = request.uri().query().unwrap_or_default();
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Bytes> {
    let mut response = text_response(status, body.to_string());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(error: &ModuleError) -> Response<Bytes> {
    let status = match error {
        ModuleError::ModuleNotFound(_) => StatusCode::NOT_FOUND,
        ModuleError::InvalidCoordinate(_) | ModuleError::InvalidDescriptor(_) => {
            StatusCode::BAD_REQUEST
        }
        ModuleError::ResolutionFailed(_) | ModuleError::ArtifactNotFound(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_response(status, json!({ "error": error.to_string() }))
}

fn millis(params: &HashMap<String, String>, key: &str) -> Result<Option<Duration>, ModuleError> {
    params
        .get(key)
        .map(|v| {
            v.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| {
                    ModuleError::InvalidDescriptor(format!("{} must be milliseconds", key))
                })
        })
        .transpose()
}

fn coordinate(params: &HashMap<String, String>) -> Result<Coordinate, ModuleError> {
    params
        .get("coordinate")
        .ok_or_else(|| ModuleError::InvalidCoordinate("missing coordinate parameter".to_string()))?
        .parse()
}

fn accepted(orchestrator: &ReloadOrchestrator, delay: Duration, wait: Duration) -> Response<Bytes> {
    orchestrator.schedule_reload(delay, wait);
    json_response(
        StatusCode::ACCEPTED,
        json!({
            "reload_in_ms": delay.as_millis() as u64,
            "wait_ms": orchestrator.config().bounded_wait(wait).as_millis() as u64,
        }),
    )
}

/// Serve one admin request
pub async fn handle(orchestrator: &ReloadOrchestrator, request: Request<Bytes>) -> Response<Bytes> {
    execute(orchestrator, &request).await.unwrap_or_else(|e| {
        warn!("Admin request failed: {}", e);
        error_response(&e)
    })
}

async fn execute(
    orchestrator: &ReloadOrchestrator,
    request: &Request<Bytes>,
) -> Result<Response<Bytes>, ModuleError> {
    let params = query_params(request);
    let route = request
        .uri()
        .path()
        .trim_start_matches(ADMIN_PREFIX)
        .trim_end_matches('/')
        .to_string();
    let config = orchestrator.config();

    match (request.method(), route.as_str()) {
        (&Method::GET, "") => {
            let status = orchestrator.status().await;
            Ok(json_response(StatusCode::OK, serde_json::to_value(status)?))
        }
        (&Method::POST, "/reload") => {
            let delay = millis(&params, "delay_ms")?.unwrap_or_else(|| config.default_delay());
            let wait = millis(&params, "wait_ms")?.unwrap_or_else(|| config.default_wait());
            info!("Reload requested by operator");
            Ok(accepted(orchestrator, delay, wait))
        }
        (&Method::POST, "/install") => {
            let coordinate = coordinate(&params)?;
            let descriptor = orchestrator.registry().declare(&coordinate).await?;
            info!(
                "Declared module {} ({})",
                coordinate,
                if descriptor.is_pending() { "pending" } else { "resolved" }
            );
            Ok(accepted(orchestrator, config.default_delay(), config.default_wait()))
        }
        (&Method::POST, "/load") => {
            let coordinate = coordinate(&params)?;
            let enabled = match params.get("enabled").map(String::as_str) {
                None | Some("true") | Some("1") => true,
                Some("false") | Some("0") => false,
                Some(other) => {
                    return Err(ModuleError::InvalidDescriptor(format!(
                        "enabled must be true or false, got '{}'",
                        other
                    )))
                }
            };
            orchestrator
                .registry()
                .set_should_load(&coordinate, enabled)
                .await?;
            Ok(accepted(orchestrator, config.default_delay(), config.default_wait()))
        }
        (&Method::POST, "/remove") => {
            let coordinate = coordinate(&params)?;
            orchestrator.registry().remove(&coordinate).await?;
            Ok(accepted(orchestrator, config.default_delay(), config.default_wait()))
        }
        (&Method::POST, "/mode") => {
            let mode = match params.get("value") {
                Some(value) => value.parse::<LoaderMode>()?,
                None => LoaderMode::default(),
            };
            orchestrator.set_mode(mode);
            Ok(accepted(orchestrator, config.default_delay(), config.default_wait()))
        }
        (_, "" | "/reload" | "/install" | "/load" | "/remove" | "/mode") => Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed",
        )),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "unknown admin endpoint")),
    }
}
