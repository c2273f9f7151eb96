//! The front door: classify the target, fetch (or read the published
//! listing directly for `/registries`), stream the file, or 404. No
//! conditional GET, no range handling, no content negotiation.

use std::sync::Arc;
use std::time::Instant;

use hyper::{Method, StatusCode};
use tracing::info;

use crate::{
    classify::{Resource, classify},
    engine::{Engine, FetchOutcome},
    file_stream::FileStream,
    types::{Request, Response},
};

pub fn error_response(status: StatusCode, message: &str) -> Response {
    hyper::Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(message.to_string().into())
        .expect("status and header are statically valid")
}

fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

/// Handles one inbound request. `engine` is the shared, already-constructed
/// fetch engine; there is no per-request global state to look up.
pub async fn handle(req: Request, engine: Arc<Engine>) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let target = req.uri().path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_default();

    let response = if method != Method::GET {
        error_response(StatusCode::NOT_FOUND, "not found")
    } else {
        serve(&target, &engine).await
    };

    info!(
        method = %method,
        target = %target,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

async fn serve(target: &str, engine: &Engine) -> Response {
    let Some(resource) = classify(target) else {
        return not_found();
    };

    // `/registries` is never fetched through the race engine: the
    // convergence loop is the only writer of that file, via its own
    // un-cached upstream GETs (see registry.rs). The front door just reads
    // whatever was last published, as plain text rather than an opaque blob.
    if matches!(resource, Resource::Registries) {
        return stream_if_present(engine, &resource.id(), "text/plain").await;
    }

    match engine.fetch(&resource.id()).await {
        FetchOutcome::Path(path) => stream_path(&path, "application/octet-stream").await,
        FetchOutcome::Unavailable => not_found(),
    }
}

async fn stream_if_present(engine: &Engine, resource: &str, content_type: &str) -> Response {
    if !engine.cache().exists(resource) {
        return not_found();
    }
    stream_path(&engine.cache().resource_path(resource), content_type).await
}

async fn stream_path(path: &std::path::Path, content_type: &str) -> Response {
    match FileStream::from_path(path).await {
        Ok(stream) => stream.into_response_with_content_type(content_type),
        Err(_) => not_found(),
    }
}
