//! Streams a cached file's bytes into an HTTP response without reading the
//! whole thing into memory. No conditional GET, no range handling, no
//! content negotiation — the front door either has the complete file or it
//! doesn't.

use std::path::Path;

use anyhow::Result;
use bytes::Bytes;
use futures_util::{TryStream, TryStreamExt};
use hyper::body::Frame;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::{
    body::ProxyBody,
    types::{BoxError, Response},
};

/// A byte stream paired with the content length known from a filesystem
/// stat, so `Content-Length` can be set without buffering.
pub struct FileStream<S> {
    pub stream: S,
    pub content_size: Option<u64>,
}

impl<S> FileStream<S>
where
    S: TryStream + Send + 'static,
    S::Ok: Into<Bytes>,
    S::Error: Into<BoxError>,
{
    pub fn new(stream: S, content_size: Option<u64>) -> Self {
        Self { stream, content_size }
    }

    pub async fn from_path<P>(path: P) -> Result<FileStream<ReaderStream<File>>>
    where
        P: AsRef<Path>,
    {
        let file = File::open(&path).await?;
        let content_size = file.metadata().await.ok().map(|m| m.len());
        Ok(FileStream { stream: ReaderStream::new(file), content_size })
    }

    /// Streams with `Content-Type: application/octet-stream`, the right
    /// default for content-addressed blob paths (packages, artifacts,
    /// per-registry snapshots).
    pub fn into_response(self) -> Response {
        self.into_response_with_content_type("application/octet-stream")
    }

    /// Streams with an explicit `Content-Type`, e.g. `text/plain` for the
    /// `/registries` listing.
    pub fn into_response_with_content_type(self, content_type: &str) -> Response {
        let mut response = hyper::Response::builder()
            .status(hyper::StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, content_type);

        if let Some(size) = self.content_size {
            response = response.header(hyper::header::CONTENT_LENGTH, size.to_string());
        }

        let body = ProxyBody::from_try_stream(
            self.stream.map_ok(|chunk| Frame::data(Into::<Bytes>::into(chunk))).map_err(Into::into),
        );

        response.body(body).unwrap_or_else(|e| {
            crate::front_door::error_response(
                hyper::StatusCode::INTERNAL_SERVER_ERROR,
                &format!("file stream error: {e}"),
            )
        })
    }
}
