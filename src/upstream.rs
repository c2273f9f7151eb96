//! The upstream client: a single concrete HTTP interaction (HEAD a resource,
//! GET a resource to a file) abstracted behind a `StorageServer` capability.
//!
//! Every call is single-shot: a fresh TCP connection per request rather than
//! a persistent pooled connection, since upstreams here are contacted in
//! short racing bursts rather than sustained traffic. Non-200 and network
//! errors are both ordinary return values — nothing here returns `Result`,
//! per the error-handling design: the only way to learn an upstream call
//! failed is to match on the status it returns.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::{Method, Request, StatusCode, body::Bytes};
use hyper_util::rt::TokioIo;
use tokio::{
    fs::File,
    io::AsyncWriteExt,
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, warn};

/// Result of a HEAD probe. Distinguishes "server answered, resource absent"
/// from "server was unreachable" since the fetch engine treats them the
/// same way today but a future retry policy might not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Found,
    Missing,
    NetworkError,
}

/// Result of a GET-to-file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Complete,
    HttpError(StatusCode),
    NetworkError,
}

/// A storage server capability: probe and download-to-file. Abstracted
/// behind a trait solely so tests can substitute an in-process fake; there
/// is exactly one production implementation.
#[async_trait]
pub trait StorageServer: Send + Sync + std::fmt::Debug {
    fn base_url(&self) -> &str;

    /// `HEAD {base_url}{resource}`. Non-200 is a value, not an error.
    async fn head(&self, resource: &str) -> ProbeStatus;

    /// `GET {base_url}{resource}`, streaming the body into `dest`. `dest`
    /// must not be observed by anyone else until this call returns —
    /// callers own a private temp path.
    async fn get(&self, resource: &str, dest: &Path) -> TransferStatus;

    /// `GET {base_url}{resource}` buffered fully into memory. Used only for
    /// the small `/registries` listing during convergence, which is never
    /// cached.
    async fn get_bytes(&self, resource: &str) -> Option<Vec<u8>>;
}

/// Plain-HTTP storage server reached over TCP, grounded in the same raw
/// hyper client-connection pattern used for outbound requests elsewhere in
/// this stack, but single-shot rather than held open.
#[derive(Debug, Clone)]
pub struct HttpServer {
    base_url: String,
    authority: String,
    head_timeout: Duration,
    get_timeout: Duration,
}

impl HttpServer {
    /// `base_url` must be `host:port` or `http://host:port`; the scheme, if
    /// present, is stripped since connections are always plaintext (TLS is
    /// an external terminator's problem, per scope).
    pub fn new(base_url: impl Into<String>, head_timeout: Duration, get_timeout: Duration) -> Self {
        let base_url = base_url.into();
        let authority = base_url
            .strip_prefix("http://")
            .unwrap_or(&base_url)
            .to_string();
        Self { base_url, authority, head_timeout, get_timeout }
    }

    async fn connect(
        &self,
    ) -> Result<hyper::client::conn::http1::SendRequest<Empty<Bytes>>, ()> {
        let stream = TcpStream::connect(&self.authority).await.map_err(|_| ())?;
        let io = TokioIo::new(stream);
        let (sender, conn) = hyper::client::conn::http1::handshake(io).await.map_err(|_| ())?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!(error = %err, "upstream connection closed with error");
            }
        });
        Ok(sender)
    }

    fn request(&self, method: Method, resource: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .method(method)
            .uri(resource)
            .header(hyper::header::HOST, &self.authority)
            .body(Empty::new())
            .expect("method/uri/header are all statically valid")
    }
}

#[async_trait]
impl StorageServer for HttpServer {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn head(&self, resource: &str) -> ProbeStatus {
        let target = format!("/{resource}");
        let attempt = async {
            let mut sender = self.connect().await.map_err(|_| ())?;
            let resp = sender
                .send_request(self.request(Method::HEAD, &target))
                .await
                .map_err(|_| ())?;
            Ok::<StatusCode, ()>(resp.status())
        };

        match timeout(self.head_timeout, attempt).await {
            Ok(Ok(status)) if status == StatusCode::OK => ProbeStatus::Found,
            Ok(Ok(_)) => ProbeStatus::Missing,
            Ok(Err(())) => ProbeStatus::NetworkError,
            Err(_) => ProbeStatus::NetworkError,
        }
    }

    async fn get(&self, resource: &str, dest: &Path) -> TransferStatus {
        let target = format!("/{resource}");
        let attempt = async {
            let mut sender = self.connect().await.map_err(|_| TransferStatus::NetworkError)?;
            let mut resp = sender
                .send_request(self.request(Method::GET, &target))
                .await
                .map_err(|_| TransferStatus::NetworkError)?;

            if resp.status() != StatusCode::OK {
                return Err(TransferStatus::HttpError(resp.status()));
            }

            let mut file = File::create(dest)
                .await
                .map_err(|_| TransferStatus::NetworkError)?;

            while let Some(frame) = resp.frame().await {
                let frame = frame.map_err(|_| TransferStatus::NetworkError)?;
                if let Some(chunk) = frame.data_ref() {
                    file.write_all(chunk)
                        .await
                        .map_err(|_| TransferStatus::NetworkError)?;
                }
            }
            file.flush().await.map_err(|_| TransferStatus::NetworkError)?;
            Ok::<(), TransferStatus>(())
        };

        match timeout(self.get_timeout, attempt).await {
            Ok(Ok(())) => TransferStatus::Complete,
            Ok(Err(status)) => status,
            Err(_) => {
                warn!(server = %self.base_url, resource, "GET timed out");
                TransferStatus::NetworkError
            }
        }
    }

    async fn get_bytes(&self, resource: &str) -> Option<Vec<u8>> {
        let target = format!("/{resource}");
        let attempt = async {
            let mut sender = self.connect().await.ok()?;
            let resp = sender
                .send_request(self.request(Method::GET, &target))
                .await
                .ok()?;
            if resp.status() != StatusCode::OK {
                return None;
            }
            resp.collect().await.ok().map(|c| c.to_bytes().to_vec())
        };

        match timeout(self.head_timeout, attempt).await {
            Ok(body) => body,
            Err(_) => None,
        }
    }
}
