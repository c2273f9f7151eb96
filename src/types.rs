//! Core type aliases shared across the HTTP-facing modules.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;

use crate::body::ProxyBody;

/// Inbound request with Hyper's streaming incoming body. Requests here never
/// carry a body worth reading (everything servable is a GET), but the type
/// keeps the front door composable with hyper's service traits.
pub type Request = hyper::Request<Incoming>;

/// Outbound response using [`ProxyBody`].
pub type Response = hyper::Response<ProxyBody>;

pub(crate) type BoxBody = UnsyncBoxBody<Bytes, BoxError>;
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;
