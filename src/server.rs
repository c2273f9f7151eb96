//! HTTP server loop: accepts connections and dispatches each request straight
//! into the front door. There is no router — the front door is the only
//! handler, so there's nothing to dispatch between.

use std::convert::Infallible;
use std::sync::Arc;

use hyper::{Request, server::conn::http1, service::service_fn};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::engine::Engine;
use crate::front_door;
use crate::types::BoxError;

/// Runs the accept loop until the listener errors. Each connection is served
/// on its own task; a per-connection error is logged and only drops that
/// connection, not the whole server.
pub async fn serve(listener: TcpListener, engine: Arc<Engine>) -> Result<(), BoxError> {
    info!(addr = %listener.local_addr()?, "pantry listening");

    loop {
        let (stream, _addr) = listener.accept().await?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let engine = engine.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req: Request<_>| {
                let engine = engine.clone();
                async move { Ok::<_, Infallible>(front_door::handle(req, engine).await) }
            });

            let mut http = http1::Builder::new();
            http.keep_alive(true);
            let conn = http.serve_connection(io, svc);

            if let Err(err) = conn.await {
                error!(error = %err, "connection error");
            }
        });
    }
}
