//! HTTP front door
//!
//! Every request passes the orchestrator's gate: while a reload is in flight
//! it is answered with a retryable 503, admin endpoints included.

pub mod admin;

use anyhow::Result;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::module::dispatch::text_response;
use crate::module::reload::ReloadOrchestrator;

pub use admin::{is_admin_path, ADMIN_PREFIX};

/// Route a buffered request through the reload gate
pub async fn route(orchestrator: &ReloadOrchestrator, request: Request<Bytes>) -> Response<Bytes> {
    if orchestrator.is_reloading() {
        return orchestrator.unavailable();
    }
    if is_admin_path(request.uri().path()) {
        admin::handle(orchestrator, request).await
    } else {
        orchestrator.handle(request).await
    }
}

pub struct ModuleServer {
    addr: SocketAddr,
    orchestrator: Arc<ReloadOrchestrator>,
}

impl ModuleServer {
    pub fn new(addr: SocketAddr, orchestrator: Arc<ReloadOrchestrator>) -> Self {
        Self { addr, orchestrator }
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Module server listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Module server stopping");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        tokio::spawn(Self::handle_connection(
                            stream,
                            addr,
                            self.orchestrator.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        orchestrator: Arc<ReloadOrchestrator>,
    ) {
        let service = service_fn(move |request: Request<Incoming>| {
            let orchestrator = orchestrator.clone();
            async move {
                let (parts, body) = request.into_parts();
                let response = match body.collect().await {
                    Ok(collected) => {
                        route(&orchestrator, Request::from_parts(parts, collected.to_bytes())).await
                    }
                    Err(e) => {
                        debug!("Failed to read request body: {}", e);
                        text_response(StatusCode::BAD_REQUEST, "unreadable request body")
                    }
                };
                Ok::<_, Infallible>(response.map(Full::new))
            }
        });

        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            debug!("Connection from {} ended: {}", addr, e);
        }
    }
}
