//! HTTPS front end
//! Terminates TLS with the provisioned certificate and proxies every request upstream

use crate::certificate::CertificateMaterial;
use crate::config::ServerSettings;
use crate::forward::{full_body, Forwarder};
use crate::router::{RequestContext, ReverseProxyRouter};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// TLS-terminating reverse proxy server
pub struct ProxyServer {
    settings: ServerSettings,
    router: ReverseProxyRouter,
    forwarder: Forwarder,
    acceptor: TlsAcceptor,
}

impl ProxyServer {
    /// Create a new proxy server presenting `certificate` to clients
    pub fn new(
        settings: ServerSettings,
        router: ReverseProxyRouter,
        certificate: &CertificateMaterial,
    ) -> Result<Self> {
        let tls_config = certificate
            .server_config()
            .context("Failed to build TLS configuration")?;
        let forwarder = Forwarder::new(settings.disable_certificate_validation)?;

        Ok(Self {
            settings,
            router,
            forwarder,
            acceptor: TlsAcceptor::from(tls_config),
        })
    }

    /// Bind the configured address and serve until an accept error occurs
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.settings.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.settings.listen_addr))?;

        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("HTTPS server listening on {}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = self.clone();

            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, remote_addr).await {
                    debug!("HTTPS connection error from {}: {:#}", remote_addr, e);
                }
            });
        }
    }

    /// Handle a single TLS connection
    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Result<()> {
        let tls_stream = self
            .acceptor
            .accept(stream)
            .await
            .context("TLS handshake failed")?;
        let io = TokioIo::new(tls_stream);

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(false)
            .serve_connection(
                io,
                service_fn(move |req| {
                    let server = self.clone();
                    async move { server.handle_request(req, remote_addr).await }
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTP service error: {}", e))
    }

    /// Route and forward one request; upstream failures become 502 responses
    async fn handle_request(
        &self,
        mut req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
        let ctx = RequestContext::new(remote_addr, true);
        self.router.route(&mut req, &ctx);

        match self.forwarder.forward(req, remote_addr).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!("Proxy error: {:#}", e);
                Ok(error_response(StatusCode::BAD_GATEWAY, "Bad Gateway"))
            }
        }
    }
}

/// Create error response
fn error_response(status: StatusCode, message: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full_body(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
