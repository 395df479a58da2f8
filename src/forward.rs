//! Upstream transport
//! Sends an already routed request to its upstream and relays the response

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use hyper::{Request, Response};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers that apply to a single connection and must not be forwarded
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP(S) client for upstream requests
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Create a forwarder. With `disable_certificate_validation` any upstream
    /// certificate is accepted.
    pub fn new(disable_certificate_validation: bool) -> Result<Self> {
        if disable_certificate_validation {
            warn!("Upstream certificate validation is DISABLED");
        }

        // reqwest adds `accept: */*` when the client sent no Accept header.
        // Client headers otherwise pass through unchanged.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(disable_certificate_validation)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self { client })
    }

    /// Forward `req`, whose URI must already be absolute
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        remote_addr: SocketAddr,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>>
    where
        B: Body,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let (mut parts, body) = req.into_parts();

        let body_bytes = body
            .collect()
            .await
            .context("Failed to read request body")?
            .to_bytes();

        strip_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, remote_addr.ip());

        debug!("Proxying to: {}", parts.uri);

        let response = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body_bytes)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", parts.uri))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let body_bytes = response
            .bytes()
            .await
            .context("Failed to read response body")?;

        let mut proxied = Response::new(full_body(body_bytes));
        *proxied.status_mut() = status;
        *proxied.headers_mut() = headers;

        Ok(proxied)
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Append the client address to `X-Forwarded-For`, keeping earlier hops
fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

pub(crate) fn full_body(bytes: Bytes) -> BoxBody<Bytes, hyper::Error> {
    Full::new(bytes)
        .map_err(|never| match never {})
        .boxed()
}
