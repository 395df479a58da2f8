//! Request transformation pipeline applied before a request is forwarded upstream
//!
//! Each inbound request passes through a fixed sequence of steps:
//! log the original request, set `X-Forwarded-Proto`, apply the host override,
//! rewrite onto the upstream base URL, then redirect mapped prefixes to their
//! alternate upstream. Steps never fail; invalid configuration is rejected
//! when the router is built.

use crate::config::ProxyConfig;
use crate::error::ConfigError;
use crate::mapping::Mapping;
use hyper::header::{HeaderValue, HOST};
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::{Request, Uri};
use percent_encoding::percent_decode_str;
use std::net::SocketAddr;
use tracing::{info, warn};

pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Connection-level facts about an inbound request
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub remote_addr: SocketAddr,
    pub is_tls: bool,
}

impl RequestContext {
    pub fn new(remote_addr: SocketAddr, is_tls: bool) -> Self {
        Self { remote_addr, is_tls }
    }

    pub fn protocol(&self) -> &'static str {
        if self.is_tls {
            "https"
        } else {
            "http"
        }
    }
}

/// One transformation applied to the outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    LogRequest,
    ForwardedProto,
    HostOverride,
    BaseRewrite,
    PrefixRemap,
}

impl Step {
    /// Order in which [`ReverseProxyRouter::route`] applies the steps
    pub const PIPELINE: [Step; 5] = [
        Step::LogRequest,
        Step::ForwardedProto,
        Step::HostOverride,
        Step::BaseRewrite,
        Step::PrefixRemap,
    ];
}

/// Rewrites inbound requests onto the configured upstream
#[derive(Debug, Clone)]
pub struct ReverseProxyRouter {
    config: ProxyConfig,
}

impl ReverseProxyRouter {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Map requests starting with `prefix` to the origin of `target`.
    /// Mappings are checked in the order they were added.
    pub fn add_mapping(&mut self, prefix: &str, target: &str) -> Result<(), ConfigError> {
        let mapping = Mapping::parse(prefix, target)?;
        self.config.push_mapping(mapping);
        Ok(())
    }

    /// Transform `req` in place into the request sent upstream
    pub fn route<B>(&self, req: &mut Request<B>, ctx: &RequestContext) {
        for step in Step::PIPELINE {
            self.apply(step, req, ctx);
        }
    }

    /// Apply a single pipeline step
    pub fn apply<B>(&self, step: Step, req: &mut Request<B>, ctx: &RequestContext) {
        match step {
            Step::LogRequest => Self::log_request(req, ctx),
            Step::ForwardedProto => Self::set_forwarded_proto(req, ctx),
            Step::HostOverride => self.override_host(req),
            Step::BaseRewrite => self.rewrite_base(req),
            Step::PrefixRemap => self.remap_prefix(req),
        }
    }

    fn log_request<B>(req: &Request<B>, ctx: &RequestContext) {
        let path_and_query = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
        info!(
            "{} {}://{}{} {}",
            req.method(),
            ctx.protocol(),
            inbound_host(req),
            path_and_query,
            ctx.remote_addr
        );
    }

    fn set_forwarded_proto<B>(req: &mut Request<B>, ctx: &RequestContext) {
        req.headers_mut()
            .insert(X_FORWARDED_PROTO, HeaderValue::from_static(ctx.protocol()));
    }

    fn override_host<B>(&self, req: &mut Request<B>) {
        if let Some(host) = self.config.host_override() {
            req.headers_mut().insert(HOST, host.clone());
        }
    }

    fn rewrite_base<B>(&self, req: &mut Request<B>) {
        let upstream = self.config.upstream();
        let path = single_joining_slash(upstream.path(), req.uri().path());
        let query = join_query(upstream.query().unwrap_or(""), req.uri().query().unwrap_or(""));

        let path_and_query = if query.is_empty() {
            path
        } else {
            format!("{}?{}", path, query)
        };

        let path_and_query = match path_and_query.parse::<PathAndQuery>() {
            Ok(pq) => pq,
            Err(e) => {
                warn!("Cannot rewrite path {:?}: {}", path_and_query, e);
                return;
            }
        };

        set_origin(
            req,
            self.config.upstream_scheme(),
            self.config.upstream_authority(),
            Some(path_and_query),
        );
    }

    /// Prefixes are compared with the decoded path; the encoded path is sent upstream unchanged
    fn remap_prefix<B>(&self, req: &mut Request<B>) {
        let mapping = {
            let path = percent_decode_str(req.uri().path()).decode_utf8_lossy();
            self.config.mappings().iter().find(|m| m.matches(&path))
        };
        if let Some(mapping) = mapping {
            set_origin(req, mapping.scheme(), mapping.authority(), None);
        }
    }
}

/// Host the client addressed: the `Host` header, or the authority of an absolute URI
fn inbound_host<B>(req: &Request<B>) -> &str {
    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(Authority::as_str))
        .unwrap_or("")
}

/// Replace scheme and authority, and optionally the path and query, of the request URI
fn set_origin<B>(
    req: &mut Request<B>,
    scheme: &Scheme,
    authority: &Authority,
    path_and_query: Option<PathAndQuery>,
) {
    let mut parts = req.uri().clone().into_parts();
    parts.scheme = Some(scheme.clone());
    parts.authority = Some(authority.clone());
    if path_and_query.is_some() {
        parts.path_and_query = path_and_query;
    }
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }

    match Uri::from_parts(parts) {
        Ok(uri) => *req.uri_mut() = uri,
        Err(e) => warn!("Cannot rewrite URI {}: {}", req.uri(), e),
    }
}

/// Join two path segments with exactly one slash between them
fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}

fn join_query(target: &str, inbound: &str) -> String {
    if target.is_empty() || inbound.is_empty() {
        format!("{}{}", target, inbound)
    } else {
        format!("{}&{}", target, inbound)
    }
}
