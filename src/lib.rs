//! TlsProxy - A small TLS-terminating HTTP reverse proxy
//!
//! Provides:
//! - Self-signed certificate provisioning with no external CA
//! - Forwarding to a single upstream with `X-Forwarded-Proto`/`X-Forwarded-For`
//! - Optional `Host` header override
//! - Prefix mappings sending sub-paths to alternate upstreams (first match wins)

pub mod certificate;
pub mod config;
pub mod error;
pub mod forward;
pub mod mapping;
pub mod router;
pub mod server;

pub use certificate::{generate_self_signed, CertificateMaterial, CertificateOptions};
pub use config::{ProxyConfig, ServerSettings};
pub use error::{CertificateError, ConfigError};
pub use forward::Forwarder;
pub use mapping::{parse_mappings, Mapping};
pub use router::{RequestContext, ReverseProxyRouter, Step};
pub use server::ProxyServer;
