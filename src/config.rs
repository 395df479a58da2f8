//! Proxy and listener configuration

use crate::certificate::CertificateOptions;
use crate::error::ConfigError;
use crate::mapping::{origin_of, Mapping};
use hyper::header::HeaderValue;
use hyper::http::uri::{Authority, Scheme};
use std::net::SocketAddr;
use url::Url;

/// Routing configuration: upstream base URL, optional host override and prefix mappings
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    upstream: Url,
    scheme: Scheme,
    authority: Authority,
    host_override: Option<HeaderValue>,
    mappings: Vec<Mapping>,
}

impl ProxyConfig {
    /// Create a configuration forwarding to `upstream`, which must be an http or https URL
    pub fn new(upstream: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(upstream).map_err(|source| ConfigError::InvalidUpstream {
            url: upstream.to_string(),
            source,
        })?;
        let (scheme, authority) = origin_of(&url)?;

        Ok(Self {
            upstream: url,
            scheme,
            authority,
            host_override: None,
            mappings: Vec::new(),
        })
    }

    /// Send `host` as the upstream `Host` header. An empty string disables the override.
    pub fn with_host_override(mut self, host: &str) -> Result<Self, ConfigError> {
        self.host_override = if host.is_empty() {
            None
        } else {
            Some(
                HeaderValue::from_str(host)
                    .map_err(|_| ConfigError::InvalidHostOverride(host.to_string()))?,
            )
        };
        Ok(self)
    }

    pub fn with_mappings(mut self, mappings: Vec<Mapping>) -> Self {
        self.mappings = mappings;
        self
    }

    /// Append a mapping; insertion order decides which mapping wins
    pub fn push_mapping(&mut self, mapping: Mapping) {
        self.mappings.push(mapping);
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    pub fn upstream_scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn upstream_authority(&self) -> &Authority {
        &self.authority
    }

    pub fn host_override(&self) -> Option<&HeaderValue> {
        self.host_override.as_ref()
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }
}

/// Listener settings for the HTTPS front end
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
    /// Accept any certificate presented by the upstream. Dangerous.
    pub disable_certificate_validation: bool,
    pub certificate: CertificateOptions,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            disable_certificate_validation: false,
            certificate: CertificateOptions::default(),
        }
    }
}
