//! Prefix mappings redirecting sub-paths to alternate upstreams

use crate::error::ConfigError;
use hyper::http::uri::{Authority, Scheme};
use url::{Position, Url};

/// Requests whose path starts with `prefix` are sent to `target`'s origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    prefix: String,
    target: Url,
    scheme: Scheme,
    authority: Authority,
}

impl Mapping {
    /// Create a mapping, rejecting an empty prefix or a target without a usable origin
    pub fn new(prefix: impl Into<String>, target: Url) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(ConfigError::InvalidMapping("prefix must not be empty".to_string()));
        }

        let (scheme, authority) = origin_of(&target)
            .map_err(|e| ConfigError::InvalidMapping(format!("{}: {}", prefix, e)))?;

        Ok(Self {
            prefix,
            target,
            scheme,
            authority,
        })
    }

    /// Create a mapping from an unparsed target URL
    pub fn parse(prefix: &str, target: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(target)
            .map_err(|e| ConfigError::InvalidMapping(format!("{}: invalid URL {:?}: {}", prefix, target, e)))?;
        Self::new(prefix, url)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Parse a space separated list of `prefix target` pairs.
///
/// Tokens are split on single spaces; an empty string yields no mappings.
pub fn parse_mappings(raw: &str) -> Result<Vec<Mapping>, ConfigError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let invalid = |reason: String| ConfigError::InvalidMappingList {
        raw: raw.to_string(),
        reason,
    };

    let parts: Vec<&str> = raw.split(' ').collect();
    if parts.len() % 2 != 0 {
        return Err(invalid(format!(
            "need 2 parts for each mapping, got {} tokens",
            parts.len()
        )));
    }

    parts
        .chunks(2)
        .map(|pair| {
            let target = Url::parse(pair[1])
                .map_err(|e| invalid(format!("error parsing url {:?}: {}", pair[1], e)))?;
            Mapping::new(pair[0], target).map_err(|e| invalid(e.to_string()))
        })
        .collect()
}

/// Extract the scheme and `host[:port]` of an http(s) URL
pub(crate) fn origin_of(url: &Url) -> Result<(Scheme, Authority), ConfigError> {
    let scheme = match url.scheme() {
        "http" => Scheme::HTTP,
        "https" => Scheme::HTTPS,
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::MissingHost(url.to_string()));
    }

    let authority = url[Position::BeforeHost..Position::AfterPort]
        .parse::<Authority>()
        .map_err(|_| ConfigError::MissingHost(url.to_string()))?;

    Ok((scheme, authority))
}
