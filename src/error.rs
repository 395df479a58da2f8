//! Error types raised while configuring the proxy and provisioning its certificate

use thiserror::Error;

/// Startup configuration errors. Always fatal for the command-line entry point.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid upstream URL {url:?}: {source}")]
    InvalidUpstream {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme {0:?}: upstream must be http or https")]
    UnsupportedScheme(String),

    #[error("URL {0:?} has no host")]
    MissingHost(String),

    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("invalid mapping list {raw:?}: {reason}")]
    InvalidMappingList { raw: String, reason: String },

    #[error("invalid host override {0:?}")]
    InvalidHostOverride(String),
}

/// Errors while creating the self-signed certificate
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid validity window: {0}")]
    Validity(String),

    #[error("certificate encoding failed: {0}")]
    Encoding(#[from] rcgen::Error),

    #[error("certificate verification failed: {0}")]
    Verification(String),

    #[error("TLS configuration failed: {0}")]
    Tls(#[from] rustls::Error),
}
