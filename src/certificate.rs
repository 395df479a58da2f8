//! Self-signed certificate provisioning for TLS termination
//! Generates an RSA key pair and a server certificate valid for a set of host names

use crate::error::CertificateError;
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Smallest RSA modulus accepted for the server key
pub const MIN_RSA_BITS: usize = 2048;

/// Parameters for certificate generation
#[derive(Debug, Clone)]
pub struct CertificateOptions {
    /// Host names and IP literals the certificate is valid for.
    /// An empty list falls back to `localhost` and `127.0.0.1`.
    pub hosts: Vec<String>,
    /// RSA modulus size in bits
    pub rsa_bits: usize,
    /// How far `not_before` is moved into the past to tolerate clock skew
    pub backdate: Duration,
    /// Lifetime in calendar years, counted from `not_before`
    pub validity_years: i32,
    /// Subject organization name
    pub organization: String,
}

impl Default for CertificateOptions {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            rsa_bits: MIN_RSA_BITS,
            backdate: Duration::from_secs(5 * 60),
            validity_years: 1,
            organization: "Example Inc".to_string(),
        }
    }
}

impl CertificateOptions {
    /// Default options for the given hosts
    pub fn with_hosts<S: AsRef<str>>(hosts: &[S]) -> Self {
        Self {
            hosts: hosts.iter().map(|h| h.as_ref().to_string()).collect(),
            ..Self::default()
        }
    }

    fn resolved_hosts(&self) -> Vec<String> {
        if self.hosts.is_empty() {
            default_hosts()
        } else {
            self.hosts.clone()
        }
    }
}

fn default_hosts() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

/// An RSA key pair with its self-signed certificate, held in memory only
pub struct CertificateMaterial {
    cert_der: CertificateDer<'static>,
    cert_pem: String,
    key_der: PrivatePkcs8KeyDer<'static>,
    key_pem: String,
    public_key: Vec<u8>,
    serial: u64,
    common_name: String,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
}

/// Generate a self-signed certificate for `hosts` using default options
pub fn generate_self_signed<S: AsRef<str>>(hosts: &[S]) -> Result<CertificateMaterial, CertificateError> {
    CertificateMaterial::generate(&CertificateOptions::with_hosts(hosts))
}

impl CertificateMaterial {
    /// Generate a fresh key pair and certificate
    pub fn generate(options: &CertificateOptions) -> Result<Self, CertificateError> {
        let hosts = options.resolved_hosts();

        if options.rsa_bits < MIN_RSA_BITS {
            return Err(CertificateError::KeyGeneration(format!(
                "RSA key size {} is below the minimum of {}",
                options.rsa_bits, MIN_RSA_BITS
            )));
        }

        debug!("Generating {}-bit RSA key", options.rsa_bits);
        let private_key = RsaPrivateKey::new(&mut OsRng, options.rsa_bits)
            .map_err(|e| CertificateError::KeyGeneration(e.to_string()))?;
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CertificateError::KeyGeneration(e.to_string()))?;
        let key_pair = KeyPair::from_pem_and_sign_algo(&private_pem, &PKCS_RSA_SHA256)?;

        let serial = random_serial(&mut OsRng)?;
        let (not_before, not_after) = validity_window(
            OffsetDateTime::now_utc(),
            options.backdate,
            options.validity_years,
        )?;
        let (dns_names, ip_addresses) = partition_hosts(&hosts);
        let common_name = hosts[0].clone();

        let mut params = CertificateParams::default();
        params.serial_number = Some(SerialNumber::from(serial));
        params.not_before = not_before;
        params.not_after = not_after;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::OrganizationName, options.organization.clone());
        distinguished_name.push(DnType::CommonName, common_name.clone());
        params.distinguished_name = distinguished_name;

        for name in &dns_names {
            params
                .subject_alt_names
                .push(SanType::DnsName(name.as_str().try_into()?));
        }
        for ip in &ip_addresses {
            params.subject_alt_names.push(SanType::IpAddress(*ip));
        }

        let certificate = params.self_signed(&key_pair)?;
        verify_key_pair(certificate.der(), key_pair.public_key_raw())?;

        info!(
            "Generated self-signed certificate serial={} for: {}",
            serial,
            hosts.join(", ")
        );

        Ok(Self {
            cert_der: certificate.der().clone(),
            cert_pem: certificate.pem(),
            key_der: PrivatePkcs8KeyDer::from(key_pair.serialize_der()),
            key_pem: key_pair.serialize_pem(),
            public_key: key_pair.public_key_raw().to_vec(),
            serial,
            common_name,
            not_before,
            not_after,
            dns_names,
            ip_addresses,
        })
    }

    /// Build a rustls server configuration presenting this certificate
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, CertificateError> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![self.cert_der.clone()],
                PrivateKeyDer::Pkcs8(self.key_der.clone_key()),
            )?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }

    pub fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn private_key_der(&self) -> &PrivatePkcs8KeyDer<'static> {
        &self.key_der
    }

    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Raw subject public key (PKCS#1 `RSAPublicKey`)
    pub fn public_key_raw(&self) -> &[u8] {
        &self.public_key
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    pub fn ip_addresses(&self) -> &[IpAddr] {
        &self.ip_addresses
    }
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("serial", &self.serial)
            .field("common_name", &self.common_name)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("dns_names", &self.dns_names)
            .field("ip_addresses", &self.ip_addresses)
            .finish_non_exhaustive()
    }
}

/// Draw a positive, non-zero 64-bit serial number
fn random_serial<R: RngCore>(rng: &mut R) -> Result<u64, CertificateError> {
    loop {
        let mut bytes = [0u8; 8];
        rng.try_fill_bytes(&mut bytes)
            .map_err(|e| CertificateError::KeyGeneration(format!("random source failed: {}", e)))?;

        // clear the top bit so the serial stays positive as a signed integer
        let serial = u64::from_le_bytes(bytes) & i64::MAX as u64;
        if serial != 0 {
            return Ok(serial);
        }
    }
}

/// Compute `[now - backdate, not_before + years]` at whole-second precision
fn validity_window(
    now: OffsetDateTime,
    backdate: Duration,
    years: i32,
) -> Result<(OffsetDateTime, OffsetDateTime), CertificateError> {
    let not_before = (now - backdate)
        .replace_nanosecond(0)
        .map_err(|e| CertificateError::Validity(e.to_string()))?;

    let year = not_before.year() + years;
    // Feb 29 rolls over to Mar 1 in non-leap years
    let not_after = not_before
        .replace_year(year)
        .or_else(|_| (not_before + time::Duration::DAY).replace_year(year))
        .map_err(|e| CertificateError::Validity(e.to_string()))?;

    Ok((not_before, not_after))
}

/// Check that `cert_der` is self-signed and carries `public_key`
fn verify_key_pair(cert_der: &[u8], public_key: &[u8]) -> Result<(), CertificateError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CertificateError::Verification(e.to_string()))?;

    if cert.public_key().subject_public_key.data.as_ref() != public_key {
        return Err(CertificateError::Verification(
            "certificate public key does not match the private key".to_string(),
        ));
    }

    cert.verify_signature(None)
        .map_err(|e| CertificateError::Verification(e.to_string()))
}

/// Split hosts into DNS names and IP literals, preserving order
fn partition_hosts(hosts: &[String]) -> (Vec<String>, Vec<IpAddr>) {
    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();

    for host in hosts {
        match host.parse::<IpAddr>() {
            Ok(ip) => ip_addresses.push(ip),
            Err(_) => dns_names.push(host.clone()),
        }
    }

    (dns_names, ip_addresses)
}
