use crate::config::GatewayConfig;
use crate::proxy::context::BoxBody;
use anyhow::{Context, Result};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Pooled client used to forward requests to route destinations.
/// `http://` and `https://` destinations are both supported.
pub type ProxyClient = Client<HttpsConnector<HttpConnector>, BoxBody>;

/// A rustls `ServerCertVerifier` that accepts any certificate.
/// Only installed when `outbound.tls_verify` is false.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// The one place outbound behavior is decided: deadline, certificate
/// verification and pooling for auth calls, health probes and forwarding.
#[derive(Debug, Clone)]
pub struct OutboundPolicy {
    /// `None` lets a call run until the peer answers or the connection fails.
    pub timeout: Option<Duration>,
    pub tls_verify: bool,
    pub idle_timeout: Duration,
}

impl Default for OutboundPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            tls_verify: true,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl OutboundPolicy {
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            timeout: cfg.outbound_timeout()?,
            tls_verify: cfg.outbound.tls_verify,
            idle_timeout: cfg.idle_timeout(),
        })
    }

    /// Client for delegated auth and health probes.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .no_proxy()
            .pool_idle_timeout(self.idle_timeout)
            .danger_accept_invalid_certs(!self.tls_verify);
        if let Some(t) = self.timeout {
            builder = builder.timeout(t);
        }
        builder.build().context("failed to build outbound http client")
    }

    /// Pooled client for forwarding to destinations.
    pub fn proxy_client(&self) -> ProxyClient {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.set_keepalive(Some(self.idle_timeout));
        http.set_connect_timeout(self.timeout);
        http.enforce_http(false);

        let https = if self.tls_verify {
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_webpki_roots()
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .wrap_connector(http)
        } else {
            let tls_config = rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth();

            hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(tls_config)
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .wrap_connector(http)
        };

        Client::builder(TokioExecutor::new())
            .pool_idle_timeout(self.idle_timeout)
            .build(https)
    }

    /// Run `fut` under the configured deadline. `None` means it expired.
    pub async fn bounded<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.timeout {
            Some(t) => tokio::time::timeout(t, fut).await.ok(),
            None => Some(fut.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn from_config_reads_outbound_section() {
        let mut cfg = GatewayConfig::default();
        cfg.outbound.timeout = Some("250ms".to_string());
        cfg.outbound.tls_verify = false;
        cfg.idle_timeout = 5;

        let policy = assert_ok!(OutboundPolicy::from_config(&cfg));
        assert_eq!(policy.timeout, Some(Duration::from_millis(250)));
        assert!(!policy.tls_verify);
        assert_eq!(policy.idle_timeout, Duration::from_secs(5));
    }

    #[test]
    fn from_config_rejects_bad_timeout() {
        let mut cfg = GatewayConfig::default();
        cfg.outbound.timeout = Some("whenever".to_string());
        assert_err!(OutboundPolicy::from_config(&cfg));
    }

    #[tokio::test]
    async fn bounded_without_deadline_waits() {
        let policy = OutboundPolicy::default();
        let out = policy
            .bounded(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                7
            })
            .await;
        assert_eq!(out, Some(7));
    }

    #[tokio::test]
    async fn bounded_expires() {
        let policy = OutboundPolicy {
            timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let out = policy
            .bounded(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn clients_build_with_and_without_verification() {
        for tls_verify in [true, false] {
            let policy = OutboundPolicy {
                tls_verify,
                ..Default::default()
            };
            assert_ok!(policy.http_client());
            let _client = policy.proxy_client();
        }
    }
}
