//! Forwarding to the legacy SOAP service.

use crate::auth::{CertificateResolution, CertificateResolver, ClientCertificate};
use crate::config::LegacyConfig;
use crate::credential::CredentialFile;
use crate::error::GatewayError;
use crate::framing;
use crate::schemas::{filter_headers, SoapRequest, SoapResponse};
use crate::streamer::BodyStream;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use http::{HeaderMap, Method};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on a single legacy call.
pub const PROXY_TIMEOUT: Duration = Duration::from_secs(3600);

/// Hop-by-hop headers never relayed from upstream responses.
pub const RESPONSE_HEADER_DENYLIST: [&str; 3] = ["transfer-encoding", "keep-alive", "connection"];

/// An outgoing legacy call.
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

/// HTTP client seam for the legacy call.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Send the request and collect the whole response.
    ///
    /// `client_cert` is a PEM file holding a private key and certificate.
    async fn send(
        &self,
        request: UpstreamRequest,
        client_cert: Option<&Path>,
        timeout: Duration,
    ) -> Result<SoapResponse, GatewayError>;
}

/// [`UpstreamTransport`] over reqwest with rustls.
///
/// reqwest binds a client identity at build time, so one client is kept per
/// distinct credential (keyed by the SHA-256 of its PEM) and reused, pool
/// included. The set of credentials is bounded by the configured client keys.
pub struct ReqwestTransport {
    client: reqwest::Client,
    identities: Mutex<HashMap<String, reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, GatewayError> {
        let client = Self::builder()
            .build()
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Ok(Self {
            client,
            identities: Mutex::new(HashMap::new()),
        })
    }

    fn builder() -> reqwest::ClientBuilder {
        reqwest::Client::builder().pool_idle_timeout(Duration::from_secs(30))
    }

    /// Number of cached identity clients.
    pub fn cached_identities(&self) -> usize {
        self.identities.lock().map(|m| m.len()).unwrap_or(0)
    }

    async fn client_for(&self, client_cert: Option<&Path>) -> Result<reqwest::Client, GatewayError> {
        let Some(path) = client_cert else {
            return Ok(self.client.clone());
        };
        let pem = tokio::fs::read(path)
            .await
            .map_err(|e| GatewayError::Credential(e.to_string()))?;
        let digest = hex::encode(Sha256::digest(&pem));

        let mut identities = self
            .identities
            .lock()
            .map_err(|_| GatewayError::Credential("identity cache poisoned".to_string()))?;
        if let Some(client) = identities.get(&digest) {
            return Ok(client.clone());
        }
        let identity =
            reqwest::Identity::from_pem(&pem).map_err(|e| GatewayError::Credential(e.to_string()))?;
        let client = Self::builder()
            .identity(identity)
            .build()
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        identities.insert(digest, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(
        &self,
        request: UpstreamRequest,
        client_cert: Option<&Path>,
        timeout: Duration,
    ) -> Result<SoapResponse, GatewayError> {
        let client = self.client_for(client_cert).await?;
        let response = client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(reqwest::Body::wrap_stream(request.body))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = filter_headers(response.headers(), &RESPONSE_HEADER_DENYLIST);

        let mut data = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GatewayError::Upstream(e.to_string()))?;
            data.extend_from_slice(&chunk);
        }

        Ok(SoapResponse::new(data.freeze(), status, headers))
    }
}

/// Legacy response together with the certificate it was sent with.
#[derive(Debug)]
pub struct ProxyResponse {
    pub response: SoapResponse,
    pub certificate: Option<ClientCertificate>,
}

pub struct LegacyProxy {
    config: LegacyConfig,
    transport: Arc<dyn UpstreamTransport>,
    resolver: Arc<CertificateResolver>,
}

impl LegacyProxy {
    pub fn new(
        config: LegacyConfig,
        transport: Arc<dyn UpstreamTransport>,
        resolver: Arc<CertificateResolver>,
    ) -> Self {
        Self {
            config,
            transport,
            resolver,
        }
    }

    pub fn config(&self) -> &LegacyConfig {
        &self.config
    }

    /// Target URL: the override header if present, else the configured base.
    pub fn proxy_url(&self, request: &SoapRequest) -> String {
        let base = request
            .header(&self.config.proxy_header)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.config.base_url);
        join_url(base, &request.full_path)
    }

    /// Forward `request` to the legacy service.
    ///
    /// Returns [`GatewayError::ClientCertificateNotConfigured`] without
    /// calling upstream when a presented certificate has no configured key.
    pub async fn forward(
        &self,
        request: &mut SoapRequest,
        timeout: Duration,
    ) -> Result<ProxyResponse, GatewayError> {
        let resolution = match request.auth.as_deref() {
            Some(raw) if self.resolver.has_client_keys() => Some(self.resolver.resolve(raw).await),
            _ => None,
        };

        let certificate = match resolution {
            None => {
                debug!(api = %request.api, "Calling legacy service without client certificate");
                None
            }
            Some(CertificateResolution::NotConfigured) => {
                info!(api = %request.api, "Client certificate not configured, not forwarding");
                return Err(GatewayError::ClientCertificateNotConfigured);
            }
            Some(CertificateResolution::LookupError(reason)) => {
                info!(
                    api = %request.api,
                    reason = %reason,
                    "Unknown or invalid client certificate, forwarding without it"
                );
                None
            }
            Some(CertificateResolution::Resolved(certificate)) => Some(certificate),
        };

        let upstream = self.build_upstream_request(request)?;
        debug!(url = %upstream.url, "Forwarding SOAP request");

        let response = match &certificate {
            None => self.transport.send(upstream, None, timeout).await?,
            Some(certificate) => {
                let credential = CredentialFile::materialize(
                    &certificate.pem,
                    self.config.credential_dir.as_deref(),
                )?;
                let result = self
                    .transport
                    .send(upstream, Some(credential.path()), timeout)
                    .await;
                if let Err(e) = credential.release() {
                    warn!(error = %e, "Failed to remove client credential file");
                }
                result?
            }
        };

        let response = if self.config.local_mock_framing {
            framing::frame_response(response)
        } else {
            response
        };

        Ok(ProxyResponse {
            response,
            certificate,
        })
    }

    fn build_upstream_request(&self, request: &mut SoapRequest) -> Result<UpstreamRequest, GatewayError> {
        let omit = [
            self.config.proxy_header.as_str(),
            self.config.mtls_header.as_str(),
            "host",
            "transfer-encoding",
            "connection",
            "keep-alive",
        ];
        let headers = filter_headers(&request.headers, &omit);
        let url = self.proxy_url(request);
        let body = request
            .take_body()
            .ok_or_else(|| GatewayError::Upstream("request body already consumed".to_string()))?;
        Ok(UpstreamRequest {
            method: request.method.clone(),
            url,
            headers,
            body,
        })
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{generate_certificate, legacy_record, url_encode};
    use crate::auth::{ClientKeyMap, StaticCertificateStore};
    use crate::schemas::ApiSurface;
    use futures::TryStreamExt;
    use http::HeaderValue;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Recorded {
        url: String,
        headers: HeaderMap,
        body: Vec<u8>,
        cert_path: Option<PathBuf>,
        cert_existed: bool,
    }

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<Recorded>>,
        fail: bool,
    }

    #[async_trait]
    impl UpstreamTransport for RecordingTransport {
        async fn send(
            &self,
            request: UpstreamRequest,
            client_cert: Option<&Path>,
            _timeout: Duration,
        ) -> Result<SoapResponse, GatewayError> {
            let body: Vec<bytes::Bytes> = request.body.try_collect().await?;
            self.calls.lock().unwrap().push(Recorded {
                url: request.url,
                headers: request.headers,
                body: body.concat(),
                cert_path: client_cert.map(Path::to_path_buf),
                cert_existed: client_cert.is_some_and(Path::exists),
            });
            if self.fail {
                return Err(GatewayError::Upstream("connection reset".to_string()));
            }
            Ok(SoapResponse::new("<legacy/>", 200, HeaderMap::new()))
        }
    }

    fn config(dir: &Path) -> LegacyConfig {
        LegacyConfig {
            base_url: "https://legacy.example/".to_string(),
            credential_dir: Some(dir.to_path_buf()),
            ..LegacyConfig::default()
        }
    }

    fn proxy(
        dir: &Path,
        transport: Arc<RecordingTransport>,
        keys: ClientKeyMap,
        serial: &str,
    ) -> LegacyProxy {
        let store = Arc::new(StaticCertificateStore::new([legacy_record(serial)]));
        LegacyProxy::new(
            config(dir),
            transport,
            Arc::new(CertificateResolver::new(store, keys)),
        )
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a/", "/b/c"), "https://a/b/c");
        assert_eq!(join_url("https://a", "b"), "https://a/b");
    }

    #[tokio::test]
    async fn test_forward_without_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let proxy = proxy(dir.path(), transport.clone(), ClientKeyMap::new(), "1");

        let mut request = SoapRequest::from_bytes(ApiSurface::Applicants, "<body/>");
        let result = proxy.forward(&mut request, PROXY_TIMEOUT).await.unwrap();
        assert_eq!(result.response.data().as_ref(), b"<legacy/>");
        assert!(result.certificate.is_none());

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].url,
            "https://legacy.example/grantsws-applicant/services/v2/ApplicantWebServicesSoapPort"
        );
        assert_eq!(calls[0].body, b"<body/>");
        assert!(calls[0].cert_path.is_none());
    }

    #[tokio::test]
    async fn test_override_header_sets_target_and_is_not_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let proxy = proxy(dir.path(), transport.clone(), ClientKeyMap::new(), "1");

        let mut request = SoapRequest::from_bytes(ApiSurface::Grantors, "<body/>")
            .with_header(
                http::header::HeaderName::from_static("x-gg-s2s-uri"),
                HeaderValue::from_static("https://override.example"),
            )
            .with_header(
                http::header::HeaderName::from_static("x-amzn-mtls-clientcert"),
                HeaderValue::from_static("garbage"),
            )
            .with_header(
                http::header::HeaderName::from_static("soapaction"),
                HeaderValue::from_static("\"\""),
            );
        proxy.forward(&mut request, PROXY_TIMEOUT).await.unwrap();

        let calls = transport.calls.lock().unwrap();
        assert!(calls[0].url.starts_with("https://override.example/grantsws-agency"));
        assert!(calls[0].headers.get("x-gg-s2s-uri").is_none());
        assert!(calls[0].headers.get("x-amzn-mtls-clientcert").is_none());
        assert!(calls[0].headers.get("soapaction").is_some());
    }

    #[tokio::test]
    async fn test_not_configured_never_calls_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let cert = generate_certificate();
        let transport = Arc::new(RecordingTransport::default());
        let mut keys = ClientKeyMap::new();
        keys.insert("some-other-cert".to_string(), cert.key_pem.clone());
        let proxy = proxy(dir.path(), transport.clone(), keys, &cert.serial_number);

        let mut request = SoapRequest::from_bytes(ApiSurface::Grantors, "<body/>")
            .with_auth(url_encode(&cert.cert_pem));
        let err = proxy.forward(&mut request, PROXY_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, GatewayError::ClientCertificateNotConfigured));
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_error_forwards_without_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let mut keys = ClientKeyMap::new();
        keys.insert("legacy-1".to_string(), "KEY".to_string());
        let proxy = proxy(dir.path(), transport.clone(), keys, "1");

        let mut request = SoapRequest::from_bytes(ApiSurface::Grantors, "<body/>").with_auth("not a cert");
        let result = proxy.forward(&mut request, PROXY_TIMEOUT).await.unwrap();
        assert!(result.certificate.is_none());

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].cert_path.is_none());
    }

    #[tokio::test]
    async fn test_resolved_certificate_file_exists_only_during_call() {
        let dir = tempfile::tempdir().unwrap();
        let cert = generate_certificate();
        let transport = Arc::new(RecordingTransport::default());
        let mut keys = ClientKeyMap::new();
        keys.insert("legacy-1".to_string(), cert.key_pem.clone());
        let proxy = proxy(dir.path(), transport.clone(), keys, &cert.serial_number);

        let mut request = SoapRequest::from_bytes(ApiSurface::Grantors, "<body/>")
            .with_auth(url_encode(&cert.cert_pem));
        let result = proxy.forward(&mut request, PROXY_TIMEOUT).await.unwrap();
        assert!(result.certificate.is_some());

        let calls = transport.calls.lock().unwrap();
        let path = calls[0].cert_path.clone().unwrap();
        assert!(calls[0].cert_existed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_credential_file_removed_when_upstream_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cert = generate_certificate();
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let mut keys = ClientKeyMap::new();
        keys.insert("legacy-1".to_string(), cert.key_pem.clone());
        let proxy = proxy(dir.path(), transport.clone(), keys, &cert.serial_number);

        let mut request = SoapRequest::from_bytes(ApiSurface::Grantors, "<body/>")
            .with_auth(url_encode(&cert.cert_pem));
        assert!(proxy.forward(&mut request, PROXY_TIMEOUT).await.is_err());

        let path = transport.calls.lock().unwrap()[0].cert_path.clone().unwrap();
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Records the credential path, then never completes.
    #[derive(Default)]
    struct HangingTransport {
        seen: Mutex<Option<(PathBuf, bool)>>,
    }

    #[async_trait]
    impl UpstreamTransport for HangingTransport {
        async fn send(
            &self,
            _request: UpstreamRequest,
            client_cert: Option<&Path>,
            _timeout: Duration,
        ) -> Result<SoapResponse, GatewayError> {
            if let Some(path) = client_cert {
                *self.seen.lock().unwrap() = Some((path.to_path_buf(), path.exists()));
            }
            std::future::pending::<Result<SoapResponse, GatewayError>>().await
        }
    }

    #[tokio::test]
    async fn test_credential_file_removed_when_forward_is_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let cert = generate_certificate();
        let transport = Arc::new(HangingTransport::default());
        let mut keys = ClientKeyMap::new();
        keys.insert("legacy-1".to_string(), cert.key_pem.clone());
        let store = Arc::new(StaticCertificateStore::new([legacy_record(&cert.serial_number)]));
        let proxy = LegacyProxy::new(
            config(dir.path()),
            transport.clone(),
            Arc::new(CertificateResolver::new(store, keys)),
        );

        let mut request = SoapRequest::from_bytes(ApiSurface::Grantors, "<body/>")
            .with_auth(url_encode(&cert.cert_pem));
        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            proxy.forward(&mut request, PROXY_TIMEOUT),
        )
        .await;
        assert!(outcome.is_err());

        let (path, existed) = transport.seen.lock().unwrap().clone().unwrap();
        assert!(existed);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_reqwest_transport_reuses_client_per_identity() {
        let dir = tempfile::tempdir().unwrap();
        let first = generate_certificate();
        let second = generate_certificate();
        let write = |name: &str, cert: &crate::auth::test_support::TestCertificate| {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("{}\n\n{}", cert.key_pem, cert.cert_pem)).unwrap();
            path
        };
        let a = write("a.pem", &first);
        let a_again = write("a-again.pem", &first);
        let b = write("b.pem", &second);

        let transport = ReqwestTransport::new().unwrap();
        transport.client_for(None).await.unwrap();
        assert_eq!(transport.cached_identities(), 0);

        transport.client_for(Some(&a)).await.unwrap();
        transport.client_for(Some(&a_again)).await.unwrap();
        assert_eq!(transport.cached_identities(), 1);

        transport.client_for(Some(&b)).await.unwrap();
        assert_eq!(transport.cached_identities(), 2);
    }

    #[tokio::test]
    async fn test_local_mock_framing() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let store = Arc::new(StaticCertificateStore::default());
        let proxy = LegacyProxy::new(
            LegacyConfig {
                local_mock_framing: true,
                ..config(dir.path())
            },
            transport,
            Arc::new(CertificateResolver::new(store, ClientKeyMap::new())),
        );

        let mut request = SoapRequest::from_bytes(ApiSurface::Applicants, "<body/>");
        let result = proxy.forward(&mut request, PROXY_TIMEOUT).await.unwrap();
        let data = String::from_utf8(result.response.data().to_vec()).unwrap();
        assert!(data.starts_with("--uuid:"));
        assert!(data.contains("<root.message@cxf.apache.org><legacy/>"));
    }
}
