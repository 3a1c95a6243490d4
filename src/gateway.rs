//! Request orchestration.
//!
//! Every accepted request is forwarded to the legacy service first. Internal
//! responses are only attempted afterwards, and any failure there falls back
//! to the legacy response untouched.

use crate::auth::{CertificateResolver, CertificateStore};
use crate::codec::{self, XmlValue};
use crate::config::{GatewayConfig, InternalConfig};
use crate::diff::diff_values;
use crate::error::GatewayError;
use crate::proxy::{LegacyProxy, ProxyResponse, UpstreamTransport};
use crate::registry::{OperationConfig, OperationRegistry};
use crate::responder::{InternalRequest, InternalResponder};
use crate::schemas::{ApiSurface, SoapRequest, SoapResponse};
use bytes::Bytes;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Orchestrator states. Each accepted request ends in `Done` exactly once.
#[derive(Debug)]
pub enum GatewayState {
    Start,
    Forwarding,
    Responding(Box<ProxyResponse>),
    Done(SoapResponse),
}

/// Request counters.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests_processed: AtomicU64,
    requests_forwarded: AtomicU64,
    requests_rejected: AtomicU64,
    internal_responses: AtomicU64,
    internal_fallbacks: AtomicU64,
    upstream_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_processed: u64,
    pub requests_forwarded: u64,
    pub requests_rejected: u64,
    pub internal_responses: u64,
    pub internal_fallbacks: u64,
    pub upstream_errors: u64,
}

impl GatewayMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_forwarded: self.requests_forwarded.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            internal_responses: self.internal_responses.load(Ordering::Relaxed),
            internal_fallbacks: self.internal_fallbacks.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct SoapGateway {
    registry: OperationRegistry,
    proxy: LegacyProxy,
    responder: Arc<dyn InternalResponder>,
    settings: InternalConfig,
    timeout: Duration,
    metrics: GatewayMetrics,
}

impl SoapGateway {
    pub fn new(
        registry: OperationRegistry,
        proxy: LegacyProxy,
        responder: Arc<dyn InternalResponder>,
        settings: InternalConfig,
    ) -> Self {
        let timeout = proxy.config().timeout();
        Self {
            registry,
            proxy,
            responder,
            settings,
            timeout,
            metrics: GatewayMetrics::default(),
        }
    }

    /// Wire a gateway from configuration.
    pub fn from_config(
        config: &GatewayConfig,
        transport: Arc<dyn UpstreamTransport>,
        store: Arc<dyn CertificateStore>,
        responder: Arc<dyn InternalResponder>,
    ) -> Result<Self, GatewayError> {
        let keys = config.load_client_keys()?;
        let registry = OperationRegistry::with_overrides(&config.operations);
        if registry.is_empty() {
            warn!("Operation registry is empty, every SOAP request will be rejected");
        }
        info!(
            operations = registry.len(),
            client_keys = keys.len(),
            use_internal = config.internal.use_internal,
            "Gateway initialized"
        );

        let resolver = Arc::new(CertificateResolver::new(store, keys));
        let proxy = LegacyProxy::new(config.legacy.clone(), transport, resolver);
        Ok(Self::new(registry, proxy, responder, config.internal.clone()))
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Header carrying the client certificate.
    pub fn mtls_header(&self) -> &str {
        &self.proxy.config().mtls_header
    }

    pub async fn handle(&self, request: SoapRequest) -> SoapResponse {
        self.handle_with_timeout(request, self.timeout).await
    }

    pub async fn handle_with_timeout(&self, mut request: SoapRequest, timeout: Duration) -> SoapResponse {
        GatewayMetrics::incr(&self.metrics.requests_processed);

        let (operation, config) = match self.validate(&mut request).await {
            Ok(validated) => validated,
            Err(e) => {
                GatewayMetrics::incr(&self.metrics.requests_rejected);
                warn!(
                    api = %request.api,
                    error = %e,
                    soap_api_event = "rejected_request",
                    "Rejected SOAP request"
                );
                return SoapResponse::from_error(&e);
            }
        };

        let mut state = GatewayState::Start;
        loop {
            state = match state {
                GatewayState::Start => GatewayState::Forwarding,
                GatewayState::Forwarding => {
                    GatewayMetrics::incr(&self.metrics.requests_forwarded);
                    match self.proxy.forward(&mut request, timeout).await {
                        Ok(proxied) => GatewayState::Responding(Box::new(proxied)),
                        Err(e) => GatewayState::Done(self.forward_failed(&request, &operation, e)),
                    }
                }
                GatewayState::Responding(proxied) => {
                    let (api, head) = (request.api, request.buffered_head());
                    GatewayState::Done(self.respond(api, head, &operation, &config, *proxied).await)
                }
                GatewayState::Done(response) => return response,
            }
        }
    }

    async fn validate(&self, request: &mut SoapRequest) -> Result<(String, OperationConfig), GatewayError> {
        let config = self.registry.resolve(request).await?.clone();
        let operation = request.operation_name().await?;
        Ok((operation, config))
    }

    fn forward_failed(&self, request: &SoapRequest, operation: &str, err: GatewayError) -> SoapResponse {
        match &err {
            GatewayError::ClientCertificateNotConfigured => {
                info!(
                    api = %request.api,
                    operation = %operation,
                    soap_api_event = "cert_not_configured",
                    "Client certificate not configured"
                );
            }
            _ => {
                GatewayMetrics::incr(&self.metrics.upstream_errors);
                error!(
                    api = %request.api,
                    operation = %operation,
                    error = %err,
                    soap_api_event = "legacy_call_failed",
                    "Legacy call failed"
                );
            }
        }
        SoapResponse::from_error(&err)
    }

    // SoapRequest is not Sync; no shared borrow of it may live across an await.
    async fn respond(
        &self,
        api: ApiSurface,
        head: Bytes,
        operation: &str,
        config: &OperationConfig,
        proxied: ProxyResponse,
    ) -> SoapResponse {
        let legacy = proxied.response;
        if !config.internal {
            return legacy;
        }
        let serve_internal = self.settings.use_internal;
        if !serve_internal && !config.always_call_internal {
            return legacy;
        }

        let internal_request = InternalRequest {
            api,
            operation: operation.to_string(),
            head,
            certificate: proxied.certificate,
            required_privileges: config.privileges.clone().unwrap_or_default(),
        };

        let internal = match AssertUnwindSafe(self.responder.try_build_response(&internal_request, &legacy))
            .catch_unwind()
            .await
        {
            Ok(internal) => internal,
            Err(_) => {
                error!(
                    api = %api,
                    operation = %operation,
                    soap_api_event = "internal_responder_panic",
                    "Internal responder panicked"
                );
                None
            }
        };

        let Some(internal) = internal else {
            GatewayMetrics::incr(&self.metrics.internal_fallbacks);
            debug!(api = %api, operation = %operation, "Using legacy response");
            return legacy;
        };

        if serve_internal {
            GatewayMetrics::incr(&self.metrics.internal_responses);
            info!(api = %api, operation = %operation, "Serving internal SOAP response");
            return internal;
        }

        self.log_shadow_diff(api, operation, &internal, &legacy);
        legacy
    }

    fn log_shadow_diff(&self, api: ApiSurface, operation: &str, internal: &SoapResponse, legacy: &SoapResponse) {
        let response_operation = operation
            .strip_suffix("Request")
            .map(|base| format!("{}Response", base))
            .unwrap_or_else(|| operation.to_string());

        let (Some(internal_body), Some(legacy_body)) = (
            response_body(internal, &response_operation),
            response_body(legacy, &response_operation),
        ) else {
            warn!(api = %api, operation = %operation, "Could not decode responses for comparison");
            return;
        };

        let diff = diff_values(
            &internal_body,
            &legacy_body,
            &self.settings.diff_key_indexes,
            self.settings.diff_keys_only,
        );
        let matches = diff.as_object().is_some_and(|d| d.is_empty());
        info!(
            api = %api,
            operation = %operation,
            soap_api_event = "soap_diff",
            matches = matches,
            diff = %diff,
            "Compared internal and legacy SOAP responses"
        );
    }
}

fn response_body(response: &SoapResponse, operation: &str) -> Option<XmlValue> {
    let envelope = codec::extract_envelope(response.data())?;
    let document = codec::decode(std::str::from_utf8(envelope).ok()?, false).ok()?;
    codec::envelope_body(&document, operation).cloned()
}
