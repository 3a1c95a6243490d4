//! Internal responder: answers selected operations from the new system's
//! data instead of the legacy service.
//!
//! Domain queries go through [`DomainBackend`]; this module owns request
//! parsing, validation, authorization and response formatting.

use crate::auth::{ClientCertificate, LegacyCertificate};
use crate::codec::{self, XmlValue};
use crate::error::ResponderError;
use crate::framing;
use crate::registry::Privilege;
use crate::schemas::{ApiSurface, SoapResponse};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const APPLICANT_SERVICES_NS: &str = "http://apply.grants.gov/services/ApplicantWebServices-V2.0";
const APPLICANT_COMMON_NS: &str = "http://apply.grants.gov/system/ApplicantCommonElements-V1.0";
const AGENCY_SERVICES_NS: &str = "http://apply.grants.gov/services/AgencyWebServices-V2.0";
const AGENCY_COMMON_NS: &str = "http://apply.grants.gov/system/AgencyCommonElements-V1.0";
const GRANTS_COMMON_NS: &str = "http://apply.grants.gov/system/GrantsCommonElements-V1.0";

/// What the orchestrator hands the responder.
#[derive(Debug, Clone)]
pub struct InternalRequest {
    pub api: ApiSurface,
    pub operation: String,
    /// Buffered request head holding the envelope.
    pub head: Bytes,
    pub certificate: Option<ClientCertificate>,
    pub required_privileges: BTreeSet<Privilege>,
}

#[async_trait]
pub trait InternalResponder: Send + Sync {
    /// Build a response, or `None` when the operation is not applicable.
    async fn try_build_response(
        &self,
        request: &InternalRequest,
        legacy_response: &SoapResponse,
    ) -> Option<SoapResponse>;
}

/// A validated operation query.
#[derive(Debug, Clone)]
pub struct DomainQuery {
    pub api: ApiSurface,
    pub operation: String,
    /// Request fields, namespace-free.
    pub fields: XmlValue,
    pub identity: Option<LegacyCertificate>,
    /// Set when there is no end-user identity behind the query.
    pub internal: bool,
}

/// Data access for internally answered operations.
#[async_trait]
pub trait DomainBackend: Send + Sync {
    /// Response body for the operation, without the SOAP envelope.
    async fn execute(&self, query: DomainQuery) -> Result<XmlValue, ResponderError>;
}

/// Backend for deployments without internal data access; every query fails
/// and traffic stays on the legacy path.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

#[async_trait]
impl DomainBackend for UnavailableBackend {
    async fn execute(&self, query: DomainQuery) -> Result<XmlValue, ResponderError> {
        Err(ResponderError::Backend(format!(
            "no domain backend configured for {}",
            query.operation
        )))
    }
}

/// Accepted shape of an operation's request fields.
#[derive(Debug, Clone, Copy)]
pub struct RequestSchema {
    /// At least one of these must be present, when non-empty.
    pub any_of: &'static [&'static str],
    pub allowed: &'static [&'static str],
}

impl RequestSchema {
    pub fn validate(&self, fields: &XmlValue) -> Result<(), ResponderError> {
        let present: Vec<&str> = match fields {
            XmlValue::Map(map) => map
                .keys()
                .filter(|k| !k.is_attribute())
                .map(|k| k.local.as_str())
                .collect(),
            XmlValue::Null => Vec::new(),
            _ => return Err(ResponderError::Schema("expected an element list".to_string())),
        };

        if let Some(unknown) = present.iter().find(|p| !self.allowed.contains(*p)) {
            return Err(ResponderError::Schema(format!("unexpected element {}", unknown)));
        }
        if !self.any_of.is_empty() && !present.iter().any(|p| self.any_of.contains(p)) {
            return Err(ResponderError::Schema(format!(
                "one of {} is required",
                self.any_of.join(", ")
            )));
        }
        Ok(())
    }
}

/// Static description of an internally answered operation.
#[derive(Debug, Clone, Copy)]
pub struct OperationHandler {
    pub api: ApiSurface,
    pub request_operation: &'static str,
    pub response_operation: &'static str,
    pub response_namespace: &'static str,
    pub schema: RequestSchema,
    /// Keys always rendered as lists, even with one entry.
    pub force_list: &'static [&'static str],
    /// Prefix bindings declared on the response envelope.
    pub namespaces: &'static [(&'static str, &'static str)],
}

pub const GET_OPPORTUNITY_LIST: OperationHandler = OperationHandler {
    api: ApiSurface::Applicants,
    request_operation: "GetOpportunityListRequest",
    response_operation: "GetOpportunityListResponse",
    response_namespace: APPLICANT_SERVICES_NS,
    schema: RequestSchema {
        any_of: &["PackageID", "OpportunityFilter"],
        allowed: &["PackageID", "OpportunityFilter"],
    },
    force_list: &["OpportunityDetails", "CFDADetails"],
    namespaces: &[
        ("ns2", APPLICANT_SERVICES_NS),
        ("ns5", APPLICANT_COMMON_NS),
        ("ns3", GRANTS_COMMON_NS),
    ],
};

pub const GET_SUBMISSION_LIST_EXPANDED: OperationHandler = OperationHandler {
    api: ApiSurface::Grantors,
    request_operation: "GetSubmissionListExpandedRequest",
    response_operation: "GetSubmissionListExpandedResponse",
    response_namespace: AGENCY_SERVICES_NS,
    schema: RequestSchema {
        any_of: &[],
        allowed: &["ExpandedApplicationFilter"],
    },
    force_list: &["SubmissionInfo"],
    namespaces: &[
        ("ns2", AGENCY_SERVICES_NS),
        ("ns3", GRANTS_COMMON_NS),
        ("ns4", AGENCY_COMMON_NS),
    ],
};

pub struct SimplerResponder {
    handlers: HashMap<(ApiSurface, String), OperationHandler>,
    backend: Arc<dyn DomainBackend>,
}

impl SimplerResponder {
    /// Responder with the built-in operation handlers.
    pub fn new(backend: Arc<dyn DomainBackend>) -> Self {
        let mut responder = Self {
            handlers: HashMap::new(),
            backend,
        };
        responder.register(GET_OPPORTUNITY_LIST);
        responder.register(GET_SUBMISSION_LIST_EXPANDED);
        responder
    }

    pub fn register(&mut self, handler: OperationHandler) {
        self.handlers
            .insert((handler.api, handler.request_operation.to_string()), handler);
    }

    /// Identity the query runs as, or an error if the caller may not use the
    /// internal path for this operation.
    fn authorize(
        &self,
        request: &InternalRequest,
        today: NaiveDate,
    ) -> Result<Option<LegacyCertificate>, ResponderError> {
        let identity = request
            .certificate
            .as_ref()
            .map(|c| c.legacy_certificate.clone());

        if request.required_privileges.is_empty() {
            return Ok(identity);
        }

        let identity = identity.ok_or_else(|| {
            ResponderError::Unauthorized("operation requires a client certificate".to_string())
        })?;
        identity.validate_for(request.api, today)?;
        if !identity.has_privileges(&request.required_privileges) {
            return Err(ResponderError::Unauthorized(format!(
                "certificate {} lacks required privileges",
                identity.cert_id
            )));
        }
        Ok(Some(identity))
    }

    async fn build(
        &self,
        handler: &OperationHandler,
        request: &InternalRequest,
    ) -> Result<SoapResponse, ResponderError> {
        let identity = self.authorize(request, Utc::now().date_naive())?;

        let envelope = codec::extract_envelope(&request.head).ok_or(ResponderError::MissingEnvelope)?;
        let xml = std::str::from_utf8(envelope)
            .map_err(|e| ResponderError::Schema(e.to_string()))?;
        let document = codec::decode(xml, false)?;
        let fields = codec::envelope_body(&document, handler.request_operation)
            .cloned()
            .ok_or(ResponderError::MissingEnvelope)?;
        handler.schema.validate(&fields)?;

        let body = self
            .backend
            .execute(DomainQuery {
                api: request.api,
                operation: request.operation.clone(),
                fields,
                internal: identity.is_none(),
                identity,
            })
            .await?;
        let body = codec::force_list(body, handler.force_list);

        let xml = codec::encode_envelope(
            &body,
            handler.response_operation,
            Some(handler.response_namespace),
            handler.namespaces,
        )?;
        let boundary_id = Uuid::new_v4().to_string();
        let data = framing::format_local_soap_response(&xml, Some(&boundary_id));

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&framing::multipart_content_type(&boundary_id)) {
            headers.insert(CONTENT_TYPE, value);
        }
        Ok(SoapResponse::synthesized(data, 200, headers))
    }
}

#[async_trait]
impl InternalResponder for SimplerResponder {
    async fn try_build_response(
        &self,
        request: &InternalRequest,
        _legacy_response: &SoapResponse,
    ) -> Option<SoapResponse> {
        let Some(handler) = self.handlers.get(&(request.api, request.operation.clone())) else {
            debug!(
                api = %request.api,
                operation = %request.operation,
                "No internal handler for operation"
            );
            return None;
        };

        match self.build(handler, request).await {
            Ok(response) => {
                info!(
                    api = %request.api,
                    operation = %request.operation,
                    "Built internal SOAP response"
                );
                Some(response)
            }
            Err(e) => {
                warn!(
                    api = %request.api,
                    operation = %request.operation,
                    error = %e,
                    "Internal SOAP response unavailable"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::legacy_record;
    use crate::codec::{XmlKey, XmlMap};
    use std::sync::Mutex;

    const OPPORTUNITY_REQUEST: &str = r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:app="http://apply.grants.gov/services/ApplicantWebServices-V2.0"><soapenv:Header/><soapenv:Body><app:GetOpportunityListRequest><app:PackageID>PKG00118065</app:PackageID></app:GetOpportunityListRequest></soapenv:Body></soapenv:Envelope>"#;

    const SUBMISSION_REQUEST: &str = r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:agen="http://apply.grants.gov/services/AgencyWebServices-V2.0"><soapenv:Body><agen:GetSubmissionListExpandedRequest/></soapenv:Body></soapenv:Envelope>"#;

    #[derive(Default)]
    struct RecordingBackend {
        queries: Mutex<Vec<DomainQuery>>,
    }

    #[async_trait]
    impl DomainBackend for RecordingBackend {
        async fn execute(&self, query: DomainQuery) -> Result<XmlValue, ResponderError> {
            self.queries.lock().unwrap().push(query);
            let mut detail = XmlMap::new();
            detail.insert(
                XmlKey::qualified(GRANTS_COMMON_NS, "FundingOpportunityNumber"),
                XmlValue::from("O-1"),
            );
            let mut body = XmlMap::new();
            body.insert(
                XmlKey::qualified(APPLICANT_COMMON_NS, "OpportunityDetails"),
                XmlValue::Map(detail),
            );
            Ok(XmlValue::Map(body))
        }
    }

    fn legacy() -> SoapResponse {
        SoapResponse::new("<legacy/>", 200, HeaderMap::new())
    }

    fn request(api: ApiSurface, operation: &str, head: &'static str) -> InternalRequest {
        InternalRequest {
            api,
            operation: operation.to_string(),
            head: Bytes::from_static(head.as_bytes()),
            certificate: None,
            required_privileges: BTreeSet::new(),
        }
    }

    fn certificate(record: LegacyCertificate) -> ClientCertificate {
        ClientCertificate {
            serial_number: record.serial_number.clone(),
            fingerprint: "00".to_string(),
            certificate_pem: String::new(),
            pem: String::new(),
            legacy_certificate: record,
        }
    }

    #[test]
    fn test_schema_validation() {
        let schema = GET_OPPORTUNITY_LIST.schema;
        let fields = codec::decode("<r><PackageID>1</PackageID></r>", false).unwrap();
        assert!(schema.validate(fields.get("r").unwrap()).is_ok());

        assert!(schema.validate(&XmlValue::Null).is_err());

        let unexpected = codec::decode("<r><PackageID>1</PackageID><Other>2</Other></r>", false).unwrap();
        assert!(schema.validate(unexpected.get("r").unwrap()).is_err());

        assert!(GET_SUBMISSION_LIST_EXPANDED.schema.validate(&XmlValue::Null).is_ok());
    }

    #[tokio::test]
    async fn test_builds_framed_response() {
        let backend = Arc::new(RecordingBackend::default());
        let responder = SimplerResponder::new(backend.clone());
        let req = request(ApiSurface::Applicants, "GetOpportunityListRequest", OPPORTUNITY_REQUEST);

        let response = responder.try_build_response(&req, &legacy()).await.unwrap();
        assert_eq!(response.status_code(), 200);
        let content_type = response.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap();
        assert!(content_type.starts_with("multipart/related"));

        let data = response.data();
        let envelope = codec::extract_envelope(data).unwrap();
        let decoded = codec::decode(std::str::from_utf8(envelope).unwrap(), false).unwrap();
        let body = codec::envelope_body(&decoded, "GetOpportunityListResponse").unwrap();
        let details = body.get("OpportunityDetails").unwrap();
        assert_eq!(
            details.get("FundingOpportunityNumber"),
            Some(&XmlValue::from("O-1"))
        );

        let queries = backend.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].fields.get("PackageID"), Some(&XmlValue::from("PKG00118065")));
        assert!(queries[0].internal);
    }

    #[tokio::test]
    async fn test_unknown_operation_not_applicable() {
        let responder = SimplerResponder::new(Arc::new(RecordingBackend::default()));
        let req = request(ApiSurface::Grantors, "GetApplicationZipRequest", SUBMISSION_REQUEST);
        assert!(responder.try_build_response(&req, &legacy()).await.is_none());
    }

    #[tokio::test]
    async fn test_privileged_operation_requires_certificate() {
        let backend = Arc::new(RecordingBackend::default());
        let responder = SimplerResponder::new(backend.clone());
        let mut req = request(ApiSurface::Grantors, "GetSubmissionListExpandedRequest", SUBMISSION_REQUEST);
        req.required_privileges = [Privilege::LegacyAgencyGrantRetriever].into_iter().collect();

        assert!(responder.try_build_response(&req, &legacy()).await.is_none());
        assert!(backend.queries.lock().unwrap().is_empty());

        req.certificate = Some(certificate(legacy_record("1")));
        assert!(responder.try_build_response(&req, &legacy()).await.is_some());
        let queries = backend.queries.lock().unwrap();
        assert_eq!(
            queries[0].identity.as_ref().map(|i| i.agency_code.as_deref()),
            Some(Some("HHS"))
        );
        assert!(!queries[0].internal);
    }

    #[tokio::test]
    async fn test_missing_privilege_not_applicable() {
        let responder = SimplerResponder::new(Arc::new(RecordingBackend::default()));
        let mut req = request(ApiSurface::Grantors, "GetSubmissionListExpandedRequest", SUBMISSION_REQUEST);
        req.required_privileges = [Privilege::LegacyAgencyAssigner].into_iter().collect();
        req.certificate = Some(certificate(legacy_record("1")));
        assert!(responder.try_build_response(&req, &legacy()).await.is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_not_applicable() {
        let responder = SimplerResponder::new(Arc::new(UnavailableBackend));
        let req = request(ApiSurface::Applicants, "GetOpportunityListRequest", OPPORTUNITY_REQUEST);
        assert!(responder.try_build_response(&req, &legacy()).await.is_none());
    }

    #[tokio::test]
    async fn test_truncated_head_not_applicable() {
        let responder = SimplerResponder::new(Arc::new(RecordingBackend::default()));
        let req = request(
            ApiSurface::Applicants,
            "GetOpportunityListRequest",
            "<soapenv:Envelope><soapenv:Body><app:GetOpportunityListRequest>",
        );
        assert!(responder.try_build_response(&req, &legacy()).await.is_none());
    }
}
