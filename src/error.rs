//! Error types for the legacy SOAP gateway.
//!
//! Every failure that reaches a caller is rendered as a SOAP fault; see
//! [`GatewayError::to_fault`].

use crate::schemas::ApiSurface;
use thiserror::Error;

/// SOAP 1.1 envelope namespace.
pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Fault string returned when a valid certificate has no legacy mapping.
pub const CERT_NOT_CONFIGURED_FAULT: &str = "Client certificate not configured for Simpler SOAP.";

/// Gateway errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid XML: {0}")]
    InvalidXml(#[from] CodecError),

    #[error("Could not determine SOAP operation name from request")]
    InvalidRequestOperationName,

    #[error("Unsupported operation {operation} for {api} API")]
    OperationNotSupported { api: ApiSurface, operation: String },

    #[error("Operation {operation} for {api} API has no privileges configured")]
    OperationNotConfigured { api: ApiSurface, operation: String },

    #[error("Client certificate not configured")]
    ClientCertificateNotConfigured,

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Credential file error: {0}")]
    Credential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Map to the fault returned to the caller.
    ///
    /// Upstream, credential and IO failures all render the generic server
    /// fault; their details only go to the log.
    pub fn to_fault(&self) -> FaultMessage {
        match self {
            Self::InvalidXml(_) => FaultMessage::client("Invalid XML in request"),
            Self::InvalidRequestOperationName => {
                FaultMessage::client("Unable to determine SOAP operation from request")
            }
            Self::OperationNotSupported { api, operation } => FaultMessage::client(format!(
                "Unsupported operation {} for {} API",
                operation, api
            )),
            Self::OperationNotConfigured { api, operation } => FaultMessage::server(format!(
                "Operation {} for {} API is not configured",
                operation, api
            )),
            Self::ClientCertificateNotConfigured => {
                FaultMessage::server(CERT_NOT_CONFIGURED_FAULT)
            }
            Self::Upstream(_) | Self::Credential(_) | Self::Config(_) | Self::Io(_) => {
                FaultMessage::default()
            }
        }
    }
}

/// XML codec errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed XML: {0}")]
    InvalidXml(String),

    #[error("XML encoding failed: {0}")]
    Encode(String),
}

/// Certificate resolution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("could not parse client certificate: {0}")]
    InvalidPem(String),

    #[error("could not retrieve legacy cert for serial number: {0}")]
    LegacyCertificateNotFound(String),

    #[error("certificate is expired: {0}")]
    Expired(String),

    #[error("certificate does not have agency: {0}")]
    MissingAgency(String),

    #[error("certificate store error: {0}")]
    Store(String),
}

/// Internal responder errors. Never shown to callers.
#[derive(Error, Debug)]
pub enum ResponderError {
    #[error("no SOAP envelope in request head")]
    MissingEnvelope,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("request does not match schema: {0}")]
    Schema(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("domain backend error: {0}")]
    Backend(String),
}

/// A SOAP 1.1 fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultMessage {
    pub faultcode: String,
    pub faultstring: String,
}

impl Default for FaultMessage {
    fn default() -> Self {
        Self::server("Server error has occurred")
    }
}

impl FaultMessage {
    pub fn new(faultcode: impl Into<String>, faultstring: impl Into<String>) -> Self {
        Self {
            faultcode: faultcode.into(),
            faultstring: faultstring.into(),
        }
    }

    /// Fault blamed on the server (`soap:Server`).
    pub fn server(faultstring: impl Into<String>) -> Self {
        Self::new("soap:Server", faultstring)
    }

    /// Fault blamed on the caller (`soap:Client`).
    pub fn client(faultstring: impl Into<String>) -> Self {
        Self::new("soap:Client", faultstring)
    }

    /// Render the fault envelope. No XML declaration is emitted.
    pub fn to_xml(&self) -> Vec<u8> {
        format!(
            r#"<soap:Envelope xmlns:soap="{}">
    <soap:Body>
        <soap:Fault>
            <faultcode>{}</faultcode>
            <faultstring>{}</faultstring>
        </soap:Fault>
    </soap:Body>
</soap:Envelope>"#,
            SOAP_ENVELOPE_NS,
            xml_escape(&self.faultcode),
            xml_escape(&self.faultstring),
        )
        .into_bytes()
    }
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_message_xml() {
        let fault = FaultMessage::new("a", "b");
        let expected = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
    <soap:Body>
        <soap:Fault>
            <faultcode>a</faultcode>
            <faultstring>b</faultstring>
        </soap:Fault>
    </soap:Body>
</soap:Envelope>"#;
        assert_eq!(fault.to_xml(), expected.as_bytes());
    }

    #[test]
    fn test_fault_has_no_xml_declaration() {
        let xml = FaultMessage::default().to_xml();
        assert!(!String::from_utf8(xml).unwrap().contains("<?xml"));
    }

    #[test]
    fn test_fault_string_is_escaped() {
        let xml = FaultMessage::server("a < b & c").to_xml();
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains("<faultstring>a &lt; b &amp; c</faultstring>"));
    }

    #[test]
    fn test_unsupported_operation_fault_names_operation_and_api() {
        let err = GatewayError::OperationNotSupported {
            api: ApiSurface::Grantors,
            operation: "DoSomethingRequest".to_string(),
        };
        let fault = err.to_fault();
        assert_eq!(fault.faultcode, "soap:Client");
        assert!(fault.faultstring.contains("DoSomethingRequest"));
        assert!(fault.faultstring.contains("grantors"));
    }

    #[test]
    fn test_upstream_error_maps_to_generic_fault() {
        let fault = GatewayError::Upstream("connection refused".to_string()).to_fault();
        assert_eq!(fault, FaultMessage::default());
        assert!(!fault.faultstring.contains("connection refused"));
    }

    #[test]
    fn test_not_configured_fault() {
        let fault = GatewayError::ClientCertificateNotConfigured.to_fault();
        assert!(fault.faultstring.contains("not configured"));
    }
}
