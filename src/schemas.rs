//! Request and response types shared across the gateway.

use crate::codec;
use crate::error::{FaultMessage, GatewayError};
use crate::streamer::{BodyReader, BodyStream, SoapRequestStreamer};
use bytes::Bytes;
use http::header::{HeaderName, CONTENT_LENGTH, CONTENT_TYPE, STRICT_TRANSPORT_SECURITY};
use http::{HeaderMap, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content type the legacy system uses for every SOAP response.
pub const BASE_RESPONSE_CONTENT_TYPE: &str = r#"multipart/related; type="application/xop+xml""#;

pub const HSTS_HEADER_VALUE: &str = "max-age=31536000; includeSubDomains";

/// Body returned for paths outside both API surfaces.
pub const INVALID_PATH_BODY: &str = "<html><body>No service was found.</body></html>";

/// The two legacy API surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiSurface {
    Applicants,
    Grantors,
}

impl ApiSurface {
    pub const ALL: [ApiSurface; 2] = [ApiSurface::Applicants, ApiSurface::Grantors];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applicants => "applicants",
            Self::Grantors => "grantors",
        }
    }

    /// Service path the legacy system exposes for this surface.
    pub fn service_path(&self) -> &'static str {
        match self {
            Self::Applicants => "/grantsws-applicant/services/v2/ApplicantWebServicesSoapPort",
            Self::Grantors => "/grantsws-agency/services/v2/AgencyWebServicesSoapPort",
        }
    }

    /// Surface served at `path`, ignoring any query string and trailing slash.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or(path);
        let path = path.trim_end_matches('/');
        Self::ALL.into_iter().find(|api| api.service_path() == path)
    }
}

impl fmt::Display for ApiSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound SOAP call.
///
/// The body is streamed: [`head`](Self::head) buffers the envelope prefix and
/// [`take_body`](Self::take_body) hands out the full replay exactly once.
pub struct SoapRequest {
    pub api: ApiSurface,
    pub method: Method,
    pub full_path: String,
    pub headers: HeaderMap,
    /// Raw client certificate from the mTLS header, if any.
    pub auth: Option<String>,
    body: Option<SoapRequestStreamer<BodyReader>>,
    head: Option<Bytes>,
    operation_name: Option<String>,
}

impl SoapRequest {
    pub fn new(
        api: ApiSurface,
        method: Method,
        full_path: impl Into<String>,
        headers: HeaderMap,
        auth: Option<String>,
        body: BodyReader,
    ) -> Self {
        Self {
            api,
            method,
            full_path: full_path.into(),
            headers,
            auth,
            body: Some(SoapRequestStreamer::new(body)),
            head: None,
            operation_name: None,
        }
    }

    /// In-memory request, mostly for tests and tooling.
    pub fn from_bytes(api: ApiSurface, body: impl Into<Vec<u8>>) -> Self {
        Self::new(
            api,
            Method::POST,
            api.service_path(),
            HeaderMap::new(),
            None,
            Box::new(std::io::Cursor::new(body.into())),
        )
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Buffered head of the body. Still available after the body is taken.
    pub async fn head(&mut self) -> Result<Bytes, GatewayError> {
        if let Some(head) = &self.head {
            return Ok(head.clone());
        }
        let head = match self.body.as_mut() {
            Some(streamer) => streamer.head().await?,
            None => Bytes::new(),
        };
        self.head = Some(head.clone());
        Ok(head)
    }

    /// Head bytes if already buffered.
    pub fn buffered_head(&self) -> Bytes {
        self.head.clone().unwrap_or_default()
    }

    /// `Body` operation name parsed from the head, cached after first use.
    pub async fn operation_name(&mut self) -> Result<String, GatewayError> {
        if let Some(name) = &self.operation_name {
            return Ok(name.clone());
        }
        let head = self.head().await?;
        let name = codec::operation_name(&head)?.ok_or(GatewayError::InvalidRequestOperationName)?;
        self.operation_name = Some(name.clone());
        Ok(name)
    }

    /// Take the body for forwarding. Returns `None` once taken.
    pub fn take_body(&mut self) -> Option<BodyStream> {
        let streamer = self.body.take()?;
        if self.head.is_none() {
            self.head = streamer.cached_head().cloned();
        }
        Some(streamer.into_stream())
    }
}

impl fmt::Debug for SoapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoapRequest")
            .field("api", &self.api)
            .field("method", &self.method)
            .field("full_path", &self.full_path)
            .field("has_auth", &self.auth.is_some())
            .field("operation_name", &self.operation_name)
            .finish_non_exhaustive()
    }
}

/// A SOAP response. `Content-Length` always matches `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct SoapResponse {
    data: Bytes,
    status_code: u16,
    headers: HeaderMap,
}

impl SoapResponse {
    pub fn new(data: impl Into<Bytes>, status_code: u16, mut headers: HeaderMap) -> Self {
        let data = data.into();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len()));
        Self {
            data,
            status_code,
            headers,
        }
    }

    /// Response produced by the gateway itself, carrying the legacy base headers.
    pub fn synthesized(data: impl Into<Bytes>, status_code: u16, extra: HeaderMap) -> Self {
        let mut headers = base_response_headers();
        for (name, value) in extra.iter() {
            headers.insert(name.clone(), value.clone());
        }
        Self::new(data, status_code, headers)
    }

    pub fn fault(fault: &FaultMessage) -> Self {
        Self::synthesized(fault.to_xml(), 500, HeaderMap::new())
    }

    pub fn from_error(err: &GatewayError) -> Self {
        Self::fault(&err.to_fault())
    }

    pub fn invalid_path() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        Self::new(INVALID_PATH_BODY, 404, headers)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Replace the body, keeping `Content-Length` in step.
    pub fn set_data(&mut self, data: impl Into<Bytes>) {
        self.data = data.into();
        self.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(self.data.len()));
    }

    /// Insert a header. `Content-Length` is managed and cannot be set here.
    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        if name != CONTENT_LENGTH {
            self.headers.insert(name, value);
        }
    }

    pub fn into_parts(self) -> (Bytes, u16, HeaderMap) {
        (self.data, self.status_code, self.headers)
    }
}

/// Headers every gateway-generated response starts from.
pub fn base_response_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(BASE_RESPONSE_CONTENT_TYPE));
    headers.insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS_HEADER_VALUE));
    headers
}

/// Copy `headers` without the names in `omit` (case-insensitive).
pub fn filter_headers(headers: &HeaderMap, omit: &[&str]) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if omit.iter().any(|o| name.as_str().eq_ignore_ascii_case(o)) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}
