//! MTOM/XOP multipart framing, matching what the legacy service emits.

use crate::schemas::SoapResponse;
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use uuid::Uuid;

/// `Content-ID` of the root part.
pub const ROOT_CONTENT_ID: &str = "<root.message@cxf.apache.org>";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Wrap `data` in a single-part multipart body. A random boundary id is
/// generated when none is given.
pub fn format_local_soap_response(data: &[u8], boundary_id: Option<&str>) -> Vec<u8> {
    let boundary_id = boundary_id
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let framed = format!(
        "--uuid:{id}\r\nContent-Type: application/xop+xml; charset=UTF-8; type=\"text/xml\"\r\nContent-Transfer-Encoding: binary\r\nContent-ID: {cid}{data}\r\n--uuid:{id}--\r\n",
        id = boundary_id,
        cid = ROOT_CONTENT_ID,
        data = String::from_utf8_lossy(data),
    );
    framed.replace(XML_DECLARATION, "").trim().as_bytes().to_vec()
}

/// `Content-Type` announcing the multipart boundary.
pub fn multipart_content_type(boundary_id: &str) -> String {
    format!(
        r#"multipart/related; type="application/xop+xml"; boundary="uuid:{}"; start="{}"; start-info="text/xml""#,
        boundary_id, ROOT_CONTENT_ID
    )
}

/// Frame a response body and set the matching content type.
pub fn frame_response(mut response: SoapResponse) -> SoapResponse {
    let boundary_id = Uuid::new_v4().to_string();
    let framed = format_local_soap_response(response.data(), Some(&boundary_id));
    response.set_data(framed);
    if let Ok(value) = HeaderValue::from_str(&multipart_content_type(&boundary_id)) {
        response.insert_header(CONTENT_TYPE, value);
    }
    response
}
