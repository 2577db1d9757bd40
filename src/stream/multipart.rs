/// Boundary token separating parts.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` header value for the streaming response.
pub fn response_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}

/// Wrap one payload as a self-delimited part:
/// boundary line, content-type header, blank line, body, CRLF.
pub fn encode_part(content_type: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: {}\r\n\r\n", BOUNDARY, content_type);
    let mut part = Vec::with_capacity(header.len() + payload.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(payload);
    part.extend_from_slice(b"\r\n");
    part
}
