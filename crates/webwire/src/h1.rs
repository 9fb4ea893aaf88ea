//! HTTP/1.1 request serialization and response-line parsing.
//!
//! The wire subset here is exactly what the connection driver speaks:
//! CRLF-terminated request/status/header lines, a double-CRLF head/body
//! separator, hex chunk-size lines, and the WebSocket upgrade header set.

use base64::prelude::*;
use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::{
    config::ClientConfig,
    error::{Error, Result},
    headers::Headers,
    response::Response,
};

/// Snapshot of everything needed to emit one request. Taken by the facade
/// when `send()` is called so later mutation of the client cannot race the
/// driver.
#[derive(Clone, Debug)]
pub(crate) struct RequestPlan {
    pub method: String,
    pub host: String,
    pub endpoint: String,
    pub headers: Headers,
    pub body: Bytes,
    pub websocket: bool,
}

/// A serialized request plus the handshake key it carries, if any.
pub(crate) struct PreparedRequest {
    pub bytes: Vec<u8>,
    pub ws_key: Option<String>,
}

fn has_body(method: &str) -> bool {
    method == "POST" || method == "PUT"
}

/// Serializes `plan` per the rules of the request emitter: defaults are
/// injected without clobbering caller-set headers, `Connection` is forced,
/// and POST/PUT carry a `Content-Length` plus the body. A request that
/// serializes to zero bytes is an error.
pub(crate) fn build_request(plan: &RequestPlan, config: &ClientConfig) -> Result<PreparedRequest> {
    let mut headers = plan.headers.clone();
    let mut ws_key = None;

    if plan.websocket {
        headers.set_if_absent("Host", &plan.host);
        headers.set("Upgrade", "websocket");
        headers.set("Connection", "Upgrade");
        let key = generate_ws_key();
        headers.set("Sec-WebSocket-Key", key.clone());
        headers.set("Sec-WebSocket-Version", "13");
        ws_key = Some(key);
    } else {
        headers.set_if_absent("Accept", "*/*");
        headers.set_if_absent("Host", &plan.host);
        headers.set("Connection", "Keep-Alive");
    }
    headers.set_if_absent("User-Agent", &config.user_agent);
    if let Some(client_id) = &config.client_id {
        headers.set("ClientId", client_id);
    }

    let mut bytes = Vec::with_capacity(256 + plan.body.len());
    bytes.extend_from_slice(plan.method.as_bytes());
    bytes.extend_from_slice(b" /");
    bytes.extend_from_slice(plan.endpoint.as_bytes());
    bytes.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(b": ");
        bytes.extend_from_slice(value.as_bytes());
        bytes.extend_from_slice(b"\r\n");
    }
    if !plan.websocket && has_body(&plan.method) {
        bytes.extend_from_slice(format!("Content-Length: {}\r\n", plan.body.len()).as_bytes());
    }
    bytes.extend_from_slice(b"\r\n");
    if !plan.websocket && has_body(&plan.method) {
        bytes.extend_from_slice(&plan.body);
    }

    if bytes.is_empty() {
        return Err(Error::EmptyRequest);
    }
    Ok(PreparedRequest { bytes, ws_key })
}

/// Parses a full header block (status line through the blank line) into a
/// fresh [`Response`].
pub(crate) fn parse_response_head(block: &[u8]) -> Result<Response> {
    let text = String::from_utf8_lossy(block);
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or(Error::MalformedResponse("missing status line"))?;
    let (version, status_code, status_message) = parse_status_line(status_line)?;

    let mut response = Response {
        version,
        status_code,
        status_message,
        ..Response::default()
    };
    for line in lines {
        if line.is_empty() {
            break;
        }
        absorb_header_line(&mut response, line);
    }
    Ok(response)
}

/// Parses `HTTP/<v> <code> <message>`.
pub(crate) fn parse_status_line(line: &str) -> Result<(String, u16, String)> {
    let line = line.trim_end_matches('\r');
    let mut parts = line.splitn(3, ' ');

    let version = parts
        .next()
        .filter(|version| version.starts_with("HTTP/"))
        .ok_or(Error::MalformedResponse("bad status line version"))?;
    let status_code = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or(Error::MalformedResponse("bad status code"))?;
    let status_message = parts.next().unwrap_or("").trim().to_string();

    Ok((version.to_string(), status_code, status_message))
}

/// Folds one `Name: Value` line into `response`, trimming surrounding
/// whitespace. `Set-Cookie` goes to the multi-valued list, anything else is
/// last-write-wins. Lines without a colon are skipped.
pub(crate) fn absorb_header_line(response: &mut Response, line: &str) {
    let line = line.trim_end_matches('\r');
    let Some((name, value)) = line.split_once(':') else {
        return;
    };
    let name = name.trim();
    let value = value.trim();
    if name.eq_ignore_ascii_case("Set-Cookie") {
        response.set_cookies.push(value.to_string());
    } else {
        response.headers.set(name, value);
    }
}

/// Parses a hex chunk-size line, ignoring chunk extensions.
pub(crate) fn parse_chunk_size(line: &str) -> Result<usize> {
    let line = line.trim();
    let digits = line
        .split(|c| c == ';' || c == ' ')
        .next()
        .unwrap_or_default();
    usize::from_str_radix(digits, 16)
        .map_err(|_| Error::MalformedResponse("bad chunk size"))
}

/// Fresh random 16-byte key, base64-encoded, for `Sec-WebSocket-Key`.
pub(crate) fn generate_ws_key() -> String {
    let raw: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(raw)
}

/// Expected `Sec-WebSocket-Accept` for `key` per RFC 6455 section 4.2.2.
pub(crate) fn accept_digest(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
    BASE64_STANDARD.encode(sha1.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(method: &str, websocket: bool) -> RequestPlan {
        RequestPlan {
            method: method.to_string(),
            host: "api.example".to_string(),
            endpoint: "v1/data".to_string(),
            headers: Headers::new(),
            body: Bytes::from_static(b"payload"),
            websocket,
        }
    }

    fn as_text(prepared: &PreparedRequest) -> String {
        String::from_utf8(prepared.bytes.clone()).unwrap()
    }

    #[test]
    fn get_request_carries_defaults() {
        let prepared = build_request(&plan("GET", false), &ClientConfig::default()).unwrap();
        let text = as_text(&prepared);
        assert!(text.starts_with("GET /v1/data HTTP/1.1\r\n"));
        assert!(text.contains("Accept: */*\r\n"));
        assert!(text.contains("Host: api.example\r\n"));
        assert!(text.contains("Connection: Keep-Alive\r\n"));
        assert!(text.contains("User-Agent: webwire/"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(prepared.ws_key.is_none());
    }

    #[test]
    fn post_request_appends_length_and_body() {
        let prepared = build_request(&plan("POST", false), &ClientConfig::default()).unwrap();
        let text = as_text(&prepared);
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.ends_with("\r\n\r\npayload"));
    }

    #[test]
    fn caller_headers_are_not_clobbered() {
        let mut request = plan("GET", false);
        request.headers.set("Accept", "application/json");
        request.headers.set("Host", "override.example");
        let prepared = build_request(&request, &ClientConfig::default()).unwrap();
        let text = as_text(&prepared);
        assert!(text.contains("Accept: application/json\r\n"));
        assert!(text.contains("Host: override.example\r\n"));
        assert!(!text.contains("api.example"));
    }

    #[test]
    fn client_id_is_injected_when_configured() {
        let config = ClientConfig::default().client_id("unit-9");
        let text = as_text(&build_request(&plan("GET", false), &config).unwrap());
        assert!(text.contains("ClientId: unit-9\r\n"));
    }

    #[test]
    fn websocket_request_carries_upgrade_headers() {
        let prepared = build_request(&plan("GET", true), &ClientConfig::default()).unwrap();
        let text = as_text(&prepared);
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        let key = prepared.ws_key.expect("handshake key");
        assert!(text.contains(&format!("Sec-WebSocket-Key: {key}\r\n")));
        // 16 random bytes, base64.
        assert_eq!(BASE64_STANDARD.decode(&key).unwrap().len(), 16);
        // No body on upgrade requests.
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn fresh_key_per_handshake() {
        let a = build_request(&plan("GET", true), &ClientConfig::default()).unwrap();
        let b = build_request(&plan("GET", true), &ClientConfig::default()).unwrap();
        assert_ne!(a.ws_key, b.ws_key);
    }

    #[test]
    fn parses_status_line_with_and_without_message() {
        assert_eq!(
            parse_status_line("HTTP/1.1 200 OK").unwrap(),
            ("HTTP/1.1".to_string(), 200, "OK".to_string())
        );
        assert_eq!(
            parse_status_line("HTTP/1.1 204").unwrap(),
            ("HTTP/1.1".to_string(), 204, String::new())
        );
        assert!(parse_status_line("ICY 200 OK").is_err());
        assert!(parse_status_line("HTTP/1.1 abc OK").is_err());
    }

    #[test]
    fn parses_header_block_with_cookies() {
        let block = b"HTTP/1.1 200 OK\r\n\
            Content-Type:  text/plain \r\n\
            Set-Cookie: a=1\r\n\
            Set-Cookie: b=2\r\n\
            content-type: text/html\r\n\
            \r\n";
        let response = parse_response_head(block).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.status_message, "OK");
        // Last write wins, lookup case-insensitive.
        assert_eq!(response.headers.get("Content-Type"), Some("text/html"));
        assert_eq!(response.set_cookies, vec!["a=1", "b=2"]);
        assert_eq!(response.headers.len(), 1);
    }

    #[test]
    fn header_lines_without_colon_are_skipped() {
        let mut response = Response::default();
        absorb_header_line(&mut response, "garbage line");
        assert!(response.headers.is_empty());
    }

    #[test]
    fn chunk_size_parsing() {
        assert_eq!(parse_chunk_size("1a\r").unwrap(), 0x1a);
        assert_eq!(parse_chunk_size("FF").unwrap(), 0xff);
        assert_eq!(parse_chunk_size("0").unwrap(), 0);
        assert_eq!(parse_chunk_size("ff;ext=1").unwrap(), 0xff);
        assert!(parse_chunk_size("xyz").is_err());
        assert!(parse_chunk_size("").is_err());
    }

    #[test]
    fn accept_digest_matches_rfc_example() {
        // Key and digest from RFC 6455 section 1.3.
        assert_eq!(
            accept_digest("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
