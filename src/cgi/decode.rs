//! Decoding of raw script output into status, headers and body.
//!
//! # Data Flow
//! ```text
//! stdout bytes
//!     → with_default_status (prefix `HTTP/1.1 200 OK` unless the script wrote its own)
//!     → decode (httparse framing, header unfolding, `Status:` override)
//!     → ParsedResponse
//! ```
//!
//! # Design Decisions
//! - A status line, at least one header and a non-empty body are all required
//! - Header names are lower-cased, values trimmed
//! - `Content-Length`, when present, bounds the body

use bytes::Bytes;

use crate::cgi::error::GatewayError;

/// Status line placed in front of script output that has none.
pub const DEFAULT_STATUS_LINE: &[u8] = b"HTTP/1.1 200 OK\r\n";

const INITIAL_HEADER_SLOTS: usize = 32;
const MAX_HEADER_SLOTS: usize = 1024;

/// Structured form of a script response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub status: u16,
    pub headers: Vec<(Bytes, Bytes)>,
    pub body: Bytes,
}

impl ParsedResponse {
    /// First value of the header `name` (lower-case).
    pub fn header(&self, name: &str) -> Option<&Bytes> {
        self.headers
            .iter()
            .find(|(key, _)| key.as_ref() == name.as_bytes())
            .map(|(_, value)| value)
    }
}

/// Prefix `stdout` with [`DEFAULT_STATUS_LINE`] unless it already starts
/// with an `HTTP/` status line.
pub fn with_default_status(stdout: &[u8]) -> Bytes {
    if stdout.starts_with(b"HTTP/") {
        return Bytes::copy_from_slice(stdout);
    }
    let mut raw = Vec::with_capacity(DEFAULT_STATUS_LINE.len() + stdout.len());
    raw.extend_from_slice(DEFAULT_STATUS_LINE);
    raw.extend_from_slice(stdout);
    Bytes::from(raw)
}

/// Parse `status-line CRLF *(header CRLF) CRLF body`.
pub fn decode(raw: Bytes) -> Result<ParsedResponse, GatewayError> {
    let mut slots = INITIAL_HEADER_SLOTS;
    loop {
        match decode_with_slots(&raw, slots) {
            Err(DecodeFailure::TooManyHeaders) if slots < MAX_HEADER_SLOTS => slots *= 2,
            Err(DecodeFailure::TooManyHeaders) => {
                return Err(GatewayError::MalformedResponse("too many headers".into()))
            }
            Err(DecodeFailure::Invalid(reason)) => {
                return Err(GatewayError::MalformedResponse(reason))
            }
            Ok(parsed) => return Ok(parsed),
        }
    }
}

enum DecodeFailure {
    TooManyHeaders,
    Invalid(String),
}

fn decode_with_slots(raw: &Bytes, slots: usize) -> Result<ParsedResponse, DecodeFailure> {
    let mut headers = vec![httparse::EMPTY_HEADER; slots];
    let mut response = httparse::Response::new(&mut headers);

    let mut parser = httparse::ParserConfig::default();
    parser.allow_obsolete_multiline_headers_in_responses(true);

    let body_start = match parser.parse_response(&mut response, raw) {
        Ok(httparse::Status::Complete(offset)) => offset,
        Ok(httparse::Status::Partial) => {
            return Err(DecodeFailure::Invalid("incomplete header block".into()))
        }
        Err(httparse::Error::TooManyHeaders) => return Err(DecodeFailure::TooManyHeaders),
        Err(e) => return Err(DecodeFailure::Invalid(e.to_string())),
    };

    let mut status = response
        .code
        .ok_or_else(|| DecodeFailure::Invalid("missing status code".into()))?;

    let mut parsed_headers = Vec::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let name = header.name.to_ascii_lowercase();
        let value = unfold(header.value);
        if name == "status" {
            status = parse_status_header(&value)?;
            continue;
        }
        parsed_headers.push((Bytes::from(name), Bytes::from(value)));
    }

    if status < 200 {
        return Err(DecodeFailure::Invalid(format!("informational status {status}")));
    }
    if parsed_headers.is_empty() {
        return Err(DecodeFailure::Invalid("missing header block".into()));
    }

    let mut body = raw.slice(body_start..);
    let declared = parsed_headers
        .iter()
        .find(|(name, _)| name.as_ref() == b"content-length")
        .and_then(|(_, value)| std::str::from_utf8(value).ok())
        .and_then(|value| value.trim().parse::<usize>().ok());
    if let Some(length) = declared {
        body.truncate(length);
    }
    if body.is_empty() {
        return Err(DecodeFailure::Invalid("missing body".into()));
    }

    Ok(ParsedResponse {
        status,
        headers: parsed_headers,
        body,
    })
}

/// `Status: 404 Not Found` → 404.
fn parse_status_header(value: &[u8]) -> Result<u16, DecodeFailure> {
    value
        .get(..3)
        .and_then(|code| std::str::from_utf8(code).ok())
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..=999).contains(code))
        .ok_or_else(|| {
            DecodeFailure::Invalid(format!(
                "invalid Status header {:?}",
                String::from_utf8_lossy(value)
            ))
        })
}

/// Replace obs-fold line breaks with a single space and trim.
fn unfold(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let mut bytes = value.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte == b'\r' || byte == b'\n' {
            while matches!(bytes.peek(), Some(b'\r' | b'\n' | b' ' | b'\t')) {
                bytes.next();
            }
            out.push(b' ');
        } else {
            out.push(byte);
        }
    }
    out.trim_ascii().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let parsed = decode(Bytes::from_static(
            b"HTTP/1.1 200 ok\r\nContent-Type: text/html\r\n\r\nbody",
        ))
        .unwrap();
        assert_eq!(parsed.status, 200);
        assert!(parsed
            .headers
            .contains(&(Bytes::from_static(b"content-type"), Bytes::from_static(b"text/html"))));
        assert_eq!(parsed.body, Bytes::from_static(b"body"));
    }

    #[test]
    fn test_synthesized_status_line() {
        let raw = with_default_status(b"content-type: text/plain\r\nx-special: haha\r\n\r\nhello\n");
        assert!(raw.starts_with(DEFAULT_STATUS_LINE));
        let parsed = decode(raw).unwrap();
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.header("x-special").unwrap().as_ref(), b"haha");
        assert_eq!(parsed.body.as_ref(), b"hello\n");
    }

    #[test]
    fn test_existing_status_line_kept() {
        let raw = with_default_status(b"HTTP/1.0 201 Created\r\nX-A: b\r\n\r\nok");
        assert_eq!(decode(raw).unwrap().status, 201);
    }

    #[test]
    fn test_bare_lf_line_endings() {
        let raw = with_default_status(b"Content-Type: text/plain\n\nline");
        let parsed = decode(raw).unwrap();
        assert_eq!(parsed.body.as_ref(), b"line");
    }

    #[test]
    fn test_status_header_overrides() {
        let raw = with_default_status(b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\nmissing");
        let parsed = decode(raw).unwrap();
        assert_eq!(parsed.status, 404);
        assert!(parsed.header("status").is_none());
    }

    #[test]
    fn test_folded_header() {
        let raw = with_default_status(b"X-Long: first\r\n  second\r\n\r\nb");
        let parsed = decode(raw).unwrap();
        assert_eq!(parsed.header("x-long").unwrap().as_ref(), b"first second");
    }

    #[test]
    fn test_content_length_bounds_body() {
        let raw = with_default_status(b"Content-Length: 3\r\n\r\nabcdef");
        assert_eq!(decode(raw).unwrap().body.as_ref(), b"abc");
    }

    #[test]
    fn test_malformed_outputs() {
        let cases: [&[u8]; 5] = [
            b"no header separator at all",
            b"Content-Type: text/plain\r\n",
            b"Content-Type: text/plain\r\n\r\n",
            b"\r\nbody without headers",
            b"Status: abc\r\nX: y\r\n\r\nbody",
        ];
        for case in cases {
            let result = decode(with_default_status(case));
            assert!(
                matches!(result, Err(GatewayError::MalformedResponse(_))),
                "{:?} should be malformed",
                String::from_utf8_lossy(case)
            );
        }
    }
}
