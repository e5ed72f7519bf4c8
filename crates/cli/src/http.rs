//! Just enough HTTP/1.1 for `turnloop serve`: one request per connection,
//! `Content-Length` bodies, `Connection: close` responses.

use bytes::Bytes;
use thiserror::Error;

/// Largest request (head plus body) accepted.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("request larger than {MAX_REQUEST_BYTES} bytes")]
    TooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Bytes,
}

/// Parse a complete request from `buf`. `Ok(None)` means more bytes are
/// needed.
pub fn parse_request(buf: &[u8]) -> Result<Option<HttpRequest>, HttpError> {
    let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return if buf.len() > MAX_REQUEST_BYTES {
            Err(HttpError::TooLarge)
        } else {
            Ok(None)
        };
    };

    let head = std::str::from_utf8(&buf[..head_end]).map_err(|_| HttpError::Malformed("head is not UTF-8"))?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or(HttpError::Malformed("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(HttpError::Malformed("missing method"))?;
    let target = parts.next().ok_or(HttpError::Malformed("missing path"))?;
    if !parts.next().is_some_and(|v| v.starts_with("HTTP/1.")) {
        return Err(HttpError::Malformed("unsupported version"));
    }

    let mut content_length = 0usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(HttpError::Malformed("bad header line"));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| HttpError::Malformed("bad content-length"))?;
        }
    }

    let body_start = head_end + 4;
    let body_end = match body_start.checked_add(content_length) {
        Some(end) if end <= MAX_REQUEST_BYTES => end,
        _ => return Err(HttpError::TooLarge),
    };
    if buf.len() < body_end {
        return Ok(None);
    }

    // Query strings are not part of the route key.
    let path = target.split('?').next().unwrap_or(target);
    Ok(Some(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        body: Bytes::copy_from_slice(&buf[body_start..body_end]),
    }))
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        _ => "Internal Server Error",
    }
}

/// Serialize a `text/plain` response.
pub fn response(status: u16, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reason(status),
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get() {
        let req = parse_request(b"GET /health?x=1 HTTP/1.1\r\nHost: a\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/health");
        assert!(req.body.is_empty());
    }

    #[test]
    fn waits_for_the_whole_body() {
        let partial = b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel";
        assert_eq!(parse_request(partial).unwrap(), None);
        let full = b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        assert_eq!(parse_request(full).unwrap().unwrap().body, Bytes::from_static(b"hello"));
    }

    #[test]
    fn incomplete_head_needs_more() {
        assert_eq!(parse_request(b"GET / HTTP/1.1\r\n").unwrap(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_request(b"nonsense\r\n\r\n").is_err());
        assert_eq!(
            parse_request(b"GET / SPDY/3\r\n\r\n").unwrap_err(),
            HttpError::Malformed("unsupported version")
        );
    }

    #[test]
    fn rejects_oversized_bodies() {
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_REQUEST_BYTES);
        assert_eq!(parse_request(head.as_bytes()).unwrap_err(), HttpError::TooLarge);
    }

    #[test]
    fn content_length_near_usize_max_is_too_large() {
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", usize::MAX);
        assert_eq!(parse_request(head.as_bytes()).unwrap_err(), HttpError::TooLarge);
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", usize::MAX - 10);
        assert_eq!(parse_request(head.as_bytes()).unwrap_err(), HttpError::TooLarge);
    }

    #[test]
    fn response_has_length_and_close() {
        let out = String::from_utf8(response(404, b"no route")).unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains("Content-Length: 8\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("\r\n\r\nno route"));
    }
}
