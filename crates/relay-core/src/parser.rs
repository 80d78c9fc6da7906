//! Incremental HTTP/1.1 parser.
//!
//! Each call to [`RequestParser::parse`] / [`ResponseParser::parse`] takes
//! the *entire* currently unconsumed view of a connection's input buffer,
//! not just newly arrived bytes. A call that returns [`Outcome::NeedMore`]
//! carries no parser state forward — the caller simply appends more bytes
//! to the buffer and calls `parse` again over the (larger) view. This
//! mirrors the observation that a parse attempt which can't complete is
//! equivalent to starting over with a fresh parser once more data has
//! arrived, so there is nothing to resume.

use crate::message::{HeaderMap, HttpRequest, HttpResponse};

/// Result of one parse attempt over a buffer view.
#[derive(Debug)]
pub enum Outcome<T> {
    /// A full message was parsed. `consumed` is the number of bytes from
    /// the start of the view that make up this message; the caller should
    /// consume exactly that many bytes from its input buffer.
    Complete {
        /// The parsed message.
        message: T,
        /// Bytes consumed from the front of the view.
        consumed: usize,
    },
    /// Not enough bytes yet; call again once more data has arrived.
    NeedMore,
    /// The view contains a malformed message; the connection should be
    /// closed without a response.
    Bad,
}

enum BodyOutcome {
    Done { body: Vec<u8>, consumed: usize },
    NeedMore,
    Bad,
}

/// Finds the next CRLF-terminated line starting at `pos`.
///
/// Returns the line (excluding the CRLF) and the position just past the
/// CRLF, or `None` if no CRLF is present yet in `view[pos..]`.
fn read_line(view: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = &view[pos..];
    let idx = memchr::memmem::find(rest, b"\r\n")?;
    Some((&rest[..idx], pos + idx + 2))
}

/// Parses headers starting at `pos` until a bare CRLF. Returns the header
/// map and the position just past the terminating blank line.
fn parse_headers(view: &[u8], mut pos: usize) -> Result<Option<(HeaderMap, usize)>, ()> {
    let mut headers = HeaderMap::new();
    loop {
        let Some((line, next_pos)) = read_line(view, pos) else {
            return Ok(None);
        };
        pos = next_pos;
        if line.is_empty() {
            return Ok(Some((headers, pos)));
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            tracing::trace!(line = %String::from_utf8_lossy(line), "header line missing colon");
            return Err(());
        };
        let Ok(name) = std::str::from_utf8(&line[..colon]) else {
            tracing::trace!("header name is not valid utf-8");
            return Err(());
        };
        let Ok(value) = std::str::from_utf8(&line[colon + 1..]) else {
            tracing::trace!("header value is not valid utf-8");
            return Err(());
        };
        headers.insert(name, value);
    }
}

fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    if line.is_empty() || !line.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let s = std::str::from_utf8(line).ok()?;
    usize::from_str_radix(s, 16).ok()
}

fn parse_chunked_body(view: &[u8], mut pos: usize) -> BodyOutcome {
    let mut body = Vec::new();
    loop {
        let Some((size_line, after_size_line)) = read_line(view, pos) else {
            return BodyOutcome::NeedMore;
        };
        let Some(size) = parse_chunk_size(size_line) else {
            tracing::trace!(line = %String::from_utf8_lossy(size_line), "invalid chunk size line");
            return BodyOutcome::Bad;
        };
        pos = after_size_line;
        if size == 0 {
            // Final chunk: a single trailing CRLF ends the message. Chunk
            // trailers are not supported.
            let Some((trailer, after_trailer)) = read_line(view, pos) else {
                return BodyOutcome::NeedMore;
            };
            if !trailer.is_empty() {
                return BodyOutcome::Bad;
            }
            return BodyOutcome::Done { body, consumed: after_trailer };
        }
        if view.len() < pos + size + 2 {
            return BodyOutcome::NeedMore;
        }
        body.extend_from_slice(&view[pos..pos + size]);
        if &view[pos + size..pos + size + 2] != b"\r\n" {
            return BodyOutcome::Bad;
        }
        pos += size + 2;
    }
}

fn parse_fixed_body(view: &[u8], pos: usize, content_length: usize) -> BodyOutcome {
    if view.len() < pos + content_length {
        return BodyOutcome::NeedMore;
    }
    BodyOutcome::Done {
        body: view[pos..pos + content_length].to_vec(),
        consumed: pos + content_length,
    }
}

/// Framing strategy selected by the header set, per RFC 7230 precedence
/// as implemented by the original server: `Content-Length` wins whenever
/// both it and `Transfer-Encoding: chunked` are present.
fn parse_body(view: &[u8], pos: usize, headers: &HeaderMap) -> BodyOutcome {
    if let Some(raw) = headers.get("content-length") {
        return match raw.parse::<usize>() {
            Ok(len) => parse_fixed_body(view, pos, len),
            Err(_) => BodyOutcome::Bad,
        };
    }
    if headers.value_eq_ignore_case("transfer-encoding", "chunked") {
        return parse_chunked_body(view, pos);
    }
    BodyOutcome::Done { body: Vec::new(), consumed: pos }
}

fn request_keep_alive(version: &str, headers: &HeaderMap) -> bool {
    if version.eq_ignore_ascii_case("HTTP/1.1") {
        !headers.value_eq_ignore_case("connection", "close")
    } else {
        headers.value_eq_ignore_case("connection", "keep-alive")
    }
}

/// Parses HTTP/1.1 request messages.
pub struct RequestParser;

impl RequestParser {
    /// Attempts to parse one request from the front of `view`.
    pub fn parse(view: &[u8]) -> Outcome<HttpRequest> {
        let Some((line, after_line)) = read_line(view, 0) else {
            return Outcome::NeedMore;
        };
        let Ok(line_str) = std::str::from_utf8(line) else {
            return Outcome::Bad;
        };
        let mut parts = line_str.splitn(3, ' ');
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) if !m.is_empty() && !p.is_empty() => (m, p, v),
            _ => {
                tracing::trace!(line = line_str, "malformed request line");
                return Outcome::Bad;
            }
        };
        if version != "HTTP/1.0" && version != "HTTP/1.1" {
            tracing::trace!(version, "unsupported HTTP version");
            return Outcome::Bad;
        }

        let (headers, after_headers) = match parse_headers(view, after_line) {
            Ok(Some(h)) => h,
            Ok(None) => return Outcome::NeedMore,
            Err(()) => return Outcome::Bad,
        };

        let keep_alive = request_keep_alive(version, &headers);

        match parse_body(view, after_headers, &headers) {
            BodyOutcome::Done { body, consumed } => Outcome::Complete {
                message: HttpRequest {
                    method: method.to_string(),
                    path: path.to_string(),
                    version: version.to_string(),
                    headers,
                    body,
                    keep_alive,
                },
                consumed,
            },
            BodyOutcome::NeedMore => Outcome::NeedMore,
            BodyOutcome::Bad => Outcome::Bad,
        }
    }
}

/// Parses HTTP/1.1 response messages (status line, headers, body).
pub struct ResponseParser;

impl ResponseParser {
    /// Attempts to parse one response from the front of `view`.
    pub fn parse(view: &[u8]) -> Outcome<HttpResponse> {
        let Some((line, after_line)) = read_line(view, 0) else {
            return Outcome::NeedMore;
        };
        let line_str = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => {
                tracing::trace!("status line is not valid utf-8");
                return Outcome::Bad;
            }
        };
        let mut parts = line_str.splitn(3, ' ');
        let (version, status_code, reason_phrase) = match (parts.next(), parts.next(), parts.next()) {
            (Some(v), Some(code), reason) if !v.is_empty() => (v, code, reason.unwrap_or("")),
            _ => {
                tracing::trace!(line = line_str, "malformed status line");
                return Outcome::Bad;
            }
        };
        let Ok(status_code) = status_code.parse::<u16>() else {
            tracing::trace!(status_code, "status code is not numeric");
            return Outcome::Bad;
        };
        if version != "HTTP/1.0" && version != "HTTP/1.1" {
            tracing::trace!(version, "unsupported HTTP version");
            return Outcome::Bad;
        }

        let (headers, after_headers) = match parse_headers(view, after_line) {
            Ok(Some(h)) => h,
            Ok(None) => return Outcome::NeedMore,
            Err(()) => return Outcome::Bad,
        };

        match parse_body(view, after_headers, &headers) {
            BodyOutcome::Done { body, consumed } => Outcome::Complete {
                message: HttpResponse {
                    version: version.to_string(),
                    status_code,
                    reason_phrase: reason_phrase.to_string(),
                    headers,
                    body,
                },
                consumed,
            },
            BodyOutcome::NeedMore => Outcome::NeedMore,
            BodyOutcome::Bad => Outcome::Bad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_request(view: &[u8]) -> (HttpRequest, usize) {
        match RequestParser::parse(view) {
            Outcome::Complete { message, consumed } => (message, consumed),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn parses_simple_get() {
        let input = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, consumed) = complete_request(input);
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.headers.get("host"), Some("x"));
        assert!(req.body.is_empty());
        assert!(req.keep_alive);
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn reports_need_more_on_partial_headers() {
        let input = b"GET / HTTP/1.1\r\nHost: x\r\n";
        assert!(matches!(RequestParser::parse(input), Outcome::NeedMore));
    }

    #[test]
    fn reports_need_more_on_partial_body() {
        let input = b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(RequestParser::parse(input), Outcome::NeedMore));
    }

    #[test]
    fn fixed_length_body_is_captured() {
        let input = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (req, consumed) = complete_request(input);
        assert_eq!(req.body, b"hello");
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn chunked_body_is_decoded() {
        let input = b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\na=1&b\r\n3\r\n=2&\r\n0\r\n\r\n";
        let (req, consumed) = complete_request(input);
        assert_eq!(req.body, b"a=1&b=2&");
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn content_length_wins_over_chunked_when_both_present() {
        let input = b"POST /x HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\nabcXXXX";
        let (req, consumed) = complete_request(input);
        assert_eq!(req.body, b"abc");
        assert_eq!(consumed, input.len() - 4);
    }

    #[test]
    fn missing_colon_in_header_is_bad() {
        let input = b"GET / HTTP/1.1\r\nBroken Header\r\n\r\n";
        assert!(matches!(RequestParser::parse(input), Outcome::Bad));
    }

    #[test]
    fn bad_chunk_size_is_bad() {
        let input = b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nZZ\r\n";
        assert!(matches!(RequestParser::parse(input), Outcome::Bad));
    }

    #[test]
    fn http10_defaults_to_close() {
        let input = b"GET / HTTP/1.0\r\n\r\n";
        let (req, _) = complete_request(input);
        assert!(!req.keep_alive);
    }

    #[test]
    fn http10_keep_alive_header_honored() {
        let input = b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n";
        let (req, _) = complete_request(input);
        assert!(req.keep_alive);
    }

    #[test]
    fn http11_connection_close_honored() {
        let input = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        let (req, _) = complete_request(input);
        assert!(!req.keep_alive);
    }

    #[test]
    fn pipelined_requests_parse_one_at_a_time() {
        let input = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (first, consumed1) = complete_request(input);
        assert_eq!(first.path, "/a");
        let (second, consumed2) = complete_request(&input[consumed1..]);
        assert_eq!(second.path, "/b");
        assert_eq!(consumed1 + consumed2, input.len());
    }

    #[test]
    fn split_feed_matches_single_shot_feed() {
        let whole: &[u8] = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n";
        // Simulate bytes trickling in: repeatedly re-parse the growing
        // prefix, exactly as the connection handler would over several
        // read-ready events.
        let mut delivered = Vec::new();
        let mut last = Outcome::NeedMore;
        for &b in whole {
            delivered.push(b);
            last = RequestParser::parse(&delivered);
            if matches!(last, Outcome::Complete { .. }) {
                break;
            }
        }
        match last {
            Outcome::Complete { message, consumed } => {
                assert_eq!(message.path, "/a");
                assert_eq!(consumed, whole.len());
            }
            other => panic!("expected eventual completion, got {other:?}"),
        }
    }

    #[test]
    fn parses_response_status_line() {
        let input = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
        match ResponseParser::parse(input) {
            Outcome::Complete { message, consumed } => {
                assert_eq!(message.status_code, 200);
                assert_eq!(message.reason_phrase, "OK");
                assert_eq!(message.body, b"hi");
                assert_eq!(consumed, input.len());
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }
}
