//! Parsed HTTP/1.1 message types.

use std::collections::HashMap;

/// Header names are lowercased on insertion; duplicate names overwrite
/// (last one wins), matching the original server's single-valued header
/// table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderMap {
    entries: HashMap<String, String>,
}

impl HeaderMap {
    /// An empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `name: value`, lowercasing the name and trimming the value
    /// of leading/trailing spaces and tabs.
    pub fn insert(&mut self, name: &str, value: &str) {
        self.entries.insert(name.to_ascii_lowercase(), value.trim_matches([' ', '\t']).to_string());
    }

    /// Looks up a header by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Case-insensitive header value comparison.
    pub fn value_eq_ignore_case(&self, name: &str, expected: &str) -> bool {
        self.get(name).is_some_and(|v| v.eq_ignore_ascii_case(expected))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(lowercased name, trimmed value)` pairs in
    /// unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// An HTTP/1.1 request line plus headers plus body, as produced by
/// [`crate::parser::RequestParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method, verbatim (not validated against a known set).
    pub method: String,
    /// Request target, verbatim.
    pub path: String,
    /// `HTTP/1.0` or `HTTP/1.1`.
    pub version: String,
    /// Parsed headers.
    pub headers: HeaderMap,
    /// Message body, decoded from chunked transfer-encoding if present.
    pub body: Vec<u8>,
    /// Whether the connection should be kept open after this request,
    /// per the version/`Connection` header rules in the parser.
    pub keep_alive: bool,
}

impl HttpRequest {
    /// Re-serializes this request to wire form.
    ///
    /// Used by the proxy role (§4.2, §4.6 step 5): once a request has
    /// been parsed off the client connection, it is written back out
    /// verbatim to the upstream rather than forwarded as the original
    /// bytes, since chunked bodies have already been decoded and the
    /// buffer they arrived in may also hold the start of a pipelined
    /// second request. The body is always reframed with a fresh
    /// `Content-Length`, so a chunked request becomes a fixed-length one
    /// on the wire to the upstream.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in self.headers.iter() {
            if name == "content-length" || name == "transfer-encoding" {
                continue;
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// A parsed HTTP/1.1 status line plus headers plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// `HTTP/1.0` or `HTTP/1.1`.
    pub version: String,
    /// Numeric status code.
    pub status_code: u16,
    /// Reason phrase, verbatim.
    pub reason_phrase: String,
    /// Parsed headers.
    pub headers: HeaderMap,
    /// Message body, decoded from chunked transfer-encoding if present.
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut h = HeaderMap::new();
        h.insert("Content-Type", " application/json ");
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn duplicate_names_overwrite() {
        let mut h = HeaderMap::new();
        h.insert("X-A", "1");
        h.insert("x-a", "2");
        assert_eq!(h.get("X-A"), Some("2"));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn to_wire_bytes_reframes_with_fresh_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert("Host", "example.com");
        headers.insert("Transfer-Encoding", "chunked");
        let req = HttpRequest {
            method: "POST".to_string(),
            path: "/api/upload".to_string(),
            version: "HTTP/1.1".to_string(),
            headers,
            body: b"a=1&b=2&".to_vec(),
            keep_alive: true,
        };
        let wire = req.to_wire_bytes();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("POST /api/upload HTTP/1.1\r\n"));
        assert!(text.contains("content-length: 8\r\n"));
        assert!(!text.to_ascii_lowercase().contains("transfer-encoding"));
        assert!(text.ends_with("a=1&b=2&"));
    }
}
