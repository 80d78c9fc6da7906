//! The origin server's request router: serves static files from a
//! document root, plus a tiny upload endpoint. Requested paths are
//! sanitized against `..` traversal before any filesystem access.

use std::path::{Component, Path, PathBuf};

use relay_core::HttpRequest;
use relay_net::RequestRouter;

/// Serves static files from a document root plus a tiny JSON/urlencoded
/// echo API, per §4.7.
pub struct OriginRouter {
    static_root: PathBuf,
    data_root: PathBuf,
}

impl OriginRouter {
    /// Builds a router serving files from `static_root` (GETs, and the
    /// canned error pages) and `data_root` (the upload API's error body).
    pub fn new(static_root: impl Into<PathBuf>, data_root: impl Into<PathBuf>) -> Self {
        Self { static_root: static_root.into(), data_root: data_root.into() }
    }
}

impl RequestRouter for OriginRouter {
    fn route(&self, request: &HttpRequest) -> Vec<u8> {
        let (status, content_type, body) = self.dispatch(request);
        build_http_response(status, &content_type, &body)
    }
}

impl OriginRouter {
    fn dispatch(&self, request: &HttpRequest) -> (u16, String, Vec<u8>) {
        if request.method != "GET" && request.method != "POST" {
            let body = self
                .read_static("501.html")
                .unwrap_or_else(|| b"<h1>Not Implemented</h1>".to_vec());
            return (501, "text/html".to_string(), body);
        }

        if request.method == "POST" && request.path == "/api/upload" {
            return self.handle_upload(request);
        }

        self.handle_get(request)
    }

    fn handle_upload(&self, request: &HttpRequest) -> (u16, String, Vec<u8>) {
        let content_type = request.headers.get("content-type").unwrap_or("");
        let valid = match content_type {
            "application/json" => is_well_formed_json(&request.body),
            "application/x-www-form-urlencoded" => is_well_formed_urlencoded(&request.body),
            _ => false,
        };

        if valid {
            (200, content_type.to_string(), request.body.clone())
        } else {
            let body = self.read_data("error.json").unwrap_or_else(|| b"{}".to_vec());
            (404, "application/json".to_string(), body)
        }
    }

    fn handle_get(&self, request: &HttpRequest) -> (u16, String, Vec<u8>) {
        let requested = if request.path == "/" { "/index.html" } else { request.path.as_str() };

        let Some(safe_path) = sanitize_path(requested) else {
            let body = self.read_static("404.html").unwrap_or_else(|| b"<h1>File Not Found</h1>".to_vec());
            return (404, "text/html".to_string(), body);
        };

        match self.read_relative(&self.static_root, &safe_path) {
            Some(mut body) => {
                let content_type = mime_type_for(&safe_path);
                if content_type == "application/json" {
                    body = minify_json(&body);
                }
                (200, content_type.to_string(), body)
            }
            None => {
                let body = self.read_static("404.html").unwrap_or_else(|| b"<h1>File Not Found</h1>".to_vec());
                (404, "text/html".to_string(), body)
            }
        }
    }

    fn read_static(&self, name: &str) -> Option<Vec<u8>> {
        std::fs::read(self.static_root.join(name)).ok()
    }

    fn read_data(&self, name: &str) -> Option<Vec<u8>> {
        std::fs::read(self.data_root.join(name)).ok()
    }

    fn read_relative(&self, root: &Path, relative: &Path) -> Option<Vec<u8>> {
        std::fs::read(root.join(relative)).ok()
    }
}

/// Rejects any request target containing a `..` path segment (the fix
/// DESIGN.md's Open Question 2 requires) and returns the remainder as a
/// root-relative path with its leading `/` stripped.
fn sanitize_path(requested: &str) -> Option<PathBuf> {
    let trimmed = requested.trim_start_matches('/');
    let candidate = Path::new(trimmed);
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }
    Some(candidate.to_path_buf())
}

/// Maps a file extension to the small static table from §4.7. Anything
/// else (including no extension) falls back to `text/html`.
fn mime_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        _ => "text/html",
    }
}

/// Light well-formedness check for a JSON upload body: first non-space
/// byte is `{`, last non-space byte is `}`. Deliberately not a real
/// JSON parse — just enough to reject obviously-broken bodies.
fn is_well_formed_json(body: &[u8]) -> bool {
    let trimmed = trim_ascii_whitespace(body);
    trimmed.first() == Some(&b'{') && trimmed.last() == Some(&b'}')
}

fn trim_ascii_whitespace(body: &[u8]) -> &[u8] {
    let start = body.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(body.len());
    let end = body.iter().rposition(|b| !b.is_ascii_whitespace()).map(|i| i + 1).unwrap_or(start);
    &body[start..end]
}

/// Checks the body matches `([A-Za-z0-9_]+=[^&]*&?)+` (§4.7).
fn is_well_formed_urlencoded(body: &[u8]) -> bool {
    if body.is_empty() {
        return false;
    }
    let mut rest = body;
    loop {
        let key_len = rest.iter().take_while(|&&b| b.is_ascii_alphanumeric() || b == b'_').count();
        if key_len == 0 {
            return false;
        }
        rest = &rest[key_len..];
        if rest.first() != Some(&b'=') {
            return false;
        }
        rest = &rest[1..];
        let value_len = rest.iter().take_while(|&&b| b != b'&').count();
        rest = &rest[value_len..];
        match rest.first() {
            Some(b'&') => {
                rest = &rest[1..];
                if rest.is_empty() {
                    return true;
                }
            }
            None => return true,
            Some(_) => return false,
        }
    }
}

/// Strips `\n`, `\r`, `\t` from a JSON body (§4.7's minifier).
fn minify_json(body: &[u8]) -> Vec<u8> {
    body.iter().copied().filter(|&b| b != b'\n' && b != b'\r' && b != b'\t').collect()
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        404 => "Not Found",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

/// Frames a response exactly as §4.7 specifies: status line, three
/// headers, blank line, body. `Connection: close` is unconditional.
fn build_http_response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status_text(status),
        body.len(),
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::HeaderMap;
    use std::io::Write;

    fn temp_root(files: &[(&str, &[u8])]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::File::create(path).unwrap().write_all(contents).unwrap();
        }
        dir
    }

    fn request(method: &str, path: &str, headers: &[(&str, &str)], body: &[u8]) -> HttpRequest {
        let mut h = HeaderMap::new();
        for (name, value) in headers {
            h.insert(name, value);
        }
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: h,
            body: body.to_vec(),
            keep_alive: true,
        }
    }

    #[test]
    fn simple_get_serves_index() {
        let root = temp_root(&[("index.html", b"<h1>hi</h1>")]);
        let router = OriginRouter::new(root.path(), root.path());
        let req = request("GET", "/", &[("Host", "x")], b"");
        let response = router.route(&req);
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/html\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("<h1>hi</h1>"));
    }

    #[test]
    fn unsupported_method_is_501() {
        let root = temp_root(&[("501.html", b"<p>nope</p>")]);
        let router = OriginRouter::new(root.path(), root.path());
        let req = request("DELETE", "/x", &[], b"");
        let response = router.route(&req);
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
        assert!(text.ends_with("<p>nope</p>"));
    }

    #[test]
    fn valid_json_upload_is_echoed() {
        let root = temp_root(&[]);
        let router = OriginRouter::new(root.path(), root.path());
        let req = request("POST", "/api/upload", &[("Content-Type", "application/json")], br#"{"a":"b","c":1}"#);
        let response = router.route(&req);
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with(r#"{"a":"b","c":1}"#));
    }

    #[test]
    fn invalid_json_upload_is_404() {
        let root = temp_root(&[("error.json", br#"{"error":"bad"}"#)]);
        let router = OriginRouter::new(root.path(), root.path());
        let req = request("POST", "/api/upload", &[("Content-Type", "application/json")], b"oops");
        let response = router.route(&req);
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.ends_with(r#"{"error":"bad"}"#));
    }

    #[test]
    fn urlencoded_upload_round_trips() {
        let root = temp_root(&[]);
        let router = OriginRouter::new(root.path(), root.path());
        let req = request(
            "POST",
            "/api/upload",
            &[("Content-Type", "application/x-www-form-urlencoded")],
            b"a=1&b=2&",
        );
        let response = router.route(&req);
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("a=1&b=2&"));
    }

    #[test]
    fn missing_file_is_404() {
        let root = temp_root(&[("404.html", b"<h1>File Not Found</h1>")]);
        let router = OriginRouter::new(root.path(), root.path());
        let req = request("GET", "/nope.html", &[], b"");
        let response = router.route(&req);
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.ends_with("<h1>File Not Found</h1>"));
    }

    #[test]
    fn json_files_are_minified() {
        let root = temp_root(&[("data.json", b"{\n  \"a\": 1\n}\n")]);
        let router = OriginRouter::new(root.path(), root.path());
        let req = request("GET", "/data.json", &[], b"");
        let response = router.route(&req);
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.ends_with("{  \"a\": 1}"));
    }

    #[test]
    fn path_traversal_is_rejected() {
        let root = temp_root(&[("404.html", b"nope"), ("../secret.txt", b"top secret")]);
        let router = OriginRouter::new(root.path(), root.path());
        let req = request("GET", "/../secret.txt", &[], b"");
        let response = router.route(&req);
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(!text.contains("top secret"));
    }
}
