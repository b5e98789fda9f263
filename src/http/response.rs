// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Response synthesizer: given a request and a document root, synthesizes
//! headers into the write buffer and optionally attaches a memory-mapped
//! file region as a second gather-write segment.
//!
//! Status codes are trimmed to the handful this crate emits. Static file
//! responses resolve the request path against a document root, guard
//! against `..` traversal, and `mmap` regular files read-only for the
//! response body.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::request::Request;

/// Status codes this crate's response synthesizer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::InternalServerError => 500,
            Self::ServiceUnavailable => 503,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::InternalServerError => "Internal Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// A synthesized response: a header block plus an optional memory-mapped
/// file body, gathered together by [`crate::buffer::ConnBuffer::write_fd`].
#[derive(Debug)]
pub struct Response {
    pub(crate) header_bytes: Vec<u8>,
    pub(crate) mapped: Option<Mmap>,
    pub(crate) keep_alive: bool,
}

impl Response {
    /// Total bytes this response will put on the wire.
    pub fn total_bytes(&self) -> usize {
        self.header_bytes.len() + self.mapped.as_ref().map_or(0, |m| m.len())
    }

    /// Builds a response carrying `body` as the entity (used for generated
    /// error bodies and illustrative handler responses: anything that isn't
    /// a static file served via `mmap`).
    pub fn with_body(status: Status, body: &[u8], content_type: &str, keep_alive: bool) -> Self {
        let header_bytes = render_headers(status, body.len(), content_type, keep_alive, body);
        Self {
            header_bytes,
            mapped: None,
            keep_alive,
        }
    }

    fn from_mapped(status: Status, mapped: Mmap, content_type: &str, keep_alive: bool) -> Self {
        let header_bytes = render_headers(status, mapped.len(), content_type, keep_alive, &[]);
        Self {
            header_bytes,
            mapped: Some(mapped),
            keep_alive,
        }
    }
}

fn render_headers(
    status: Status,
    body_len: usize,
    content_type: &str,
    keep_alive: bool,
    inline_body: &[u8],
) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: {}\r\nConnection: {}\r\n\r\n",
        status.code(),
        status.reason(),
        body_len,
        content_type,
        if keep_alive { "keep-alive" } else { "close" },
    )
    .into_bytes();
    out.extend_from_slice(inline_body);
    out
}

/// Builds an error response with a short plain-text body, used for protocol
/// errors and resource exhaustion.
pub fn error_response(status: Status, keep_alive: bool) -> Response {
    let body = format!("{} {}", status.code(), status.reason());
    Response::with_body(status, body.as_bytes(), "text/plain", keep_alive)
}

/// Resolves `request`'s target against `doc_root` and synthesizes the
/// response: a 200 with a memory-mapped file body on success, or a 403/404
/// as appropriate. `/` maps to `index.html`. Guards against `..` path
/// traversal by requiring the resolved path to stay under `doc_root`.
pub fn serve_static_file(request: &Request, doc_root: &Path) -> Response {
    let keep_alive = request.keep_alive();
    let relative = if request.target == "/" {
        "index.html"
    } else {
        request.target.trim_start_matches('/')
    };

    let Some(resolved) = resolve_within(doc_root, relative) else {
        return error_response(Status::Forbidden, keep_alive);
    };

    let file = match File::open(&resolved) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return error_response(Status::NotFound, keep_alive)
        }
        Err(_) => return error_response(Status::Forbidden, keep_alive),
    };

    let metadata = match file.metadata() {
        Ok(m) if m.is_file() => m,
        _ => return error_response(Status::NotFound, keep_alive),
    };

    if metadata.len() == 0 {
        return Response::with_body(Status::Ok, &[], content_type_for(&resolved), keep_alive);
    }

    // SAFETY: the file is opened read-only immediately above and is not
    // concurrently truncated by this process; the response holds the
    // mapping for its own lifetime and it is unmapped when the response (or
    // its owning connection) is dropped.
    match unsafe { Mmap::map(&file) } {
        Ok(mapped) => Response::from_mapped(Status::Ok, mapped, content_type_for(&resolved), keep_alive),
        Err(_) => error_response(Status::InternalServerError, keep_alive),
    }
}

/// Joins `doc_root` and `relative`, rejecting any path that would escape
/// `doc_root` via `..` components.
fn resolve_within(doc_root: &Path, relative: &str) -> Option<PathBuf> {
    let mut resolved = doc_root.to_path_buf();
    for component in Path::new(relative).components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn request(target: &str) -> Request {
        Request {
            method: super::super::method::HttpMethod::Get,
            target: target.to_string(),
            version: super::super::version::HttpVersion::Http11,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn serves_a_file_under_the_document_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("index.html"))
            .unwrap()
            .write_all(b"<html></html>")
            .unwrap();

        let resp = serve_static_file(&request("/"), dir.path());
        assert_eq!(resp.total_bytes(), resp.header_bytes.len() + 13);
        assert!(resp.mapped.is_some());
        assert!(String::from_utf8_lossy(&resp.header_bytes).starts_with("HTTP/1.1 200 OK"));
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let resp = serve_static_file(&request("/nope.html"), dir.path());
        assert!(String::from_utf8_lossy(&resp.header_bytes).starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn parent_dir_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let resp = serve_static_file(&request("/../../etc/passwd"), dir.path());
        assert!(String::from_utf8_lossy(&resp.header_bytes).starts_with("HTTP/1.1 403"));
    }
}
