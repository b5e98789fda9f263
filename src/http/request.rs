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

//! Request parser: consumes a byte slice and returns `NEED_MORE`,
//! `COMPLETE(request)`, or `BAD_REQUEST`, consuming exactly the request's
//! bytes on `COMPLETE` and none on `NEED_MORE`.
//!
//! Headers and a fixed-size body are fully parsed into an owned [`Request`],
//! at the cost of one allocation per header instead of a zero-copy view.
//! Method and version tokens are recognized by a literal byte-slice match,
//! trimmed to this crate's method and version sets.

use super::method::HttpMethod;
use super::version::HttpVersion;

/// A fully parsed HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    /// The request method.
    pub method: HttpMethod,
    /// The request target, e.g. `/index.html`.
    pub target: String,
    /// The request's HTTP version.
    pub version: HttpVersion,
    /// Header name/value pairs, in wire order, names as received (not
    /// case-normalized; callers use [`Request::header`] for lookups).
    pub headers: Vec<(String, String)>,
    /// The request body, if any (sized by `Content-Length`).
    pub body: Vec<u8>,
}

impl Request {
    /// Looks up a header by case-insensitive name, returning the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the connection should be kept alive after this response,
    /// per the `Connection` header and the version's default.
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version.keep_alive_by_default(),
        }
    }
}

/// The outcome of one parse attempt against a connection's read buffer.
#[derive(Debug)]
pub enum ParseOutcome {
    /// Not enough bytes yet; no bytes were consumed.
    NeedMore,
    /// A full request was parsed; `consumed` bytes belong to it and must be
    /// retired from the read buffer.
    Complete { request: Request, consumed: usize },
    /// The bytes present can never form a valid request.
    BadRequest,
}

const MAX_HEADER_SECTION: usize = 64 * 1024;

/// Parses one HTTP/1.x request from the head of `buf`. Never consumes bytes
/// itself; the caller retires `consumed` bytes from its own buffer only on
/// [`ParseOutcome::Complete`].
pub fn parse_request(buf: &[u8]) -> ParseOutcome {
    let Some(header_end) = find(buf, b"\r\n\r\n") else {
        if buf.len() > MAX_HEADER_SECTION {
            return ParseOutcome::BadRequest;
        }
        return ParseOutcome::NeedMore;
    };
    let header_section = &buf[..header_end];

    let Some(line_end) = find(header_section, b"\r\n") else {
        return ParseOutcome::BadRequest;
    };
    let request_line = &header_section[..line_end];

    let mut parts = request_line.split(|&b| b == b' ').filter(|s| !s.is_empty());
    let (Some(method_tok), Some(target_tok), Some(version_tok)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return ParseOutcome::BadRequest;
    };
    if parts.next().is_some() {
        return ParseOutcome::BadRequest;
    }

    let Some(method) = HttpMethod::parse(method_tok) else {
        return ParseOutcome::BadRequest;
    };
    let Some(version) = HttpVersion::parse(version_tok) else {
        return ParseOutcome::BadRequest;
    };
    let Ok(target) = std::str::from_utf8(target_tok) else {
        return ParseOutcome::BadRequest;
    };
    if !target.starts_with('/') {
        return ParseOutcome::BadRequest;
    }

    let mut headers = Vec::new();
    let mut rest = &header_section[line_end + 2..];
    while !rest.is_empty() {
        let (line, remainder) = match find(rest, b"\r\n") {
            Some(pos) => (&rest[..pos], &rest[pos + 2..]),
            None => return ParseOutcome::BadRequest,
        };
        rest = remainder;
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return ParseOutcome::BadRequest;
        };
        let (name, value) = (&line[..colon], &line[colon + 1..]);
        let Ok(name) = std::str::from_utf8(name) else {
            return ParseOutcome::BadRequest;
        };
        let Ok(value) = std::str::from_utf8(value) else {
            return ParseOutcome::BadRequest;
        };
        headers.push((name.to_string(), value.trim().to_string()));
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.trim().parse::<usize>())
        .transpose();
    let content_length = match content_length {
        Ok(len) => len.unwrap_or(0),
        Err(_) => return ParseOutcome::BadRequest,
    };

    let body_start = header_end + 4;
    let needed = body_start + content_length;
    if buf.len() < needed {
        return ParseOutcome::NeedMore;
    }

    let request = Request {
        method,
        target: target.to_string(),
        version,
        headers,
        body: buf[body_start..needed].to_vec(),
    };

    ParseOutcome::Complete {
        request,
        consumed: needed,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn need_more_on_incomplete_headers() {
        let outcome = parse_request(b"GET / HTTP/1.1\r\nHost: x");
        assert!(matches!(outcome, ParseOutcome::NeedMore));
    }

    #[test]
    fn need_more_while_body_is_still_arriving() {
        let buf = b"POST /login HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(parse_request(buf), ParseOutcome::NeedMore));
    }

    #[test]
    fn complete_parses_request_line_and_headers() {
        let buf = b"GET /index.html HTTP/1.1\r\nHost: example\r\nConnection: keep-alive\r\n\r\n";
        match parse_request(buf) {
            ParseOutcome::Complete { request, consumed } => {
                assert_eq!(request.method, HttpMethod::Get);
                assert_eq!(request.target, "/index.html");
                assert_eq!(request.version, HttpVersion::Http11);
                assert_eq!(request.header("host"), Some("example"));
                assert!(request.keep_alive());
                assert_eq!(consumed, buf.len());
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn complete_includes_body_sized_by_content_length() {
        let buf = b"POST /login HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        match parse_request(buf) {
            ParseOutcome::Complete { request, consumed } => {
                assert_eq!(request.body, b"hello");
                assert_eq!(consumed, buf.len());
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn bad_request_on_malformed_request_line() {
        let outcome = parse_request(b"GARBAGE\r\n\r\n");
        assert!(matches!(outcome, ParseOutcome::BadRequest));
    }

    #[test]
    fn bad_request_on_unsupported_version() {
        let outcome = parse_request(b"GET / HTTP/2\r\n\r\n");
        assert!(matches!(outcome, ParseOutcome::BadRequest));
    }

    #[test]
    fn connection_close_overrides_http11_default() {
        let buf = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        match parse_request(buf) {
            ParseOutcome::Complete { request, .. } => assert!(!request.keep_alive()),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn does_not_consume_bytes_belonging_to_the_next_request() {
        let buf = b"GET / HTTP/1.1\r\n\r\nGET /second HTTP/1.1\r\n\r\n";
        match parse_request(buf) {
            ParseOutcome::Complete { consumed, .. } => {
                assert_eq!(&buf[consumed..], b"GET /second HTTP/1.1\r\n\r\n");
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }
}

impl std::fmt::Display for ParseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeedMore => write!(f, "NeedMore"),
            Self::Complete { consumed, .. } => write!(f, "Complete({consumed} bytes)"),
            Self::BadRequest => write!(f, "BadRequest"),
        }
    }
}
