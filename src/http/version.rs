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

//! HTTP version token, trimmed to `HTTP/1.0` and `HTTP/1.1` (no HTTP/2 or
//! HTTP/3 support).

use std::fmt::Display;

/// The version named on the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// `HTTP/1.0` (no persistent connections unless `Connection: keep-alive`
    /// is present).
    Http10,
    /// `HTTP/1.1` (persistent connections unless `Connection: close` is
    /// present).
    Http11,
}

impl HttpVersion {
    /// Parses a version token (e.g. `b"HTTP/1.1"`).
    pub fn parse(token: &[u8]) -> Option<Self> {
        match token {
            b"HTTP/1.0" => Some(Self::Http10),
            b"HTTP/1.1" => Some(Self::Http11),
            _ => None,
        }
    }

    /// Whether this version defaults to persistent connections absent an
    /// explicit `Connection` header.
    pub fn keep_alive_by_default(self) -> bool {
        matches!(self, Self::Http11)
    }
}

impl Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_versions() {
        assert_eq!(HttpVersion::parse(b"HTTP/1.1"), Some(HttpVersion::Http11));
        assert_eq!(HttpVersion::parse(b"HTTP/1.0"), Some(HttpVersion::Http10));
    }

    #[test]
    fn rejects_http2_and_garbage() {
        assert_eq!(HttpVersion::parse(b"HTTP/2"), None);
        assert_eq!(HttpVersion::parse(b"bogus"), None);
    }
}
