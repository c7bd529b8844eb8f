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

//! HTTP/1.x request model and header-section parser

use std::collections::HashMap;

use super::{Method, ParseError, Version};

/// Position of the first `CRLF CRLF` header terminator, if present.
#[inline]
pub(crate) fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

/// A parsed HTTP/1.x request head.
///
/// Header names are lowercased and duplicates resolve last-writer-wins. The
/// body is buffered by the connection but never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Request target. An absent target defaults to `/`.
    pub path: String,
    /// Protocol version from the request line.
    pub version: Version,
    /// Header fields, keyed by lowercased name.
    pub headers: HashMap<String, String>,
    /// Reserved for request payloads; not populated by the header parser.
    pub body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::Get,
            path: String::new(),
            version: Version::H1_1,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }
}

impl Request {
    /// Parses the header section of a request out of `buf`.
    ///
    /// `buf` must contain the full head up to `CRLF CRLF`; bytes past the
    /// terminator are ignored. The request line must split on whitespace
    /// into exactly three tokens. Header lines without a colon are skipped,
    /// values have leading spaces and tabs trimmed.
    ///
    /// # Example
    /// ```
    /// # use reaktor::http::{Method, Version, ParseError};
    /// # use reaktor::http::request::Request;
    /// # fn main() -> Result<(), ParseError> {
    /// let req = Request::parse(b"GET / HTTP/1.1\r\nHost: example.org\r\n\r\n")?;
    /// assert_eq!(Method::Get, req.method);
    /// assert_eq!("/", req.path);
    /// assert_eq!(Version::H1_1, req.version);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let end = header_end(buf).ok_or(ParseError::Incomplete)?;
        let head = std::str::from_utf8(&buf[..end]).map_err(|_| ParseError::Encoding)?;

        let mut lines = head.split("\r\n");
        let request_line = lines.next().ok_or(ParseError::RequestLine)?;

        let tokens: Vec<&str> = request_line.split_whitespace().collect();
        if tokens.len() != 3 {
            return Err(ParseError::RequestLine);
        }
        let (method, path, version) = (tokens[0], tokens[1], tokens[2]);

        let mut request = Request {
            method: method.parse()?,
            path: path.to_owned(),
            version: version.parse()?,
            ..Request::default()
        };
        if request.path.is_empty() {
            request.path.push('/');
        }

        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            request.headers.insert(
                name.to_ascii_lowercase(),
                value.trim_start_matches(|c| c == ' ' || c == '\t').to_owned(),
            );
        }

        Ok(request)
    }
}
