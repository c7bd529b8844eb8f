//! Response model
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

/// Status codes emitted by the origin pipeline.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 15.3.1
    Ok = 200,
    /// 15.5.1
    BadRequest = 400,
}

impl Status {
    /// Reason phrase for the status line.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{} {}", *self as u16, self.reason()))
    }
}

/// Response model
///
/// Responses are always written as HTTP/1.1 with an explicit
/// `Content-Length`, regardless of the request's version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: Status,
    content_type: &'static str,
    body: String,
}

impl Response {
    /// Creates a plain-text response with the given status and body.
    pub fn new(status: Status, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
        }
    }

    /// Serializes the status line, headers, and body to wire bytes.
    pub fn serialize(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
            self.status,
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serializes_bad_request_verbatim() {
        let response = Response::new(Status::BadRequest, "Bad Request");
        assert_eq!(
            b"HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nContent-Length: 11\r\n\r\nBad Request"
                .as_slice(),
            response.serialize()
        );
    }

    #[test]
    fn content_length_matches_the_body() {
        let body = "Processed in thread pool. Path: /a";
        let serialized = Response::new(Status::Ok, body).serialize();
        let text = String::from_utf8(serialized).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(text.ends_with(body));
    }

    #[test]
    fn empty_body_has_zero_content_length() {
        let text = String::from_utf8(Response::new(Status::Ok, "").serialize()).unwrap();
        assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
    }
}
