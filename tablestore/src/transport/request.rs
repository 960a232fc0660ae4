//! Raw HTTP/1.1 request construction (spec.md section 4.3, "Request write").
//!
//! The request line, the caller's headers and the fixed fixed-header block
//! are plain `String`/`Vec<u8>` content turned into [`Piece`]s; the body is
//! whatever [`Pieces`] the caller already produced (the protobuf-encoded
//! request). Nothing here copies the body — it's appended to the header
//! pieces by reference, matching spec.md's "request buffer is a `Pieces`
//! sequence composed of borrowed slices ... and a cached fixed header block".

use crate::mempool::{Piece, Pieces};

/// One request header line (already CRLF-free); `name`/`value` are joined as
/// `name: value`.
#[derive(Debug, Clone)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Builds the full wire representation of one HTTP/1.1 request:
/// ```text
/// POST <path> HTTP/1.1\r\n
/// <headers, CRLF-separated>\r\n
/// Host: <host>:<port>\r\n
/// \r\n
/// <body>
/// ```
pub fn build_request(path: &str, host: &str, port: u16, headers: &[Header], body: Pieces) -> Pieces {
    let mut head = String::with_capacity(256);
    head.push_str("POST ");
    head.push_str(path);
    head.push_str(" HTTP/1.1\r\n");
    for h in headers {
        head.push_str(&h.name);
        head.push_str(": ");
        head.push_str(&h.value);
        head.push_str("\r\n");
    }
    head.push_str("Host: ");
    head.push_str(host);
    head.push(':');
    head.push_str(&port.to_string());
    head.push_str("\r\n\r\n");

    let mut pieces = Pieces::new();
    pieces.push(Piece::from(head.into_bytes()));
    for piece in body.iter() {
        pieces.push(piece.clone());
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn builds_request_line_headers_and_body_in_order() {
        let mut body = Pieces::new();
        body.push(Piece::from(Bytes::from_static(b"payload")));
        let headers = vec![Header::new("Content-Length", "7"), Header::new("x-ots-date", "now")];
        let req = build_request("/PutRow", "example.com", 80, &headers, body);
        let full = req.to_contiguous();
        let text = String::from_utf8(full).unwrap();
        assert!(text.starts_with("POST /PutRow HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.contains("Host: example.com:80\r\n"));
        assert!(text.ends_with("\r\n\r\npayload"));
    }
}
