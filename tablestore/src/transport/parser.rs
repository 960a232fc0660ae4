//! Streaming HTTP/1.1 response parser (spec.md section 4.3 / 8).
//!
//! Grounded in `examples/original_source/src/tablestore/core/http/response_reader.cpp`:
//! a small state machine walking `STATUS_LINE -> HEADERS -> {CONTENT_LENGTH_BODY |
//! CHUNKED_BODY} -> DONE`, fed one read-buffer ("piece") at a time. The C++
//! version is byte-by-byte over a `BookmarkInputStream`; this keeps the same
//! states and the same deliberate restriction — carried forward per spec.md's
//! design notes — that a status line or header line must complete within the
//! single buffer it started in. A line spanning two separate `feed` calls is
//! corruption, not "need more data"; only body bytes are allowed to span
//! feeds. That asymmetry is intentional, not an oversight: header lines are
//! bounded in practice (a few hundred bytes, one socket read), and treating a
//! split line as corruption instead of buffering it indefinitely avoids an
//! unbounded reassembly buffer for a case that should never happen with a
//! well-behaved server.

use crate::error::Error;
use crate::mempool::{Piece, Pieces};

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    StatusLine,
    Headers,
    ContentLengthBody { remaining: u64 },
    ChunkedBody(ChunkState),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { expect: u64, got: u64 },
    DataCr,
    TrailerLf0,
}

/// What the caller should do after a [`ResponseParser::feed`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The response is incomplete; feed another buffer.
    NeedMore,
    /// The response (status line, headers, body) is fully parsed.
    Done,
}

/// Incrementally parses one HTTP/1.1 response. Headers are collected
/// case-sensitively, matching the C++ original — this protocol's servers
/// always emit canonical casing, and case-insensitive lookup is pushed to
/// [`ResponseParser::header`] rather than the storage.
pub struct ResponseParser {
    state: State,
    http_status: i64,
    headers: Vec<(String, String)>,
    body: Pieces,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self { state: State::StatusLine, http_status: 0, headers: Vec::new(), body: Pieces::new() }
    }

    pub fn http_status(&self) -> i64 {
        self.http_status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &Pieces {
        &self.body
    }

    /// Feed one buffer. A buffer boundary is a hard boundary for status line
    /// / header line parsing (see module docs); body parsing may resume
    /// across calls.
    pub fn feed(&mut self, piece: &Piece) -> Result<Progress, Error> {
        let bytes = piece.as_slice();
        let mut pos = 0usize;
        loop {
            if self.state == State::Done {
                return Ok(Progress::Done);
            }
            if pos >= bytes.len() {
                return Ok(Progress::NeedMore);
            }
            match &mut self.state {
                State::StatusLine => {
                    let line_end = find_crlf(bytes, pos).ok_or_else(|| {
                        Error::corrupted_response("HTTP response is corrupted: too long status line.")
                    })?;
                    let line = &bytes[pos..line_end];
                    self.http_status = parse_status_line(line)?;
                    pos = line_end + 2;
                    self.state = State::Headers;
                }
                State::Headers => {
                    let line_end = find_crlf(bytes, pos).ok_or_else(|| {
                        Error::corrupted_response("HTTP response is corrupted: too long header line.")
                    })?;
                    if line_end == pos {
                        // blank line: end of headers, pick the body mode.
                        pos += 2;
                        self.state = self.enter_body_state()?;
                    } else {
                        let (name, value) = parse_header_line(&bytes[pos..line_end])?;
                        if self.headers.iter().any(|(k, _)| k == &name) {
                            return Err(Error::corrupted_response(
                                "HTTP response is corrupted: duplicated header field.",
                            ));
                        }
                        self.headers.push((name, value));
                        pos = line_end + 2;
                    }
                }
                State::ContentLengthBody { remaining } => {
                    if *remaining == 0 {
                        self.state = State::Done;
                        continue;
                    }
                    let take = (*remaining as usize).min(bytes.len() - pos);
                    self.body.push(piece.slice(pos..pos + take));
                    *remaining -= take as u64;
                    pos += take;
                    if *remaining == 0 {
                        self.state = State::Done;
                    }
                }
                State::ChunkedBody(chunk) => {
                    pos = self.advance_chunked(piece, bytes, pos, *chunk)?;
                }
                State::Done => unreachable!("handled above"),
            }
        }
    }

    fn enter_body_state(&self) -> Result<State, Error> {
        if let Some(te) = self.header("Transfer-Encoding") {
            if !te.eq_ignore_ascii_case("chunked") {
                return Err(Error::corrupted_response(format!(
                    "HTTP response is corrupted: unrecognized Transfer-Encoding {te}"
                )));
            }
            return Ok(State::ChunkedBody(ChunkState::Size));
        }
        if let Some(cl) = self.header("Content-Length") {
            let len: u64 = cl
                .trim()
                .parse()
                .map_err(|_| Error::corrupted_response(format!("HTTP response is corrupted: bad Content-Length {cl}")))?;
            if len == 0 {
                return Ok(State::Done);
            }
            return Ok(State::ContentLengthBody { remaining: len });
        }
        Err(Error::corrupted_response(
            "HTTP response is corrupted: neither Content-Length nor chunked Transfer-Encoding is present.",
        ))
    }

    fn advance_chunked(&mut self, piece: &Piece, bytes: &[u8], mut pos: usize, mut chunk: ChunkState) -> Result<usize, Error> {
        loop {
            if pos >= bytes.len() {
                self.state = State::ChunkedBody(chunk);
                return Ok(pos);
            }
            let byte = bytes[pos];
            match &mut chunk {
                ChunkState::Size => match hex_digit(byte) {
                    Some(_) => {
                        let line_end = find_crlf(bytes, pos).ok_or_else(|| {
                            Error::corrupted_response("HTTP response is corrupted: chunk size has syntax error.")
                        })?;
                        let size_str = std::str::from_utf8(&bytes[pos..line_end])
                            .map_err(|_| Error::corrupted_response("HTTP response is corrupted: chunk size has syntax error."))?;
                        let expect = u64::from_str_radix(size_str.trim(), 16).map_err(|_| {
                            Error::corrupted_response("HTTP response is corrupted: chunk size has syntax error.")
                        })?;
                        pos = line_end + 2;
                        chunk = if expect == 0 { ChunkState::TrailerLf0 } else { ChunkState::Data { expect, got: 0 } };
                    }
                    None => {
                        return Err(Error::corrupted_response("HTTP response is corrupted: chunk size is required."));
                    }
                },
                ChunkState::Data { expect, got } => {
                    let remaining_in_chunk = (*expect - *got) as usize;
                    let take = remaining_in_chunk.min(bytes.len() - pos);
                    if take > 0 {
                        self.body.push(piece.slice(pos..pos + take));
                        *got += take as u64;
                        pos += take;
                    }
                    if *got == *expect {
                        chunk = ChunkState::DataCr;
                    } else {
                        self.state = State::ChunkedBody(chunk);
                        return Ok(pos);
                    }
                }
                ChunkState::DataCr => {
                    let line_end = find_crlf(bytes, pos).ok_or_else(|| {
                        Error::corrupted_response("HTTP response is corrupted: chunked body must be followed by a CRLF.")
                    })?;
                    if line_end != pos {
                        return Err(Error::corrupted_response(
                            "HTTP response is corrupted: chunked body must be followed by a CRLF.",
                        ));
                    }
                    pos = line_end + 2;
                    chunk = ChunkState::Size;
                }
                ChunkState::TrailerLf0 => {
                    let line_end = find_crlf(bytes, pos).ok_or_else(|| {
                        Error::corrupted_response(
                            "HTTP response is corrupted: a trailing blank line is required in chunked body.",
                        )
                    })?;
                    if line_end != pos {
                        return Err(Error::corrupted_response(
                            "HTTP response is corrupted: a trailing blank line is required in chunked body.",
                        ));
                    }
                    pos = line_end + 2;
                    self.state = State::Done;
                    return Ok(pos);
                }
            }
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\r' {
            return if bytes[i + 1] == b'\n' { Some(i) } else { None };
        }
        i += 1;
    }
    None
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn parse_status_line(line: &[u8]) -> Result<i64, Error> {
    const PREFIX: &[u8] = b"HTTP/1.1 ";
    if !line.starts_with(PREFIX) {
        return Err(Error::corrupted_response("HTTP response is corrupted: status line syntax is incorrect."));
    }
    let rest = &line[PREFIX.len()..];
    let digits_end = rest.iter().position(|b| !b.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return Err(Error::corrupted_response("HTTP response is corrupted: status line syntax is incorrect."));
    }
    std::str::from_utf8(&rest[..digits_end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::corrupted_response("HTTP response is corrupted: status line syntax is incorrect."))
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), Error> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| Error::corrupted_response("HTTP response is corrupted: missing ':'."))?;
    let name = std::str::from_utf8(&line[..colon])
        .map_err(|_| Error::corrupted_response("HTTP response is corrupted: header field is not UTF-8."))?
        .to_string();
    let mut value = &line[colon + 1..];
    while value.first() == Some(&b' ') {
        value = &value[1..];
    }
    while value.last() == Some(&b' ') {
        value = &value[..value.len() - 1];
    }
    if value.is_empty() {
        return Err(Error::corrupted_response("HTTP response is corrupted: missing header field."));
    }
    let value = std::str::from_utf8(value)
        .map_err(|_| Error::corrupted_response("HTTP response is corrupted: header field is not UTF-8."))?
        .to_string();
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn piece(s: &str) -> Piece {
        Piece(Bytes::from(s.as_bytes().to_vec()))
    }

    #[test]
    fn parses_content_length_body_in_one_feed() {
        let mut p = ResponseParser::new();
        let progress = p.feed(&piece("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")).unwrap();
        assert_eq!(progress, Progress::Done);
        assert_eq!(p.http_status(), 200);
        assert_eq!(p.body().to_contiguous(), b"hello");
    }

    #[test]
    fn content_length_body_can_span_feeds() {
        let mut p = ResponseParser::new();
        assert_eq!(
            p.feed(&piece("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel")).unwrap(),
            Progress::NeedMore
        );
        assert_eq!(p.feed(&piece("lo")).unwrap(), Progress::Done);
        assert_eq!(p.body().to_contiguous(), b"hello");
    }

    #[test]
    fn split_status_line_across_feeds_is_corruption() {
        // a status line that doesn't complete within the piece it started in is
        // corruption immediately, not "need more" — only body bytes may span feeds.
        let mut p = ResponseParser::new();
        let err = p.feed(&piece("HTTP/1.1 200")).unwrap_err();
        assert!(err.message.contains("too long status line"));
    }

    #[test]
    fn chunked_body_decodes_multiple_chunks() {
        let mut p = ResponseParser::new();
        let raw = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        assert_eq!(p.feed(&piece(raw)).unwrap(), Progress::Done);
        assert_eq!(p.body().to_contiguous(), b"Wikipedia");
    }

    #[test]
    fn missing_content_length_and_chunked_is_corruption() {
        let mut p = ResponseParser::new();
        let err = p.feed(&piece("HTTP/1.1 204 No Content\r\n\r\n")).unwrap_err();
        assert!(err.message.contains("neither Content-Length nor chunked"));
    }

    #[test]
    fn duplicate_header_is_corruption() {
        let mut p = ResponseParser::new();
        let err = p
            .feed(&piece("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nContent-Length: 0\r\n\r\n"))
            .unwrap_err();
        assert!(err.message.contains("duplicated header field"));
    }

    #[test]
    fn bad_status_line_prefix_is_corruption() {
        let mut p = ResponseParser::new();
        let err = p.feed(&piece("HTTP/1.0 200 OK\r\n\r\n")).unwrap_err();
        assert!(err.message.contains("status line syntax is incorrect"));
    }
}
