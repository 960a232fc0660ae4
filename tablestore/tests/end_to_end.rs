//! End-to-end pipeline scenarios driven through the public `Client`/
//! `WireClient` surface against a scripted transport, grounded in
//! `examples/original_source/test/unittest/core/response_reader_unittest.cpp`'s
//! approach of feeding literal byte strings to the layer under test.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::future::BoxFuture;
use tablestore::client::{Client, WireClient};
use tablestore::credentials::Credentials;
use tablestore::error::{Error, TransportStatus};
use tablestore::retry::NoRetry;
use tablestore::transport::connection::{Io, Transport};
use tablestore::transport::uri::Endpoint;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

struct ScriptedIo {
    chunks: VecDeque<Vec<u8>>,
}

impl AsyncRead for ScriptedIo {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if let Some(chunk) = self.chunks.pop_front() {
            buf.put_slice(&chunk);
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedIo {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Replays one literal response on every connection it opens.
struct ScriptedTransport {
    response: Vec<u8>,
}

impl Transport for ScriptedTransport {
    fn connect<'a>(&'a self, _endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Box<dyn Io>, Error>> {
        let chunks = VecDeque::from([self.response.clone()]);
        Box::pin(async move { Ok(Box::new(ScriptedIo { chunks }) as Box<dyn Io>) })
    }
}

/// Never resolves: models a connect that never completes so a request
/// deadline is the only thing that can end the attempt.
struct HangingTransport;

impl Transport for HangingTransport {
    fn connect<'a>(&'a self, _endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Box<dyn Io>, Error>> {
        Box::pin(std::future::pending())
    }
}

fn credentials() -> Credentials {
    Credentials::new("ak-id", "ak-secret", None).unwrap()
}

fn client_with(transport: Arc<dyn Transport>) -> Client {
    Client::builder("https://example.com:80/inst")
        .credentials(credentials())
        .retry_strategy(Arc::new(NoRetry))
        .transport(transport)
        .build()
        .unwrap()
}

#[tokio::test]
async fn list_table_happy_path_has_empty_body() {
    let client = client_with(Arc::new(ScriptedTransport { response: b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec() }));
    let tables = client.list_table().await.unwrap();
    assert!(tables.is_empty());
}

#[tokio::test]
async fn corrupted_status_line_surfaces_as_classified_error() {
    let client = client_with(Arc::new(ScriptedTransport { response: b"FTP 200 OK\r\n\r\n".to_vec() }));
    let err = client.list_table().await.unwrap_err();
    assert_eq!(err.http_status, 56);
    assert_eq!(err.code, TransportStatus::CorruptedResponse.to_string());
}

#[tokio::test]
async fn chunked_body_decodes_across_reads() {
    // An empty ListTableResponse decodes fine from a zero-length chunked body;
    // this exercises the chunked decoder through the typed call path.
    let client = client_with(Arc::new(ScriptedTransport {
        response: b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n".to_vec(),
    }));
    let tables = client.list_table().await.unwrap();
    assert!(tables.is_empty());
}

#[tokio::test]
async fn timeout_before_borrow_fires_request_timeout() {
    let client = Client::builder("https://example.com:80/inst")
        .credentials(credentials())
        .retry_strategy(Arc::new(NoRetry))
        .max_connections(1)
        .request_timeout(Duration::from_millis(10))
        .transport(Arc::new(HangingTransport))
        .build()
        .unwrap();

    let err = client.list_table().await.unwrap_err();
    assert_eq!(err.http_status, TransportStatus::OperationTimeout.code());
    assert_eq!(err.code, TransportStatus::OperationTimeout.to_string());
}

#[tokio::test]
async fn put_row_round_trips_through_the_signed_pipeline() {
    // a PutRowResponse with no returned_row (no RETURN_TYPE requested) is an
    // empty protobuf message, so an empty body is a valid success response.
    let client = client_with(Arc::new(ScriptedTransport { response: b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec() }));
    let pkey = tablestore::value::PrimaryKey::new(vec![tablestore::value::PrimaryKeyColumn::new(
        "pkey",
        tablestore::value::Value::Integer(1),
    )]);
    let row = tablestore::value::Row::new(
        pkey,
        vec![tablestore::value::Attribute::new("name", tablestore::value::Value::String(bytes::Bytes::from_static(b"a")))],
    );
    let returned = client.put_row("T", &row).await.unwrap();
    assert!(returned.is_none());
}

#[tokio::test]
async fn server_error_body_decodes_into_a_classified_error() {
    // An ErrorProto { code: "OTSParameterInvalid", message: "bad pkey" }
    // protobuf-encoded body on a 400 response.
    let mut body = Vec::new();
    // field 1 (code), wire type 2 (length-delimited)
    body.push(0x0a);
    body.push(b"OTSParameterInvalid".len() as u8);
    body.extend_from_slice(b"OTSParameterInvalid");
    // field 2 (message), wire type 2
    body.push(0x12);
    body.push(b"bad pkey".len() as u8);
    body.extend_from_slice(b"bad pkey");
    let mut response = format!("HTTP/1.1 400 Bad Request\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
    response.extend_from_slice(&body);

    let client = client_with(Arc::new(ScriptedTransport { response }));
    let err = client.list_table().await.unwrap_err();
    assert_eq!(err.http_status, 400);
    assert_eq!(err.code, "OTSParameterInvalid");
    assert_eq!(err.message, "bad pkey");
}
