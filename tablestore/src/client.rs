//! Typed API surface over the request pipeseline: `WireClient` (spec.md
//! section 4.4), `ClientOptions`/`ClientBuilder` (spec.md section 6,
//! "Configuration"), and the concrete [`Client`].
//!
//! Each method here does exactly what spec.md section 4.4 describes: validate
//! the request, serialize it to protobuf, sign it, hand it to
//! [`Pipeline::execute`](crate::pipeline::Pipeline::execute), and on a 2xx
//! decode the typed response. Service-level retries — a successful transport
//! round trip whose body decodes to a temporary OTS error — are driven from
//! here rather than from `pipeline.rs` (see that module's doc comment and
//! `DESIGN.md` for why the split sits at this layer).

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use prost::Message;

use crate::actor::timer::{AlarmClock, FireOutcome, Tracker};
use crate::actor::ActorPool;
use crate::credentials::Credentials;
use crate::error::{Error, TransportStatus};
use crate::mempool::{MemPool, Piece, Pieces};
use crate::pipeline::{Pipeline, RawResponse, RequestSpec, RequestSpecFactory};
use crate::retry::{DeadlineBounded, RetryDecision, RetryPolicy};
use crate::schema::{TableOptions, TableSchema};
use crate::signing;
use crate::transport::connection::{TcpTlsTransport, Transport};
use crate::transport::pool::ConnectionPool;
use crate::transport::uri::Endpoint;
use crate::value::{Attribute, PrimaryKey, Row};
use crate::wire;
use crate::wire_convert::*;

/// Configuration knobs spec.md section 6 names under `ClientOptions`.
pub struct ClientOptions {
    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_strategy: Arc<dyn RetryPolicy>,
    pub actor_count: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_connections: 5000,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(3),
            retry_strategy: Arc::new(DeadlineBounded::new()),
            actor_count: 10,
        }
    }
}

/// Builds a [`Client`] from an endpoint, credentials and [`ClientOptions`].
pub struct ClientBuilder {
    endpoint: String,
    credentials: Option<Credentials>,
    options: ClientOptions,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), credentials: None, options: ClientOptions::default(), transport: None }
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.options.max_connections = n;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.options.connect_timeout = d;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.options.request_timeout = d;
        self
    }

    pub fn retry_strategy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.options.retry_strategy = policy;
        self
    }

    pub fn actor_count(mut self, n: usize) -> Self {
        self.options.actor_count = n;
        self
    }

    /// Substitute the transport a test drives instead of real TCP/TLS.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        if self.options.max_connections == 0 {
            return Err(Error::validation("max_connections must be positive"));
        }
        if self.options.connect_timeout.is_zero() {
            return Err(Error::validation("connect_timeout must be at least 1ms"));
        }
        if self.options.request_timeout.is_zero() {
            return Err(Error::validation("request_timeout must be at least 1ms"));
        }
        if self.options.actor_count == 0 {
            return Err(Error::validation("actor_count must be positive"));
        }
        let credentials = self.credentials.ok_or_else(|| Error::validation("credentials are required"))?;
        let endpoint = Endpoint::parse(&self.endpoint).map_err(Error::validation)?;

        let actors = Arc::new(ActorPool::new(self.options.actor_count));
        let actors_for_alarm = Arc::clone(&actors);
        let alarm = Arc::new(AlarmClock::new(move |tracker, job| {
            actors_for_alarm.handle_for(&tracker.0).push_back(job);
            FireOutcome::Enqueued
        }));
        let transport = self.transport.unwrap_or_else(|| Arc::new(TcpTlsTransport::new()));
        let pool = Arc::new(ConnectionPool::new(transport, self.options.max_connections));
        let pipeline = Arc::new(Pipeline::new(
            actors,
            Arc::clone(&alarm),
            pool,
            MemPool::default(),
            endpoint.clone(),
            Arc::clone(&self.options.retry_strategy),
            self.options.request_timeout,
        ));

        Ok(Client { pipeline, alarm, credentials, endpoint, retry_policy: self.options.retry_strategy })
    }
}

/// The typed API surface spec.md section 4.4 calls `WireClient`: one method
/// per API, each validating, signing, round-tripping through the pipeline and
/// decoding a typed response.
pub trait WireClient {
    async fn create_table(&self, schema: &TableSchema) -> Result<(), Error>;
    async fn list_table(&self) -> Result<Vec<String>, Error>;
    async fn describe_table(&self, table_name: &str) -> Result<TableSchema, Error>;
    async fn delete_table(&self, table_name: &str) -> Result<(), Error>;
    async fn update_table(&self, table_name: &str, options: &TableOptions) -> Result<TableOptions, Error>;
    async fn get_row(&self, table_name: &str, primary_key: &PrimaryKey, columns_to_get: &[String]) -> Result<Option<Row>, Error>;
    async fn put_row(&self, table_name: &str, row: &Row) -> Result<Option<Row>, Error>;
    async fn update_row(
        &self,
        table_name: &str,
        primary_key: &PrimaryKey,
        put_attributes: &[Attribute],
        delete_attributes: &[String],
    ) -> Result<(), Error>;
    async fn delete_row(&self, table_name: &str, primary_key: &PrimaryKey) -> Result<(), Error>;
    async fn batch_write_row(&self, groups: Vec<BatchWriteGroup>) -> Result<Vec<BatchWriteGroupResult>, Error>;
    async fn batch_get_row(&self, groups: Vec<BatchGetGroup>) -> Result<Vec<BatchGetGroupResult>, Error>;
    async fn get_range(&self, req: GetRangeArgs) -> Result<GetRangeResult, Error>;
    async fn compute_splits_by_size(&self, table_name: &str, split_size_unit: i64) -> Result<Vec<PrimaryKey>, Error>;
}

/// One table's worth of put/delete rows for [`WireClient::batch_write_row`].
#[derive(Debug, Clone, Default)]
pub struct BatchWriteGroup {
    pub table_name: String,
    pub puts: Vec<Row>,
    pub deletes: Vec<PrimaryKey>,
}

/// Per-row outcome inside a batch (spec.md section 4.6: "per-row completions
/// are invoked in the order the rows appear in the server response").
#[derive(Debug, Clone)]
pub enum RowResult {
    Ok(Option<Row>),
    Err(Error),
}

#[derive(Debug, Clone, Default)]
pub struct BatchWriteGroupResult {
    pub table_name: String,
    pub put_results: Vec<RowResult>,
    pub delete_results: Vec<RowResult>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchGetGroup {
    pub table_name: String,
    pub gets: Vec<(PrimaryKey, Vec<String>)>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchGetGroupResult {
    pub table_name: String,
    pub results: Vec<RowResult>,
}

#[derive(Debug, Clone)]
pub struct GetRangeArgs {
    pub table_name: String,
    pub start_primary_key: PrimaryKey,
    pub end_primary_key: PrimaryKey,
    pub columns_to_get: Vec<String>,
    pub limit: Option<i32>,
    pub forward: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GetRangeResult {
    pub rows: Vec<Row>,
    pub next_start_primary_key: Option<PrimaryKey>,
}

/// Concrete [`WireClient`] talking HTTP/1.1 through [`Pipeline`].
pub struct Client {
    pipeline: Arc<Pipeline>,
    #[allow(dead_code)] // kept alive for as long as the client exists; the pipeline only holds a clone
    alarm: Arc<AlarmClock>,
    credentials: Credentials,
    endpoint: Endpoint,
    retry_policy: Arc<dyn RetryPolicy>,
}

impl Client {
    pub fn builder(endpoint: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(endpoint)
    }

    /// Drive one logical API call end to end, including the service-level
    /// retry loop (spec.md section 4.5; transport-level retries already
    /// happened inside `pipeline.execute`).
    async fn call(&self, api: &'static str, path: &'static str, body: Vec<u8>) -> Result<RawResponse, Error> {
        let tracker = Tracker::with_base(api);
        let started_at = Instant::now();
        let mut attempt_no = 0u32;
        let body = Bytes::from(body);
        loop {
            let spec_factory = self.spec_factory(api, path, body.clone());
            let deadline = Instant::now() + self.pipeline.request_timeout();
            let (tx, rx) = tokio::sync::oneshot::channel();
            Arc::clone(&self.pipeline).execute(spec_factory, tracker.clone(), deadline, move |res| {
                let _ = tx.send(res);
            });
            let raw = rx
                .await
                .map_err(|_| Error::transport(TransportStatus::NoAvailableConnection, "pipeline dropped the response callback"))?;

            let raw = match raw {
                Ok(raw) => raw,
                // transport-level retries already ran their course inside the pipeline.
                Err(err) => return Err(err),
            };
            if raw.http_status >= 200 && raw.http_status <= 299 {
                return Ok(raw);
            }

            let err = decode_service_error(&raw);
            match self.retry_policy.decide(api, &err, attempt_no, started_at.elapsed()) {
                RetryDecision::Stop => return Err(err),
                RetryDecision::RetryAfter(delay) => {
                    tracing::debug!(api, attempt_no, delay_ms = delay.as_millis() as u64, "retrying service-level error");
                    tokio::time::sleep(delay).await;
                    attempt_no += 1;
                }
            }
        }
    }

    fn spec_factory(&self, api: &'static str, path: &'static str, body: Bytes) -> Arc<dyn RequestSpecFactory> {
        let credentials = self.credentials.clone();
        let instance_name = self.endpoint.instance_name.clone();
        Arc::new(move || {
            let headers = signing::sign(&credentials, &instance_name, path, &body)?;
            let mut pieces = Pieces::new();
            pieces.push(Piece::from(body.clone()));
            Ok(RequestSpec { api, path: path.to_string(), headers, body: pieces })
        })
    }

    async fn call_typed<Req: Message, Resp: Message + Default>(
        &self,
        api: &'static str,
        path: &'static str,
        req: &Req,
    ) -> Result<Resp, Error> {
        let raw = self.call(api, path, req.encode_to_vec()).await?;
        let bytes = raw.body.to_contiguous();
        Resp::decode(bytes.as_slice()).map_err(|e| Error::corrupted_response(format!("failed to decode {api} response: {e}")))
    }

    fn require_non_empty(field: &str, value: &str) -> Result<(), Error> {
        if value.is_empty() {
            return Err(Error::validation(format!("{field} must not be empty")));
        }
        Ok(())
    }
}

fn decode_service_error(raw: &RawResponse) -> Error {
    let request_id = raw
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("x-ots-requestid"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let trace_id = raw
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("x-ots-traceinfo"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let body = raw.body.to_contiguous();
    let err = match wire::ErrorProto::decode(body.as_slice()) {
        Ok(e) => Error::server(raw.http_status, e.code, e.message),
        Err(_) => Error::server(raw.http_status, "OTSUnknownError", "response body did not decode as an error"),
    };
    err.with_request_id(request_id).with_trace_id(trace_id)
}

fn row_result_from_proto(r: &wire::RowInBatchResult) -> RowResult {
    if r.is_ok {
        let row = r.row.as_ref().and_then(|p| row_from_proto(p).ok());
        RowResult::Ok(row)
    } else {
        RowResult::Err(Error::server(
            r.http_status.unwrap_or(0) as i64,
            r.error_code.clone().unwrap_or_default(),
            r.error_message.clone().unwrap_or_default(),
        ))
    }
}

impl WireClient for Client {
    async fn create_table(&self, schema: &TableSchema) -> Result<(), Error> {
        let req = wire::CreateTableRequest { schema: Some(table_schema_to_proto(schema)) };
        self.call_typed::<_, wire::CreateTableResponse>("CreateTable", "/CreateTable", &req).await?;
        Ok(())
    }

    async fn list_table(&self) -> Result<Vec<String>, Error> {
        let resp: wire::ListTableResponse = self.call_typed("ListTable", "/ListTable", &wire::ListTableRequest {}).await?;
        Ok(resp.table_names)
    }

    async fn describe_table(&self, table_name: &str) -> Result<TableSchema, Error> {
        Self::require_non_empty("table_name", table_name)?;
        let req = wire::DescribeTableRequest { table_name: table_name.to_string() };
        let resp: wire::DescribeTableResponse = self.call_typed("DescribeTable", "/DescribeTable", &req).await?;
        let schema = resp.schema.ok_or_else(|| Error::corrupted_response("DescribeTable response missing schema"))?;
        table_schema_from_proto(&schema)
    }

    async fn delete_table(&self, table_name: &str) -> Result<(), Error> {
        Self::require_non_empty("table_name", table_name)?;
        let req = wire::DeleteTableRequest { table_name: table_name.to_string() };
        self.call_typed::<_, wire::DeleteTableResponse>("DeleteTable", "/DeleteTable", &req).await?;
        Ok(())
    }

    async fn update_table(&self, table_name: &str, options: &TableOptions) -> Result<TableOptions, Error> {
        Self::require_non_empty("table_name", table_name)?;
        options.validate().map_err(Error::validation)?;
        let req = wire::UpdateTableRequest { table_name: table_name.to_string(), options: Some(table_options_to_proto(options)) };
        let resp: wire::UpdateTableResponse = self.call_typed("UpdateTable", "/UpdateTable", &req).await?;
        let options = resp.options.ok_or_else(|| Error::corrupted_response("UpdateTable response missing options"))?;
        Ok(table_options_from_proto(&options))
    }

    async fn get_row(&self, table_name: &str, primary_key: &PrimaryKey, columns_to_get: &[String]) -> Result<Option<Row>, Error> {
        Self::require_non_empty("table_name", table_name)?;
        let req = wire::GetRowRequest {
            table_name: table_name.to_string(),
            primary_key: pkey_to_proto(primary_key),
            columns_to_get: columns_to_get.to_vec(),
        };
        let resp: wire::GetRowResponse = self.call_typed("GetRow", "/GetRow", &req).await?;
        resp.row.as_ref().map(row_from_proto).transpose()
    }

    async fn put_row(&self, table_name: &str, row: &Row) -> Result<Option<Row>, Error> {
        Self::require_non_empty("table_name", table_name)?;
        row.primary_key.validate_for_write().map_err(Error::validation)?;
        for a in &row.attributes {
            a.validate().map_err(Error::validation)?;
        }
        let req = wire::PutRowRequest { table_name: table_name.to_string(), row: Some(row_to_proto(row)) };
        let resp: wire::PutRowResponse = self.call_typed("PutRow", "/PutRow", &req).await?;
        resp.returned_row.as_ref().map(row_from_proto).transpose()
    }

    async fn update_row(
        &self,
        table_name: &str,
        primary_key: &PrimaryKey,
        put_attributes: &[Attribute],
        delete_attributes: &[String],
    ) -> Result<(), Error> {
        Self::require_non_empty("table_name", table_name)?;
        primary_key.validate_for_write().map_err(Error::validation)?;
        for a in put_attributes {
            a.validate().map_err(Error::validation)?;
        }
        let req = wire::UpdateRowRequest {
            table_name: table_name.to_string(),
            primary_key: pkey_to_proto(primary_key),
            put_attributes: put_attributes.iter().map(attribute_to_proto).collect(),
            delete_attributes: delete_attributes.to_vec(),
        };
        self.call_typed::<_, wire::UpdateRowResponse>("UpdateRow", "/UpdateRow", &req).await?;
        Ok(())
    }

    async fn delete_row(&self, table_name: &str, primary_key: &PrimaryKey) -> Result<(), Error> {
        Self::require_non_empty("table_name", table_name)?;
        primary_key.validate_for_write().map_err(Error::validation)?;
        let req = wire::DeleteRowRequest { table_name: table_name.to_string(), primary_key: pkey_to_proto(primary_key) };
        self.call_typed::<_, wire::DeleteRowResponse>("DeleteRow", "/DeleteRow", &req).await?;
        Ok(())
    }

    async fn batch_write_row(&self, groups: Vec<BatchWriteGroup>) -> Result<Vec<BatchWriteGroupResult>, Error> {
        if groups.is_empty() {
            return Err(Error::validation("batch_write_row requires at least one table group"));
        }
        let tables = groups
            .iter()
            .map(|g| {
                for pkey in g.deletes.iter() {
                    pkey.validate_for_write().map_err(Error::validation)?;
                }
                for row in g.puts.iter() {
                    row.primary_key.validate_for_write().map_err(Error::validation)?;
                }
                Ok(wire::batch_write_row_request::TableGroup {
                    table_name: g.table_name.clone(),
                    puts: g
                        .puts
                        .iter()
                        .map(|r| wire::PutRowRequest { table_name: g.table_name.clone(), row: Some(row_to_proto(r)) })
                        .collect(),
                    deletes: g
                        .deletes
                        .iter()
                        .map(|pk| wire::DeleteRowRequest { table_name: g.table_name.clone(), primary_key: pkey_to_proto(pk) })
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let req = wire::BatchWriteRowRequest { tables };
        let resp: wire::BatchWriteRowResponse = self.call_typed("BatchWriteRow", "/BatchWriteRow", &req).await?;
        Ok(resp
            .tables
            .into_iter()
            .map(|t| BatchWriteGroupResult {
                table_name: t.table_name,
                put_results: t.put_results.iter().map(row_result_from_proto).collect(),
                delete_results: t.delete_results.iter().map(row_result_from_proto).collect(),
            })
            .collect())
    }

    async fn batch_get_row(&self, groups: Vec<BatchGetGroup>) -> Result<Vec<BatchGetGroupResult>, Error> {
        if groups.is_empty() {
            return Err(Error::validation("batch_get_row requires at least one table group"));
        }
        let tables = groups
            .iter()
            .map(|g| wire::batch_get_row_request::TableGroup {
                table_name: g.table_name.clone(),
                gets: g
                    .gets
                    .iter()
                    .map(|(pkey, columns)| wire::GetRowRequest {
                        table_name: g.table_name.clone(),
                        primary_key: pkey_to_proto(pkey),
                        columns_to_get: columns.clone(),
                    })
                    .collect(),
            })
            .collect();
        let req = wire::BatchGetRowRequest { tables };
        let resp: wire::BatchGetRowResponse = self.call_typed("BatchGetRow", "/BatchGetRow", &req).await?;
        Ok(resp
            .tables
            .into_iter()
            .map(|t| BatchGetGroupResult { table_name: t.table_name, results: t.results.iter().map(row_result_from_proto).collect() })
            .collect())
    }

    async fn get_range(&self, args: GetRangeArgs) -> Result<GetRangeResult, Error> {
        Self::require_non_empty("table_name", &args.table_name)?;
        let req = wire::GetRangeRequest {
            table_name: args.table_name,
            start_primary_key: pkey_to_proto(&args.start_primary_key),
            end_primary_key: pkey_to_proto(&args.end_primary_key),
            columns_to_get: args.columns_to_get,
            limit: args.limit,
            forward: Some(args.forward),
        };
        let resp: wire::GetRangeResponse = self.call_typed("GetRange", "/GetRange", &req).await?;
        let rows = resp.rows.iter().map(row_from_proto).collect::<Result<Vec<_>, _>>()?;
        let next_start_primary_key =
            if resp.next_start_primary_key.is_empty() { None } else { Some(pkey_from_proto(&resp.next_start_primary_key)?) };
        Ok(GetRangeResult { rows, next_start_primary_key })
    }

    async fn compute_splits_by_size(&self, table_name: &str, split_size_unit: i64) -> Result<Vec<PrimaryKey>, Error> {
        Self::require_non_empty("table_name", table_name)?;
        if split_size_unit <= 0 {
            return Err(Error::validation("split_size_unit must be positive"));
        }
        let req = wire::ComputeSplitsBySizeRequest { table_name: table_name.to_string(), split_size_unit };
        let resp: wire::ComputeSplitsBySizeResponse =
            self.call_typed("ComputeSplitsBySize", "/ComputeSplitPointsBySize", &req).await?;
        resp.split_points.iter().map(|p| Ok(PrimaryKey::new(vec![pkey_column_from_proto(p)?]))).collect()
    }
}
