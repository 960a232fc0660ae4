//! End-to-end index-overlay scenarios: insert fan-out ordering and
//! index-based `Find`, driven against a recording/stub `WireClient` rather
//! than a real transport (this crate only ever sees `WireClient`, never the
//! HTTP layer underneath it).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tablestore::bulk::BulkCoordinator;
use tablestore::client::{
    BatchGetGroup, BatchGetGroupResult, BatchWriteGroup, BatchWriteGroupResult, GetRangeArgs, GetRangeResult, RowResult, WireClient,
};
use tablestore::error::Error;
use tablestore::schema::{PkeyColSchema, PkeyColumnOption, PkeyColumnType, TableOptions, TableSchema};
use tablestore::value::{PrimaryKey, PrimaryKeyColumn, Row, Value};
use tablestore_index::schema::{Collection, IndexSchema};
use tablestore_index::{Condition, Expr, RangeOp};

fn table(name: &str, pkey_names: &[&str]) -> TableSchema {
    TableSchema::new(
        name,
        pkey_names.iter().map(|n| PkeyColSchema::new(*n, PkeyColumnType::Integer, PkeyColumnOption::None).unwrap()).collect(),
        TableOptions::default(),
    )
    .unwrap()
}

fn json_row(v: serde_json::Value) -> tablestore_index::JsonRow {
    v.as_object().unwrap().clone()
}

#[derive(Debug, Clone)]
struct PutCall {
    table_name: String,
    pkey: PrimaryKey,
    attributes: Vec<(String, Value)>,
}

/// Records every `PutRow` it sees (via `batch_write_row`, one row per
/// group in these tests) in call order, and answers `GetRange`/`GetRow`
/// from canned tables keyed by primary key.
#[derive(Default)]
struct RecordingClient {
    puts: Mutex<Vec<PutCall>>,
    get_range_calls: Mutex<Vec<GetRangeArgs>>,
    get_range_pages: Mutex<VecDeque<GetRangeResult>>,
    primary_rows: Mutex<Vec<(PrimaryKey, Option<Row>)>>,
}

impl WireClient for RecordingClient {
    async fn create_table(&self, _schema: &TableSchema) -> Result<(), Error> {
        unimplemented!()
    }
    async fn list_table(&self) -> Result<Vec<String>, Error> {
        unimplemented!()
    }
    async fn describe_table(&self, _table_name: &str) -> Result<TableSchema, Error> {
        unimplemented!()
    }
    async fn delete_table(&self, _table_name: &str) -> Result<(), Error> {
        unimplemented!()
    }
    async fn update_table(&self, _table_name: &str, _options: &TableOptions) -> Result<TableOptions, Error> {
        unimplemented!()
    }
    async fn get_row(&self, _table_name: &str, _primary_key: &PrimaryKey, _columns_to_get: &[String]) -> Result<Option<Row>, Error> {
        unimplemented!()
    }
    async fn put_row(&self, _table_name: &str, _row: &Row) -> Result<Option<Row>, Error> {
        unimplemented!()
    }
    async fn update_row(
        &self,
        _table_name: &str,
        _primary_key: &PrimaryKey,
        _put_attributes: &[tablestore::value::Attribute],
        _delete_attributes: &[String],
    ) -> Result<(), Error> {
        unimplemented!()
    }
    async fn delete_row(&self, _table_name: &str, _primary_key: &PrimaryKey) -> Result<(), Error> {
        unimplemented!()
    }

    async fn batch_write_row(&self, groups: Vec<BatchWriteGroup>) -> Result<Vec<BatchWriteGroupResult>, Error> {
        let mut puts = self.puts.lock().unwrap();
        let mut results = Vec::new();
        for g in &groups {
            for row in &g.puts {
                puts.push(PutCall {
                    table_name: g.table_name.clone(),
                    pkey: row.primary_key.clone(),
                    attributes: row.attributes.iter().map(|a| (a.name.clone(), a.value.clone())).collect(),
                });
            }
            results.push(BatchWriteGroupResult {
                table_name: g.table_name.clone(),
                put_results: g.puts.iter().map(|_| RowResult::Ok(None)).collect(),
                delete_results: g.deletes.iter().map(|_| RowResult::Ok(None)).collect(),
            });
        }
        Ok(results)
    }

    async fn batch_get_row(&self, groups: Vec<BatchGetGroup>) -> Result<Vec<BatchGetGroupResult>, Error> {
        let table = self.primary_rows.lock().unwrap();
        Ok(groups
            .into_iter()
            .map(|g| {
                let results = g
                    .gets
                    .iter()
                    .map(|(pkey, _)| {
                        let hit = table.iter().find(|(k, _)| k == pkey).and_then(|(_, row)| row.clone());
                        RowResult::Ok(hit)
                    })
                    .collect();
                BatchGetGroupResult { table_name: g.table_name, results }
            })
            .collect())
    }

    async fn get_range(&self, req: GetRangeArgs) -> Result<GetRangeResult, Error> {
        self.get_range_calls.lock().unwrap().push(req);
        Ok(self.get_range_pages.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn compute_splits_by_size(&self, _table_name: &str, _split_size_unit: i64) -> Result<Vec<PrimaryKey>, Error> {
        unimplemented!()
    }
}

fn collection_with_hash_index() -> Collection {
    let primary = table("P", &["pkey"]);
    let index =
        IndexSchema::new(table("I", &["hash_name"]), vec![("hash_name".into(), Expr::hex(Expr::crc64_str(Expr::attr("name"))))])
            .unwrap();
    Collection::new(primary, vec![("pkey".into(), Expr::attr("pkey"))], vec![index], vec![], vec![]).unwrap()
}

#[tokio::test]
async fn insert_with_two_indexes_writes_index_rows_before_the_primary_row() {
    let collection = collection_with_hash_index();
    let data = json_row(json!({"pkey": 0, "name": "123456789", "greeting": "hello"}));
    let expected_hash_pkey = collection.indexes[0].compute_pkey(&data).unwrap();

    let client = Arc::new(RecordingClient::default());
    let coordinator = BulkCoordinator::new(Arc::clone(&client));

    tablestore_index::insert(&coordinator, &collection, data).await.unwrap();
    coordinator.shutdown().await;

    let puts = client.puts.lock().unwrap().clone();
    assert_eq!(puts.len(), 2, "one PutRow on the index, one on the primary table, each its own request");

    assert_eq!(puts[0].table_name, "I");
    assert_eq!(puts[0].pkey, expected_hash_pkey);
    assert_eq!(puts[0].attributes.iter().find(|(n, _)| n == "name").unwrap().1, Value::String(bytes::Bytes::from_static(b"123456789")));
    assert_eq!(puts[0].attributes.iter().find(|(n, _)| n == "pkey").unwrap().1, Value::Integer(0));

    assert_eq!(puts[1].table_name, "P");
    assert_eq!(puts[1].pkey, PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::Integer(0))]));
    assert_eq!(puts[1].attributes.iter().find(|(n, _)| n == "name").unwrap().1, Value::String(bytes::Bytes::from_static(b"123456789")));
    assert_eq!(puts[1].attributes.iter().find(|(n, _)| n == "greeting").unwrap().1, Value::String(bytes::Bytes::from_static(b"hello")));
}

fn collection_with_range_index() -> Collection {
    let primary = table("P", &["pkey"]);
    let index = IndexSchema::new(table("I", &["attr", "pkey"]), vec![
        ("attr".into(), Expr::attr("attr")),
        ("pkey".into(), Expr::attr("pkey")),
    ])
    .unwrap();
    Collection::new(primary, vec![("pkey".into(), Expr::attr("pkey"))], vec![index], vec![], vec![]).unwrap()
}

fn index_row(attr: i64, pkey: i64) -> Row {
    Row::new(
        PrimaryKey::new(vec![PrimaryKeyColumn::new("attr", Value::Integer(attr)), PrimaryKeyColumn::new("pkey", Value::Integer(pkey))]),
        vec![],
    )
}

fn primary_row(pkey: i64, attr: i64) -> Row {
    Row::new(
        PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::Integer(pkey))]),
        vec![tablestore::value::Attribute::new("attr", Value::Integer(attr))],
    )
}

#[tokio::test]
async fn index_based_find_joins_through_primary_and_drops_orphans() {
    let collection = collection_with_range_index();
    let client = Arc::new(RecordingClient::default());
    *client.get_range_pages.lock().unwrap() =
        VecDeque::from([GetRangeResult { rows: vec![index_row(-1, -1), index_row(0, 0), index_row(1, 1)], next_start_primary_key: None }]);
    *client.primary_rows.lock().unwrap() = vec![
        (PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::Integer(-1))]), Some(primary_row(-1, -1))),
        (PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::Integer(0))]), None),
        (PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::Integer(1))]), Some(primary_row(1, 1))),
    ];

    let coordinator = BulkCoordinator::new(Arc::clone(&client));
    let condition = Condition::new().range("attr", vec![(RangeOp::Ge, Value::Integer(-1)), (RangeOp::Le, Value::Integer(1))]);
    let rows = tablestore_index::find(&coordinator, &collection, vec![], condition, 0, 0, Some(("pkey".to_string(), 1))).await.unwrap();
    coordinator.shutdown().await;

    let calls = client.get_range_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].table_name, "I");
    assert_eq!(
        calls[0].start_primary_key,
        PrimaryKey::new(vec![PrimaryKeyColumn::new("attr", Value::Integer(-1)), PrimaryKeyColumn::new("pkey", Value::InfMin)])
    );
    assert_eq!(
        calls[0].end_primary_key,
        PrimaryKey::new(vec![PrimaryKeyColumn::new("attr", Value::Integer(2)), PrimaryKeyColumn::new("pkey", Value::InfMin)])
    );
    drop(calls);

    assert_eq!(rows.len(), 2, "pkey 0's orphaned index row must be dropped, not surfaced");
    assert_eq!(rows[0].get("pkey").unwrap(), &json!(-1));
    assert_eq!(rows[0].get("attr").unwrap(), &json!(-1));
    assert_eq!(rows[1].get("pkey").unwrap(), &json!(1));
    assert_eq!(rows[1].get("attr").unwrap(), &json!(1));
}
