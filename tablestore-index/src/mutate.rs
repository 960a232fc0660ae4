//! `Insert`/`Delete`/`Update`/`Upsert` (spec.md sections 4.7.2, 4.7.3, 4.7.6):
//! the fan-out from one JSON-shaped row to the primary table plus every
//! applicable secondary index, built on top of [`crate::query::find`] and
//! the same [`BulkCoordinator`] row-level methods `find` uses.

use tablestore::bulk::BulkCoordinator;
use tablestore::client::WireClient;
use tablestore::value::{Attribute, PrimaryKey, Row};

use crate::condition::Condition;
use crate::expr::Expr;
use crate::jsonval::{json_to_value, value_to_json, JsonRow};
use crate::query;
use crate::schema::{Collection, IndexSchema};

/// `new_data` for [`update`]/[`upsert`] (spec.md section 4.7.6: "`$set`/
/// `$unset` modifiers; absence of either means full replacement").
#[derive(Debug, Clone)]
pub enum Update {
    Replace(JsonRow),
    Modify { set: JsonRow, unset: Vec<String> },
}

impl Update {
    fn apply(&self, base: &JsonRow) -> JsonRow {
        match self {
            Update::Replace(data) => data.clone(),
            Update::Modify { set, unset } => {
                let mut merged = base.clone();
                for (k, v) in set {
                    merged.insert(k.clone(), v.clone());
                }
                for k in unset {
                    merged.remove(k);
                }
                merged
            }
        }
    }
}

/// Every source attribute a primary-key expression reads verbatim (an
/// `Expr::Attr`, not a composited one) — these are dropped from the primary
/// row's attributes since the pkey column already carries them.
fn identity_pkey_source_attrs(pkey_exprs: &[(String, Expr)]) -> Vec<String> {
    pkey_exprs
        .iter()
        .filter_map(|(_, e)| if let Expr::Attr(name) = e { Some(name.clone()) } else { None })
        .collect()
}

fn row_for_table(pkey_exprs: &[(String, Expr)], exclude: &[String], data: &JsonRow) -> Result<Row, tablestore::Error> {
    let pkey_cols = pkey_exprs
        .iter()
        .map(|(name, e)| Ok(tablestore::value::PrimaryKeyColumn::new(name.clone(), e.eval(data)?)))
        .collect::<Result<Vec<_>, tablestore::Error>>()?;
    let attributes = data
        .iter()
        .filter(|(k, _)| !exclude.contains(k))
        .map(|(k, v)| Attribute::new(k.clone(), json_to_value(v)))
        .collect::<Vec<_>>();
    Ok(Row::new(PrimaryKey::new(pkey_cols), attributes))
}

/// An index row's attributes: whatever it needs to compute its own pkey
/// (spec.md example 4: `name` for `hash_name = Hex(Crc64Str(name))`) plus
/// whatever the primary table's pkey expressions read, so `IndexRowToPrimary`
/// (§4.7.5) can re-derive the primary key without a second schema lookup.
fn index_row(index: &IndexSchema, collection: &Collection, pkey: PrimaryKey, data: &JsonRow) -> Row {
    let mut attrs = index.required_source_attrs();
    for (_, e) in &collection.primary_pkey_exprs {
        e.source_attrs(&mut attrs);
    }
    attrs.sort();
    attrs.dedup();
    let attributes =
        attrs.iter().filter_map(|name| data.get(name).map(|v| Attribute::new(name.clone(), json_to_value(v)))).collect();
    Row::new(pkey, attributes)
}

/// `Insert(collection, data)` (spec.md section 4.7.2): index rows land first,
/// then the primary row, so a reader scanning an index never sees a primary
/// row that's missing from another index.
pub async fn insert<C: WireClient + Send + Sync + 'static>(
    coordinator: &BulkCoordinator<C>,
    collection: &Collection,
    data: JsonRow,
) -> Result<(), tablestore::Error> {
    collection.validate_required_attrs(&data)?;

    for index in &collection.indexes {
        let Some(pkey) = index.try_compute_pkey(&data) else { continue };
        let row = index_row(index, collection, pkey?, &data);
        match coordinator.put_row(index.table.name.clone(), row).await {
            tablestore::client::RowResult::Ok(_) => {}
            tablestore::client::RowResult::Err(e) => return Err(e),
        }
    }

    let exclude = identity_pkey_source_attrs(&collection.primary_pkey_exprs);
    let primary_row = row_for_table(&collection.primary_pkey_exprs, &exclude, &data)?;
    match coordinator.put_row(collection.primary_table_name().to_string(), primary_row).await {
        tablestore::client::RowResult::Ok(_) => Ok(()),
        tablestore::client::RowResult::Err(e) => Err(e),
    }
}

/// Delete every applicable row (primary, then each index that carries it)
/// for one already-fetched source row, without re-running `Find`.
async fn delete_materialized_row<C: WireClient + Send + Sync + 'static>(
    coordinator: &BulkCoordinator<C>,
    collection: &Collection,
    data: &JsonRow,
) -> Result<(), tablestore::Error> {
    let primary_pkey = tablestore::value::PrimaryKey::new(
        collection
            .primary_pkey_exprs
            .iter()
            .map(|(name, e)| Ok(tablestore::value::PrimaryKeyColumn::new(name.clone(), e.eval(data)?)))
            .collect::<Result<Vec<_>, tablestore::Error>>()?,
    );
    match coordinator.delete_row(collection.primary_table_name().to_string(), primary_pkey).await {
        tablestore::client::RowResult::Ok(_) => {}
        tablestore::client::RowResult::Err(e) => return Err(e),
    }

    for index in &collection.indexes {
        let Some(pkey) = index.try_compute_pkey(data) else { continue };
        let pkey = pkey?;
        match coordinator.delete_row(index.table.name.clone(), pkey).await {
            tablestore::client::RowResult::Ok(_) => {}
            tablestore::client::RowResult::Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// `Delete(collection, condition)` (spec.md section 4.7.3). Not atomic: an
/// interrupted delete may leave orphan index rows, tolerated because `Find`
/// drops index rows whose primary row is gone (§4.7.5).
pub async fn delete<C: WireClient + Send + Sync + 'static>(
    coordinator: &BulkCoordinator<C>,
    collection: &Collection,
    condition: Condition,
) -> Result<(), tablestore::Error> {
    let rows = query::find(coordinator, collection, vec![], condition, 0, 0, None).await?;
    for row in &rows {
        delete_materialized_row(coordinator, collection, row).await?;
    }
    Ok(())
}

fn primary_pkey_column_names(collection: &Collection) -> Vec<String> {
    collection.primary.pkey_schema.iter().map(|c| c.name.clone()).collect()
}

/// Shared `Update`/`Upsert` body (spec.md section 4.7.6). `upsert` controls
/// the zero-match behavior: insert-only when `true`, no-op when `false`.
async fn update_or_upsert<C: WireClient + Send + Sync + 'static>(
    coordinator: &BulkCoordinator<C>,
    collection: &Collection,
    condition: Condition,
    new_data: &Update,
    upsert: bool,
) -> Result<(), tablestore::Error> {
    let pkey_columns = primary_pkey_column_names(collection);
    if !condition.is_point_query_on(&pkey_columns) {
        return Err(tablestore::Error::validation("Update/Upsert condition must be a point query on the primary pkey columns"));
    }

    let rows = query::find(coordinator, collection, vec![], condition.clone(), 0, 0, None).await?;
    match rows.len() {
        0 => {
            if !upsert {
                return Ok(());
            }
            let mut base = JsonRow::new();
            for (attr, field) in &condition.0 {
                if let Some(values) = field.point_values() {
                    if let Some(v) = values.into_iter().next() {
                        base.insert(attr.clone(), value_to_json(&v));
                    }
                }
            }
            let merged = new_data.apply(&base);
            insert(coordinator, collection, merged).await
        }
        1 => {
            let merged = new_data.apply(&rows[0]);
            delete(coordinator, collection, condition).await?;
            insert(coordinator, collection, merged).await
        }
        _ => Err(tablestore::Error::validation("Update/Upsert condition matched more than one row")),
    }
}

pub async fn update<C: WireClient + Send + Sync + 'static>(
    coordinator: &BulkCoordinator<C>,
    collection: &Collection,
    condition: Condition,
    new_data: &Update,
) -> Result<(), tablestore::Error> {
    update_or_upsert(coordinator, collection, condition, new_data, false).await
}

pub async fn upsert<C: WireClient + Send + Sync + 'static>(
    coordinator: &BulkCoordinator<C>,
    collection: &Collection,
    condition: Condition,
    new_data: &Update,
) -> Result<(), tablestore::Error> {
    update_or_upsert(coordinator, collection, condition, new_data, true).await
}
