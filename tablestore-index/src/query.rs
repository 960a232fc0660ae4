//! `Find` (spec.md section 4.7.5): select a table, build one or more
//! `GetRow`/`GetRange` requests from the condition, run them through the
//! operator pipeline, and drain the sink.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tablestore::bulk::BulkCoordinator;
use tablestore::client::{GetRangeArgs, WireClient};
use tablestore::value::{PrimaryKey, PrimaryKeyColumn, Row, Value};

use crate::condition::Condition;
use crate::jsonval::{value_to_json, JsonRow};
use crate::operator::Graph;
use crate::schema::Collection;

/// Exclusive-upper-bound conversion for a composite pkey tuple (spec.md
/// section 4.7.5's boundary rule): find the rightmost *concrete* column,
/// replace it with its successor, and reset every column to its right to
/// `InfMin` — `(1, InfMax)` becomes `(2, InfMin)`, not `(1, InfMax)`.
pub fn exclusive_upper(pkey: &[Value]) -> Vec<Value> {
    let mut out = pkey.to_vec();
    if let Some(i) = out.iter().rposition(|v| !matches!(v, Value::InfMin | Value::InfMax)) {
        out[i] = out[i].successor();
        for v in &mut out[i + 1..] {
            *v = Value::InfMin;
        }
    }
    out
}

enum PlanColumn {
    /// Every value this column may take, for the cross product (spec.md:
    /// "`$in` on multiple columns multiplies request count").
    Point(Vec<Value>),
    /// A comparable range on this (necessarily non-hash) column; the last
    /// column contributing to the plan.
    Range { lower: Value, upper: Value },
    /// No condition reached this column; it spans its full domain.
    Unconstrained,
}

fn plan_column(expr: &crate::expr::Expr, condition: &Condition) -> PlanColumn {
    let mut attrs = Vec::new();
    expr.source_attrs(&mut attrs);

    if expr.is_hash() {
        let values: Option<Vec<Vec<Value>>> =
            attrs.iter().map(|a| condition.0.get(a).and_then(|f| f.point_values())).collect();
        return match values {
            Some(per_attr) => PlanColumn::Point(cross_product_eval(expr, &attrs, &per_attr)),
            None => PlanColumn::Unconstrained,
        };
    }

    let Some(attr) = attrs.first() else { return PlanColumn::Unconstrained };
    match condition.0.get(attr) {
        Some(field) => {
            if let Some(values) = field.point_values() {
                PlanColumn::Point(values)
            } else if let Some((lower, upper)) = field.range_bounds() {
                PlanColumn::Range { lower: lower.cloned().unwrap_or(Value::InfMin), upper: upper.cloned().unwrap_or(Value::InfMax) }
            } else {
                PlanColumn::Unconstrained
            }
        }
        None => PlanColumn::Unconstrained,
    }
}

/// Evaluate `expr` once per combination of its source attributes' point
/// values (spec.md: "`$in` on multiple columns multiplies request count").
fn cross_product_eval(expr: &crate::expr::Expr, attrs: &[String], per_attr_values: &[Vec<Value>]) -> Vec<Value> {
    let mut combos: Vec<JsonRow> = vec![JsonRow::new()];
    for (attr, values) in attrs.iter().zip(per_attr_values) {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for v in values {
                let mut row = combo.clone();
                row.insert(attr.clone(), value_to_json(v));
                next.push(row);
            }
        }
        combos = next;
    }
    combos.iter().filter_map(|row| expr.eval(row).ok()).collect()
}

/// One concrete request to issue: either point lookups or a bounded scan.
enum PlannedRequest {
    GetRow(PrimaryKey),
    GetRange { start: PrimaryKey, stop: PrimaryKey },
}

fn build_requests(pkey_exprs: &[(String, crate::expr::Expr)], condition: &Condition) -> Vec<PlannedRequest> {
    let plan: Vec<PlanColumn> = pkey_exprs.iter().map(|(_, e)| plan_column(e, condition)).collect();

    if plan.iter().all(|c| matches!(c, PlanColumn::Point(_))) {
        // every column fixed to a point: cross product of GetRow requests.
        let mut combos: Vec<Vec<Value>> = vec![vec![]];
        for col in &plan {
            let PlanColumn::Point(values) = col else { unreachable!() };
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for v in values {
                    let mut c = combo.clone();
                    c.push(v.clone());
                    next.push(c);
                }
            }
            combos = next;
        }
        return combos
            .into_iter()
            .map(|values| {
                let cols =
                    pkey_exprs.iter().zip(values).map(|((name, _), v)| PrimaryKeyColumn::new(name.clone(), v)).collect();
                PlannedRequest::GetRow(PrimaryKey::new(cols))
            })
            .collect();
    }

    // find the point-fixed prefix, then one Range or Unconstrained column, then
    // everything after defaults to InfMin/InfMax (spec.md: "remaining dimensions
    // taking their lower/upper bounds from the condition or InfMin/InfMax").
    let mut point_prefix: Vec<&Vec<Value>> = Vec::new();
    let mut tail_start = plan.len();
    for (i, col) in plan.iter().enumerate() {
        match col {
            PlanColumn::Point(values) => point_prefix.push(values),
            _ => {
                tail_start = i;
                break;
            }
        }
    }

    let mut combos: Vec<Vec<Value>> = vec![vec![]];
    for values in &point_prefix {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for v in values.iter() {
                let mut c = combo.clone();
                c.push(v.clone());
                next.push(c);
            }
        }
        combos = next;
    }

    combos
        .into_iter()
        .map(|prefix| {
            let mut start_values = prefix.clone();
            let mut stop_values = prefix;
            for col in &plan[tail_start..] {
                match col {
                    PlanColumn::Range { lower, upper } => {
                        start_values.push(lower.clone());
                        stop_values.push(upper.clone());
                    }
                    PlanColumn::Unconstrained => {
                        start_values.push(Value::InfMin);
                        stop_values.push(Value::InfMax);
                    }
                    PlanColumn::Point(_) => unreachable!("point columns only precede the tail"),
                }
            }
            let stop_values = exclusive_upper(&stop_values);
            let to_pkey = |values: Vec<Value>| {
                PrimaryKey::new(pkey_exprs.iter().zip(values).map(|((name, _), v)| PrimaryKeyColumn::new(name.clone(), v)).collect())
            };
            PlannedRequest::GetRange { start: to_pkey(start_values), stop: to_pkey(stop_values) }
        })
        .collect()
}

fn row_to_json_row(row: &Row) -> JsonRow {
    let mut out = JsonRow::new();
    for col in &row.primary_key.0 {
        out.insert(col.name.clone(), value_to_json(&col.value));
    }
    for attr in &row.attributes {
        out.insert(attr.name.clone(), value_to_json(&attr.value));
    }
    out
}

/// Run `Find(collection, projection, condition, start, limit, order)`
/// (spec.md section 4.7.5).
pub async fn find<C: WireClient + Send + Sync + 'static>(
    coordinator: &BulkCoordinator<C>,
    collection: &Collection,
    projection: Vec<String>,
    condition: Condition,
    start: usize,
    limit: usize,
    order: Option<(String, i32)>,
) -> Result<Vec<JsonRow>, tablestore::Error> {
    let table_name = crate::select::select_table(collection, &condition).to_string();
    let pkey_exprs = collection.pkey_exprs(&table_name).expect("selected table must be in the collection").to_vec();
    let is_index = collection.is_index(&table_name);
    let requests = build_requests(&pkey_exprs, &condition);

    let quick_quit = Arc::new(AtomicBool::new(false));

    // Build the pipeline downstream-first: row_to_json sink <- [slice_window]
    // <- [sorter] <- matcher chain, then wire matchers -> ... -> sink.
    let mut graph = Graph::new();
    let sink = graph.row_to_json(projection);
    let mut tail = sink;
    if start > 0 || limit > 0 {
        let window = graph.slice_window(start, limit, Arc::clone(&quick_quit));
        graph.connect(window, tail);
        tail = window;
    }
    if let Some((field, direction)) = &order {
        let sorter = graph.sorter(field.clone(), *direction);
        graph.connect(sorter, tail);
        tail = sorter;
    }

    let mut entry = tail;
    for (attr, field) in &condition.0 {
        let node = match field {
            crate::condition::ConditionField::Eq(v) => graph.exact_matcher(attr.clone(), v.clone()),
            crate::condition::ConditionField::In(vs) => graph.inside_matcher(attr.clone(), vs.clone()),
            crate::condition::ConditionField::Range(ops) => graph.range_matcher(attr.clone(), ops.clone()),
        };
        graph.connect(node, entry);
        entry = node;
    }

    for req in requests {
        match req {
            PlannedRequest::GetRow(pkey) => match coordinator.get_row(table_name.clone(), pkey, vec![]).await {
                tablestore::client::RowResult::Ok(Some(row)) => {
                    feed_row(coordinator, collection, &table_name, is_index, &mut graph, entry, row).await?;
                }
                tablestore::client::RowResult::Ok(None) => {}
                tablestore::client::RowResult::Err(e) => return Err(e),
            },
            PlannedRequest::GetRange { start: start_pkey, stop } => {
                let mut cursor = start_pkey;
                loop {
                    if quick_quit.load(std::sync::atomic::Ordering::SeqCst) {
                        break;
                    }
                    let args = GetRangeArgs {
                        table_name: table_name.clone(),
                        start_primary_key: cursor.clone(),
                        end_primary_key: stop.clone(),
                        columns_to_get: vec![],
                        limit: None,
                        forward: true,
                    };
                    let page = coordinator.get_range(args).await?;
                    for row in page.rows {
                        if quick_quit.load(std::sync::atomic::Ordering::SeqCst) {
                            break;
                        }
                        feed_row(coordinator, collection, &table_name, is_index, &mut graph, entry, row).await?;
                    }
                    match page.next_start_primary_key {
                        Some(next) => cursor = next,
                        None => break,
                    }
                }
            }
        }
    }

    graph.on_completion(entry);
    Ok(graph.take_sink(sink))
}

async fn feed_row<C: WireClient + Send + Sync + 'static>(
    coordinator: &BulkCoordinator<C>,
    collection: &Collection,
    table_name: &str,
    is_index: bool,
    graph: &mut Graph,
    entry: crate::operator::NodeId,
    row: Row,
) -> Result<(), tablestore::Error> {
    if !is_index {
        graph.on_next(entry, row_to_json_row(&row));
        return Ok(());
    }

    // IndexRowToPrimary (spec.md section 4.7.1): re-project into the primary
    // table's pkey and join through GetRow; an orphaned index row (primary
    // already deleted) is silently dropped.
    let joined_source = row_to_json_row(&row);
    let primary_pkey = match collection.primary_pkey_exprs.iter().map(|(name, e)| {
        e.eval(&joined_source).map(|v| PrimaryKeyColumn::new(name.clone(), v))
    }).collect::<Result<Vec<_>, _>>() {
        Ok(cols) => PrimaryKey::new(cols),
        Err(_) => return Ok(()), // index row doesn't carry enough to rejoin; drop it
    };
    let _ = table_name;
    match coordinator.get_row(collection.primary_table_name(), primary_pkey, vec![]).await {
        tablestore::client::RowResult::Ok(Some(primary_row)) => {
            graph.on_next(entry, row_to_json_row(&primary_row));
        }
        tablestore::client::RowResult::Ok(None) => {}
        tablestore::client::RowResult::Err(e) if e.is_temporary() => return Err(e),
        tablestore::client::RowResult::Err(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_upper_bumps_rightmost_concrete_column_and_resets_the_tail() {
        let upper = exclusive_upper(&[Value::Integer(5), Value::InfMax]);
        assert_eq!(upper, vec![Value::Integer(6), Value::InfMin]);
    }

    #[test]
    fn exclusive_upper_bumps_trailing_concrete_value() {
        let upper = exclusive_upper(&[Value::Integer(5), Value::Integer(1)]);
        assert_eq!(upper, vec![Value::Integer(5), Value::Integer(2)]);
    }
}
