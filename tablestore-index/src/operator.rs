//! The post-fetch operator pipeline (spec.md section 4.7.1): a small DAG of
//! match/sort/window/project nodes connected by "observer" edges. Rows a
//! [`crate::query`] producer fetches are pushed in with [`Graph::on_next`];
//! [`Graph::on_completion`] flushes buffering stages (the sorter) and
//! [`Graph::take_sink`] drains the terminal `RowToJson` output.
//!
//! Grounded in spec.md's design note 9 ("model each operator as a struct
//! owned by a container keyed by node id (arena + indices), with edges as
//! lists of child ids; traverse by id to avoid cycles and simplify
//! ownership") — the observer-DAG shape the original C++ SDK builds with
//! heap-allocated nodes and back references.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::condition::{Condition, RangeOp};
use crate::jsonval::{json_to_value, JsonRow};
use tablestore::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

enum Node {
    ExactMatcher { attr: String, value: Value },
    InsideMatcher { attr: String, values: Vec<Value> },
    RangeMatcher { attr: String, ops: Vec<(RangeOp, Value)> },
    Sorter { field: String, direction: i32, buffer: Vec<JsonRow> },
    SliceWindow { start: usize, limit: usize, skipped: usize, emitted: usize, quick_quit: Arc<AtomicBool> },
    RowToJson { projection: Vec<String>, sink: Vec<JsonRow> },
}

/// Arena of operator nodes plus their child-edge lists.
pub struct Graph {
    nodes: Vec<Node>,
    children: Vec<Vec<NodeId>>,
}

impl Graph {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), children: Vec::new() }
    }

    fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.children.push(Vec::new());
        NodeId(self.nodes.len() - 1)
    }

    pub fn exact_matcher(&mut self, attr: impl Into<String>, value: Value) -> NodeId {
        self.add(Node::ExactMatcher { attr: attr.into(), value })
    }

    pub fn inside_matcher(&mut self, attr: impl Into<String>, values: Vec<Value>) -> NodeId {
        self.add(Node::InsideMatcher { attr: attr.into(), values })
    }

    pub fn range_matcher(&mut self, attr: impl Into<String>, ops: Vec<(RangeOp, Value)>) -> NodeId {
        self.add(Node::RangeMatcher { attr: attr.into(), ops })
    }

    pub fn sorter(&mut self, field: impl Into<String>, direction: i32) -> NodeId {
        self.add(Node::Sorter { field: field.into(), direction, buffer: Vec::new() })
    }

    pub fn slice_window(&mut self, start: usize, limit: usize, quick_quit: Arc<AtomicBool>) -> NodeId {
        self.add(Node::SliceWindow { start, limit, skipped: 0, emitted: 0, quick_quit })
    }

    pub fn row_to_json(&mut self, projection: Vec<String>) -> NodeId {
        self.add(Node::RowToJson { projection, sink: Vec::new() })
    }

    /// Build the full matcher chain for `condition` (spec.md section 4.7.5
    /// step 4: "append ExactMatcher / InsideMatcher / RangeMatcher for
    /// every condition field"), returning the id of the last matcher (or
    /// `upstream` unchanged if the condition is empty).
    pub fn append_matchers(&mut self, upstream: NodeId, condition: &Condition) -> NodeId {
        let mut last = upstream;
        for (attr, field) in &condition.0 {
            let node = match field {
                crate::condition::ConditionField::Eq(v) => self.exact_matcher(attr.clone(), v.clone()),
                crate::condition::ConditionField::In(vs) => self.inside_matcher(attr.clone(), vs.clone()),
                crate::condition::ConditionField::Range(ops) => self.range_matcher(attr.clone(), ops.clone()),
            };
            self.connect(last, node);
            last = node;
        }
        last
    }

    pub fn connect(&mut self, parent: NodeId, child: NodeId) {
        self.children[parent.0].push(child);
    }

    /// Push one row into `id`; it is matched/buffered/projected and, if it
    /// survives, forwarded to every child.
    pub fn on_next(&mut self, id: NodeId, row: JsonRow) {
        enum Action {
            Drop,
            Forward(JsonRow),
            Buffer,
        }

        let action = match &mut self.nodes[id.0] {
            Node::ExactMatcher { attr, value } => {
                let keep = row.get(attr).map(json_to_value).as_ref() == Some(value);
                if keep { Action::Forward(row) } else { Action::Drop }
            }
            Node::InsideMatcher { attr, values } => {
                let keep = row.get(attr).map(|v| values.contains(&json_to_value(v))).unwrap_or(false);
                if keep { Action::Forward(row) } else { Action::Drop }
            }
            Node::RangeMatcher { attr, ops } => {
                let keep = match row.get(attr).map(json_to_value) {
                    Some(v) => ops.iter().all(|(op, bound)| range_op_holds(*op, &v, bound)),
                    None => false,
                };
                if keep { Action::Forward(row) } else { Action::Drop }
            }
            Node::Sorter { buffer, .. } => {
                buffer.push(row);
                Action::Buffer
            }
            Node::SliceWindow { start, limit, skipped, emitted, quick_quit } => {
                if *skipped < *start {
                    *skipped += 1;
                    Action::Drop
                } else if *limit == 0 || *emitted < *limit {
                    *emitted += 1;
                    if *limit != 0 && *emitted >= *limit {
                        quick_quit.store(true, Ordering::SeqCst);
                    }
                    Action::Forward(row)
                } else {
                    Action::Drop
                }
            }
            Node::RowToJson { projection, sink } => {
                sink.push(project(row, projection));
                Action::Buffer
            }
        };

        if let Action::Forward(row) = action {
            let children = self.children[id.0].clone();
            for child in children {
                self.on_next(child, row.clone());
            }
        }
    }

    /// Flush buffering stages and propagate completion downstream (spec.md
    /// section 4.7.1: "Sorter — buffers until upstream completes, then
    /// emits in order").
    pub fn on_completion(&mut self, id: NodeId) {
        if let Node::Sorter { field, direction, buffer } = &mut self.nodes[id.0] {
            let field = field.clone();
            let direction = *direction;
            let mut buffer = std::mem::take(buffer);
            buffer.sort_by(|a, b| {
                let av = a.get(&field).map(json_to_value).unwrap_or(Value::None);
                let bv = b.get(&field).map(json_to_value).unwrap_or(Value::None);
                let ord = av.partial_compare(&bv).unwrap_or(core::cmp::Ordering::Equal);
                if direction < 0 { ord.reverse() } else { ord }
            });
            let children = self.children[id.0].clone();
            for row in buffer {
                for &child in &children {
                    self.on_next(child, row.clone());
                }
            }
        }
        let children = self.children[id.0].clone();
        for child in children {
            self.on_completion(child);
        }
    }

    pub fn take_sink(&mut self, id: NodeId) -> Vec<JsonRow> {
        match &mut self.nodes[id.0] {
            Node::RowToJson { sink, .. } => std::mem::take(sink),
            _ => Vec::new(),
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn range_op_holds(op: RangeOp, value: &Value, bound: &Value) -> bool {
    use core::cmp::Ordering::*;
    match op {
        RangeOp::Lt => value.partial_compare(bound) == Some(Less),
        RangeOp::Le => matches!(value.partial_compare(bound), Some(Less | Equal)),
        RangeOp::Gt => value.partial_compare(bound) == Some(Greater),
        RangeOp::Ge => matches!(value.partial_compare(bound), Some(Greater | Equal)),
        RangeOp::Ne => value.partial_compare(bound) != Some(Equal),
    }
}

fn project(row: JsonRow, projection: &[String]) -> JsonRow {
    if projection.is_empty() {
        return row;
    }
    let mut out = JsonRow::new();
    for field in projection {
        if let Some(v) = row.get(field) {
            out.insert(field.clone(), v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: serde_json::Value) -> JsonRow {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn sorter_emits_in_order_only_after_completion() {
        let mut g = Graph::new();
        let sorter = g.sorter("pkey", 1);
        let sink = g.row_to_json(vec![]);
        g.connect(sorter, sink);

        g.on_next(sorter, row(json!({"pkey": 3})));
        g.on_next(sorter, row(json!({"pkey": 1})));
        g.on_next(sorter, row(json!({"pkey": 2})));
        assert!(g.take_sink(sink).is_empty(), "sorter must not emit before completion");

        g.on_completion(sorter);
        let out = g.take_sink(sink);
        let pkeys: Vec<i64> = out.iter().map(|r| r["pkey"].as_i64().unwrap()).collect();
        assert_eq!(pkeys, vec![1, 2, 3]);
    }

    #[test]
    fn slice_window_sets_quick_quit_once_limit_reached() {
        let mut g = Graph::new();
        let flag = Arc::new(AtomicBool::new(false));
        let window = g.slice_window(1, 1, Arc::clone(&flag));
        let sink = g.row_to_json(vec![]);
        g.connect(window, sink);

        g.on_next(window, row(json!({"pkey": 0})));
        assert!(!flag.load(Ordering::SeqCst));
        g.on_next(window, row(json!({"pkey": 1})));
        assert!(flag.load(Ordering::SeqCst));
        g.on_next(window, row(json!({"pkey": 2})));

        let out = g.take_sink(sink);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["pkey"], 1);
    }

    #[test]
    fn row_to_json_projects_requested_columns_only() {
        let mut g = Graph::new();
        let sink = g.row_to_json(vec!["a".to_string()]);
        g.on_next(sink, row(json!({"a": 1, "b": 2})));
        let out = g.take_sink(sink);
        assert_eq!(out[0], row(json!({"a": 1})));
    }

    #[test]
    fn exact_matcher_drops_non_matching_rows() {
        let mut g = Graph::new();
        let matcher = g.exact_matcher("a", Value::Integer(1));
        let sink = g.row_to_json(vec![]);
        g.connect(matcher, sink);
        g.on_next(matcher, row(json!({"a": 1})));
        g.on_next(matcher, row(json!({"a": 2})));
        assert_eq!(g.take_sink(sink).len(), 1);
    }
}
