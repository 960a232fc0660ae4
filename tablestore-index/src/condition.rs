//! Query conditions (spec.md section 4.7.4/4.7.5): `{attr: {$gte:-1,
//! $lte:1}}`-shaped predicates over source attribute names, used both to
//! pick an index (section 4.7.4) and to post-filter fetched rows (section
//! 4.7.1's `ExactMatcher`/`InsideMatcher`/`RangeMatcher`).

use std::collections::BTreeMap;

use tablestore::value::Value;

use crate::jsonval::{json_to_value, JsonRow};

/// Comparison operator for [`ConditionField::Range`] (spec.md: `op ∈ {lt,
/// le, gt, ge, ne}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

/// One attribute's predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionField {
    Eq(Value),
    In(Vec<Value>),
    /// One or more range comparisons ANDed together (e.g. `$gte` and `$lte`
    /// together bound an interval; a bare `$ne` only excludes one value and
    /// never fixes the column, per spec.md section 4.7.4).
    Range(Vec<(RangeOp, Value)>),
}

impl ConditionField {
    /// The concrete set of values this field pins the column to, if any
    /// (an `Eq` is a singleton, `In` a set) — used for both index-selection
    /// "point fixed" checks and cross-product request construction (spec.md
    /// section 4.7.5: "`$in` on multiple columns multiplies request count").
    pub fn point_values(&self) -> Option<Vec<Value>> {
        match self {
            ConditionField::Eq(v) => Some(vec![v.clone()]),
            ConditionField::In(vs) if !vs.is_empty() => Some(vs.clone()),
            _ => None,
        }
    }

    /// The `(lower, upper)` bound this field imposes, ignoring any `$ne`
    /// (spec.md section 4.7.4: "`$ne` doesn't count" toward fixing a
    /// column as a range). Bounds are inclusive on the side present.
    pub fn range_bounds(&self) -> Option<(Option<&Value>, Option<&Value>)> {
        let ConditionField::Range(ops) = self else { return None };
        let mut lower = None;
        let mut upper = None;
        let mut saw_comparison = false;
        for (op, v) in ops {
            match op {
                RangeOp::Ge | RangeOp::Gt => {
                    lower = Some(v);
                    saw_comparison = true;
                }
                RangeOp::Le | RangeOp::Lt => {
                    upper = Some(v);
                    saw_comparison = true;
                }
                RangeOp::Ne => {}
            }
        }
        saw_comparison.then_some((lower, upper))
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ConditionField::Eq(expected) => value.partial_compare(expected) == Some(core::cmp::Ordering::Equal),
            ConditionField::In(set) => set.iter().any(|v| value.partial_compare(v) == Some(core::cmp::Ordering::Equal)),
            ConditionField::Range(ops) => ops.iter().all(|(op, v)| match op {
                RangeOp::Lt => value.partial_compare(v) == Some(core::cmp::Ordering::Less),
                RangeOp::Le => matches!(value.partial_compare(v), Some(core::cmp::Ordering::Less | core::cmp::Ordering::Equal)),
                RangeOp::Gt => value.partial_compare(v) == Some(core::cmp::Ordering::Greater),
                RangeOp::Ge => matches!(value.partial_compare(v), Some(core::cmp::Ordering::Greater | core::cmp::Ordering::Equal)),
                RangeOp::Ne => value.partial_compare(v) != Some(core::cmp::Ordering::Equal),
            }),
        }
    }
}

/// A full condition: one predicate per constrained source attribute, ANDed
/// together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition(pub BTreeMap<String, ConditionField>);

impl Condition {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn eq(mut self, attr: impl Into<String>, value: Value) -> Self {
        self.0.insert(attr.into(), ConditionField::Eq(value));
        self
    }

    pub fn is_in(mut self, attr: impl Into<String>, values: Vec<Value>) -> Self {
        self.0.insert(attr.into(), ConditionField::In(values));
        self
    }

    pub fn range(mut self, attr: impl Into<String>, ops: Vec<(RangeOp, Value)>) -> Self {
        self.0.insert(attr.into(), ConditionField::Range(ops));
        self
    }

    /// Whether every field in this condition holds for `data` (spec.md
    /// section 4.7.1: `ExactMatcher`/`InsideMatcher`/`RangeMatcher` chained,
    /// which is equivalent to this conjunction — each drops rows failing
    /// its own predicate).
    pub fn matches(&self, data: &JsonRow) -> bool {
        self.0.iter().all(|(attr, field)| match data.get(attr) {
            Some(v) => field.matches(&json_to_value(v)),
            None => false,
        })
    }

    /// Whether this condition is a point query over exactly the given pkey
    /// column names — required for `Update`/`Upsert` (spec.md section
    /// 4.7.6: "the condition must be a point query on pkey columns only,
    /// else reject").
    pub fn is_point_query_on(&self, pkey_columns: &[String]) -> bool {
        if self.0.len() != pkey_columns.len() {
            return false;
        }
        pkey_columns.iter().all(|c| matches!(self.0.get(c), Some(f) if f.point_values().is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: serde_json::Value) -> JsonRow {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn range_with_only_ne_does_not_count_as_a_bound() {
        let f = ConditionField::Range(vec![(RangeOp::Ne, Value::Integer(3))]);
        assert!(f.range_bounds().is_none());
    }

    #[test]
    fn range_with_gte_and_lte_has_both_bounds() {
        let f = ConditionField::Range(vec![(RangeOp::Ge, Value::Integer(-1)), (RangeOp::Le, Value::Integer(1))]);
        let (lower, upper) = f.range_bounds().unwrap();
        assert_eq!(lower, Some(&Value::Integer(-1)));
        assert_eq!(upper, Some(&Value::Integer(1)));
    }

    #[test]
    fn condition_matches_requires_every_field() {
        let cond = Condition::new().eq("a", Value::Integer(1)).range("b", vec![(RangeOp::Ge, Value::Integer(0))]);
        assert!(cond.matches(&row(json!({"a": 1, "b": 5}))));
        assert!(!cond.matches(&row(json!({"a": 2, "b": 5}))));
        assert!(!cond.matches(&row(json!({"a": 1, "b": -5}))));
    }

    #[test]
    fn point_query_on_requires_every_pkey_column_fixed() {
        let cond = Condition::new().eq("pkey", Value::Integer(1));
        assert!(cond.is_point_query_on(&["pkey".to_string()]));
        assert!(!cond.is_point_query_on(&["pkey".to_string(), "other".to_string()]));
    }
}
