//! Typed cell values, primary keys and rows (spec.md section 3).

use core::cmp::Ordering;

use bytes::Bytes;

/// A single cell value. Ordering is total only within the same variant —
/// comparing across variants is [`Uncomparable`](Value::partial_cmp).
///
/// `InfMin`/`InfMax` are primary-key range sentinels only; `AutoIncrement`
/// marks a server-assigned pkey column at insert time; `None` means absent.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    String(Bytes),
    Binary(Bytes),
    Boolean(bool),
    Double(f64),
    InfMin,
    InfMax,
    AutoIncrement,
    None,
}

impl Value {
    /// Compare two values of (expectedly) the same variant. Returns `None`
    /// when the variants differ (spec.md: "any cross-variant compare returns
    /// Uncomparable") or when a double side is NaN/infinite.
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::InfMin, Value::InfMin) => Some(Ordering::Equal),
            (Value::InfMax, Value::InfMax) => Some(Ordering::Equal),
            (Value::InfMin, _) => Some(Ordering::Less),
            (_, Value::InfMin) => Some(Ordering::Greater),
            (Value::InfMax, _) => Some(Ordering::Greater),
            (_, Value::InfMax) => Some(Ordering::Less),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => {
                if a.is_nan() || b.is_nan() || a.is_infinite() || b.is_infinite() {
                    None
                } else {
                    a.partial_cmp(b)
                }
            }
            _ => None,
        }
    }

    /// The successor of a concrete value, used to turn an inclusive upper
    /// bound into an exclusive one (spec.md section 4.7.5).
    ///
    /// # Panics
    /// On `InfMin`/`InfMax`/`AutoIncrement`/`None`, which have no successor;
    /// callers must special-case sentinels before calling this (see
    /// `tablestore_index::query::exclusive_upper`).
    pub fn successor(&self) -> Value {
        match self {
            Value::Integer(i) => Value::Integer(i.checked_add(1).expect("pkey integer upper bound overflow")),
            Value::String(s) => {
                let mut v = s.to_vec();
                v.push(0);
                Value::String(Bytes::from(v))
            }
            Value::Binary(b) => {
                let mut v = b.to_vec();
                v.push(0);
                Value::Binary(Bytes::from(v))
            }
            // spec.md's successor table only defines false -> true; true has no further
            // successor within the variant and is never produced as an upper bound in practice.
            Value::Boolean(_) => Value::Boolean(true),
            Value::Double(d) => Value::Double(d + f64::EPSILON),
            Value::InfMin | Value::InfMax | Value::AutoIncrement | Value::None => {
                panic!("value variant has no successor")
            }
        }
    }

    pub fn is_pkey_sentinel(&self) -> bool {
        matches!(self, Value::InfMin | Value::InfMax)
    }
}

/// `(name, value)` pair that makes up one column of a [`PrimaryKey`].
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeyColumn {
    pub name: String,
    pub value: Value,
}

impl PrimaryKeyColumn {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self { name: name.into(), value }
    }
}

/// Ordered sequence of primary-key columns. Order is semantically significant
/// and must match schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimaryKey(pub Vec<PrimaryKeyColumn>);

impl PrimaryKey {
    pub fn new(columns: Vec<PrimaryKeyColumn>) -> Self {
        Self(columns)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|c| c.name == name).map(|c| &c.value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validates that no pkey value is an `InfMin`/`InfMax` sentinel, as
    /// required for writes (spec.md section 3 invariants).
    pub fn validate_for_write(&self) -> Result<(), &'static str> {
        if self.0.iter().any(|c| c.value.is_pkey_sentinel()) {
            return Err("primary key value must not be InfMin/InfMax in a write");
        }
        Ok(())
    }
}

/// `(name, value, optional timestamp_msec)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Value,
    pub timestamp_msec: Option<i64>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self { name: name.into(), value, timestamp_msec: None }
    }

    pub fn with_timestamp(name: impl Into<String>, value: Value, timestamp_msec: i64) -> Self {
        Self { name: name.into(), value, timestamp_msec: Some(timestamp_msec) }
    }

    /// Timestamps, when present, must be non-negative and millisecond-aligned
    /// (spec.md section 3 invariants — "millisecond-aligned" is trivially true
    /// for any `i64` we store directly in milliseconds; the check here is the
    /// non-negativity half).
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(ts) = self.timestamp_msec {
            if ts < 0 {
                return Err("attribute timestamp must be non-negative");
            }
        }
        Ok(())
    }
}

/// A full row: primary key plus attribute columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub primary_key: PrimaryKey,
    pub attributes: Vec<Attribute>,
}

impl Row {
    pub fn new(primary_key: PrimaryKey, attributes: Vec<Attribute>) -> Self {
        Self { primary_key, attributes }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.iter().find(|a| a.name == name).map(|a| &a.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_variant_compare_is_uncomparable() {
        assert_eq!(Value::Integer(1).partial_compare(&Value::String(Bytes::from_static(b"1"))), None);
    }

    #[test]
    fn inf_min_max_bracket_concrete_values() {
        assert_eq!(Value::InfMin.partial_compare(&Value::Integer(i64::MIN)), Some(Ordering::Less));
        assert_eq!(Value::InfMax.partial_compare(&Value::Integer(i64::MAX)), Some(Ordering::Greater));
    }

    #[test]
    fn successor_string_appends_nul() {
        let v = Value::String(Bytes::from_static(b"abc"));
        assert_eq!(v.successor(), Value::String(Bytes::from(b"abc\0".to_vec())));
    }

    #[test]
    fn successor_integer_increments() {
        assert_eq!(Value::Integer(41).successor(), Value::Integer(42));
    }

    #[test]
    fn successor_bool_false_to_true() {
        assert_eq!(Value::Boolean(false).successor(), Value::Boolean(true));
    }

    #[test]
    fn write_rejects_sentinel_pkey() {
        let pk = PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::InfMin)]);
        assert!(pk.validate_for_write().is_err());
    }

    #[test]
    fn attribute_rejects_negative_timestamp() {
        let a = Attribute::with_timestamp("a", Value::Integer(1), -1);
        assert!(a.validate().is_err());
    }
}
