//! Pkey expression AST (spec.md section "Index overlay schema"): the
//! contract for how a source attribute row becomes an index row, and how a
//! query condition is matched against an index (spec.md section 4.7.4).
//!
//! `examples/original_source/src/ots_static_index/type_delegates.h` models
//! the runtime `Value` this tree produces (`INTEGER`/`STRING`/`BOOLEAN`/
//! `DOUBLE`/sentinels); the tree shape itself (`Attr`/`Crc64Int`/`Crc64Str`/
//! `Hex`/`ShiftToUint64`/`Concat`) is named directly in spec.md and has no
//! one-to-one original-source counterpart, since the schema file's
//! `Type=Composited`/`Definition` strings (spec.md section 6) are a small
//! expression language the original SDK interprets ad hoc rather than
//! compiling to a tree; this crate compiles them once into `Expr` instead.

use crc::{Crc, CRC_64_REDIS};
use tablestore::value::Value;

use crate::jsonval::{json_to_value, value_to_concat_string, JsonRow};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

/// A pkey column's definition: an expression tree over source attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Read `name` straight out of the source row.
    Attr(String),
    /// CRC-64 over the 8-byte little-endian encoding of an `Integer` value,
    /// itself stored as an `Integer` (the checksum's bit pattern).
    Crc64Int(Box<Expr>),
    /// CRC-64 over the UTF-8 bytes of a `String` value, stored as an
    /// `Integer` (callers usually wrap this in [`Expr::Hex`] for a readable
    /// pkey — spec.md example 4: `Hex(Crc64Str(name))`).
    Crc64Str(Box<Expr>),
    /// Render an `Integer`'s bit pattern as a fixed-width uppercase hex
    /// `String` (16 hex digits).
    Hex(Box<Expr>),
    /// Flip the sign bit of a signed `Integer` so two's-complement ordering
    /// matches unsigned ordering — lets a composited pkey column sort
    /// negative values before positive ones the same way a plain `Integer`
    /// pkey column already does.
    ShiftToUint64(Box<Expr>),
    /// Join the string rendering of each sub-expression with `sep`.
    Concat(Vec<Expr>, String),
}

impl Expr {
    pub fn attr(name: impl Into<String>) -> Expr {
        Expr::Attr(name.into())
    }

    pub fn crc64_int(e: Expr) -> Expr {
        Expr::Crc64Int(Box::new(e))
    }

    pub fn crc64_str(e: Expr) -> Expr {
        Expr::Crc64Str(Box::new(e))
    }

    pub fn hex(e: Expr) -> Expr {
        Expr::Hex(Box::new(e))
    }

    pub fn shift_to_uint64(e: Expr) -> Expr {
        Expr::ShiftToUint64(Box::new(e))
    }

    pub fn concat(parts: Vec<Expr>, sep: impl Into<String>) -> Expr {
        Expr::Concat(parts, sep.into())
    }

    /// Every source attribute name this expression reads, in evaluation
    /// order. Used to check "every required attribute is present" (spec.md
    /// section 4.7.2) and to decide whether a condition fixes this column
    /// (spec.md section 4.7.4).
    pub fn source_attrs(&self, out: &mut Vec<String>) {
        match self {
            Expr::Attr(name) => out.push(name.clone()),
            Expr::Crc64Int(e) | Expr::Crc64Str(e) | Expr::Hex(e) | Expr::ShiftToUint64(e) => e.source_attrs(out),
            Expr::Concat(parts, _) => parts.iter().for_each(|p| p.source_attrs(out)),
        }
    }

    /// Whether this expression hashes its inputs, which destroys ordering
    /// (spec.md section 4.7.4: "hash-based columns match only point
    /// queries").
    pub fn is_hash(&self) -> bool {
        match self {
            Expr::Attr(_) => false,
            Expr::Crc64Int(_) | Expr::Crc64Str(_) => true,
            Expr::Hex(e) | Expr::ShiftToUint64(e) => e.is_hash(),
            Expr::Concat(_, _) => true, // joining several fields loses per-field ordering too
        }
    }

    /// Evaluate this expression over a source row.
    pub fn eval(&self, data: &JsonRow) -> Result<Value, tablestore::Error> {
        match self {
            Expr::Attr(name) => data
                .get(name)
                .map(json_to_value)
                .ok_or_else(|| tablestore::Error::validation(format!("missing attribute `{name}` required by a pkey expression"))),
            Expr::Crc64Int(e) => {
                let v = e.eval(data)?;
                let Value::Integer(i) = v else {
                    return Err(tablestore::Error::validation("Crc64Int requires an Integer operand"));
                };
                Ok(Value::Integer(CRC64.checksum(&i.to_le_bytes()) as i64))
            }
            Expr::Crc64Str(e) => {
                let v = e.eval(data)?;
                let bytes = match &v {
                    Value::String(s) => s.to_vec(),
                    other => value_to_concat_string(other).into_bytes(),
                };
                Ok(Value::Integer(CRC64.checksum(&bytes) as i64))
            }
            Expr::Hex(e) => {
                let v = e.eval(data)?;
                let Value::Integer(i) = v else {
                    return Err(tablestore::Error::validation("Hex requires an Integer operand"));
                };
                Ok(Value::String(bytes::Bytes::from(format!("{:016X}", i as u64))))
            }
            Expr::ShiftToUint64(e) => {
                let v = e.eval(data)?;
                let Value::Integer(i) = v else {
                    return Err(tablestore::Error::validation("ShiftToUint64 requires an Integer operand"));
                };
                Ok(Value::Integer(((i as u64) ^ 0x8000_0000_0000_0000) as i64))
            }
            Expr::Concat(parts, sep) => {
                let rendered =
                    parts.iter().map(|p| p.eval(data).map(|v| value_to_concat_string(&v))).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::String(bytes::Bytes::from(rendered.join(sep))))
            }
        }
    }
}
