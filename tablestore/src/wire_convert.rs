//! Conversions between the typed domain model (`value.rs`/`schema.rs`) and
//! the generated protobuf types (spec.md section 4.4: "request -> protobuf
//! bytes -> HTTP, response bytes -> protobuf -> typed response").
//!
//! Kept as a separate module from `client.rs` so the request-by-request
//! dispatch logic isn't buried under field-by-field mapping boilerplate.

use bytes::Bytes;

use crate::error::Error;
use crate::schema::{PkeyColSchema, PkeyColumnOption, PkeyColumnType, ReservedThroughput, TableOptions, TableSchema};
use crate::value::{Attribute, PrimaryKey, PrimaryKeyColumn, Row, Value};
use crate::wire;

pub fn value_to_proto(v: &Value) -> wire::ValueProto {
    let mut p = wire::ValueProto { kind: wire::value_proto::Kind::Integer as i32, v_int: None, v_bytes: None, v_bool: None, v_double: None };
    match v {
        Value::Integer(i) => {
            p.kind = wire::value_proto::Kind::Integer as i32;
            p.v_int = Some(*i);
        }
        Value::String(s) => {
            p.kind = wire::value_proto::Kind::String as i32;
            p.v_bytes = Some(s.to_vec());
        }
        Value::Binary(b) => {
            p.kind = wire::value_proto::Kind::Binary as i32;
            p.v_bytes = Some(b.to_vec());
        }
        Value::Boolean(b) => {
            p.kind = wire::value_proto::Kind::Boolean as i32;
            p.v_bool = Some(*b);
        }
        Value::Double(d) => {
            p.kind = wire::value_proto::Kind::Double as i32;
            p.v_double = Some(*d);
        }
        Value::InfMin => p.kind = wire::value_proto::Kind::InfMin as i32,
        Value::InfMax => p.kind = wire::value_proto::Kind::InfMax as i32,
        Value::AutoIncrement => p.kind = wire::value_proto::Kind::AutoIncrement as i32,
        Value::None => p.kind = wire::value_proto::Kind::None as i32,
    }
    p
}

pub fn value_from_proto(p: &wire::ValueProto) -> Result<Value, Error> {
    let kind = wire::value_proto::Kind::try_from(p.kind).map_err(|_| Error::corrupted_response("unknown ValueProto kind"))?;
    Ok(match kind {
        wire::value_proto::Kind::Integer => Value::Integer(p.v_int.ok_or_else(|| Error::corrupted_response("missing v_int"))?),
        wire::value_proto::Kind::String => {
            Value::String(Bytes::from(p.v_bytes.clone().ok_or_else(|| Error::corrupted_response("missing v_bytes"))?))
        }
        wire::value_proto::Kind::Binary => {
            Value::Binary(Bytes::from(p.v_bytes.clone().ok_or_else(|| Error::corrupted_response("missing v_bytes"))?))
        }
        wire::value_proto::Kind::Boolean => Value::Boolean(p.v_bool.ok_or_else(|| Error::corrupted_response("missing v_bool"))?),
        wire::value_proto::Kind::Double => Value::Double(p.v_double.ok_or_else(|| Error::corrupted_response("missing v_double"))?),
        wire::value_proto::Kind::InfMin => Value::InfMin,
        wire::value_proto::Kind::InfMax => Value::InfMax,
        wire::value_proto::Kind::AutoIncrement => Value::AutoIncrement,
        wire::value_proto::Kind::None => Value::None,
    })
}

pub fn pkey_column_to_proto(c: &PrimaryKeyColumn) -> wire::PrimaryKeyColumnProto {
    wire::PrimaryKeyColumnProto { name: c.name.clone(), value: Some(value_to_proto(&c.value)) }
}

pub fn pkey_column_from_proto(p: &wire::PrimaryKeyColumnProto) -> Result<PrimaryKeyColumn, Error> {
    let value = p.value.as_ref().ok_or_else(|| Error::corrupted_response("missing pkey column value"))?;
    Ok(PrimaryKeyColumn::new(p.name.clone(), value_from_proto(value)?))
}

pub fn pkey_to_proto(pk: &PrimaryKey) -> Vec<wire::PrimaryKeyColumnProto> {
    pk.0.iter().map(pkey_column_to_proto).collect()
}

pub fn pkey_from_proto(cols: &[wire::PrimaryKeyColumnProto]) -> Result<PrimaryKey, Error> {
    Ok(PrimaryKey::new(cols.iter().map(pkey_column_from_proto).collect::<Result<Vec<_>, _>>()?))
}

pub fn attribute_to_proto(a: &Attribute) -> wire::AttributeProto {
    wire::AttributeProto { name: a.name.clone(), value: Some(value_to_proto(&a.value)), timestamp_msec: a.timestamp_msec }
}

pub fn attribute_from_proto(p: &wire::AttributeProto) -> Result<Attribute, Error> {
    let value = p.value.as_ref().ok_or_else(|| Error::corrupted_response("missing attribute value"))?;
    Ok(Attribute { name: p.name.clone(), value: value_from_proto(value)?, timestamp_msec: p.timestamp_msec })
}

pub fn row_to_proto(row: &Row) -> wire::RowProto {
    wire::RowProto {
        primary_key: pkey_to_proto(&row.primary_key),
        attributes: row.attributes.iter().map(attribute_to_proto).collect(),
    }
}

pub fn row_from_proto(p: &wire::RowProto) -> Result<Row, Error> {
    Ok(Row {
        primary_key: pkey_from_proto(&p.primary_key)?,
        attributes: p.attributes.iter().map(attribute_from_proto).collect::<Result<Vec<_>, _>>()?,
    })
}

fn pkey_type_to_proto(ty: PkeyColumnType) -> wire::PkeyColumnType {
    match ty {
        PkeyColumnType::Integer => wire::PkeyColumnType::PkeyInteger,
        PkeyColumnType::String => wire::PkeyColumnType::PkeyString,
        PkeyColumnType::Binary => wire::PkeyColumnType::PkeyBinary,
    }
}

fn pkey_type_from_proto(ty: wire::PkeyColumnType) -> PkeyColumnType {
    match ty {
        wire::PkeyColumnType::PkeyInteger => PkeyColumnType::Integer,
        wire::PkeyColumnType::PkeyString => PkeyColumnType::String,
        wire::PkeyColumnType::PkeyBinary => PkeyColumnType::Binary,
    }
}

fn pkey_option_to_proto(opt: PkeyColumnOption) -> wire::PkeyColumnOption {
    match opt {
        PkeyColumnOption::None => wire::PkeyColumnOption::PkeyOptionNone,
        PkeyColumnOption::AutoIncrement => wire::PkeyColumnOption::PkeyOptionAutoIncrement,
    }
}

fn pkey_option_from_proto(opt: wire::PkeyColumnOption) -> PkeyColumnOption {
    match opt {
        wire::PkeyColumnOption::PkeyOptionNone => PkeyColumnOption::None,
        wire::PkeyColumnOption::PkeyOptionAutoIncrement => PkeyColumnOption::AutoIncrement,
    }
}

pub fn table_options_to_proto(o: &TableOptions) -> wire::TableOptionsProto {
    wire::TableOptionsProto {
        reserved_throughput_read: o.reserved_throughput.map(|r| r.read),
        reserved_throughput_write: o.reserved_throughput.map(|r| r.write),
        ttl_seconds: o.ttl.map(|d| d.as_secs() as i32),
        max_versions: o.max_versions.map(|v| v as i32),
        bloom_filter_type: o.bloom_filter_type.clone(),
        block_size: o.block_size.map(|v| v as i32),
        max_time_deviation_seconds: o.max_time_deviation.map(|d| d.as_secs() as i32),
    }
}

pub fn table_options_from_proto(p: &wire::TableOptionsProto) -> TableOptions {
    TableOptions {
        reserved_throughput: match (p.reserved_throughput_read, p.reserved_throughput_write) {
            (Some(read), Some(write)) => Some(ReservedThroughput { read, write }),
            _ => None,
        },
        ttl: p.ttl_seconds.map(|s| core::time::Duration::from_secs(s.max(0) as u64)),
        max_versions: p.max_versions.map(|v| v.max(0) as u32),
        bloom_filter_type: p.bloom_filter_type.clone(),
        block_size: p.block_size.map(|v| v.max(0) as u32),
        max_time_deviation: p.max_time_deviation_seconds.map(|s| core::time::Duration::from_secs(s.max(0) as u64)),
    }
}

pub fn table_schema_to_proto(s: &TableSchema) -> wire::TableSchemaProto {
    wire::TableSchemaProto {
        name: s.name.clone(),
        pkey_schema: s
            .pkey_schema
            .iter()
            .map(|c| wire::PkeyColumnSchemaProto {
                name: c.name.clone(),
                r#type: pkey_type_to_proto(c.ty) as i32,
                option: pkey_option_to_proto(c.option) as i32,
            })
            .collect(),
        options: Some(table_options_to_proto(&s.options)),
    }
}

pub fn table_schema_from_proto(p: &wire::TableSchemaProto) -> Result<TableSchema, Error> {
    let pkey_schema = p
        .pkey_schema
        .iter()
        .map(|c| {
            let ty = wire::PkeyColumnType::try_from(c.r#type).map_err(|_| Error::corrupted_response("unknown pkey column type"))?;
            let option =
                wire::PkeyColumnOption::try_from(c.option).map_err(|_| Error::corrupted_response("unknown pkey column option"))?;
            PkeyColSchema::new(c.name.clone(), pkey_type_from_proto(ty), pkey_option_from_proto(option))
                .map_err(Error::validation)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let options = p.options.as_ref().map(table_options_from_proto).unwrap_or_default();
    TableSchema::new(p.name.clone(), pkey_schema, options).map_err(Error::validation)
}
