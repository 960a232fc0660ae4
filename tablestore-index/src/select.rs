//! Index selection by "hit ratio" (spec.md section 4.7.4).

use crate::condition::Condition;
use crate::expr::Expr;
use crate::schema::Collection;

/// Pick the best candidate table (primary or an index) for `condition`,
/// returning its table name. Ties — including "nothing matched" — break
/// toward the primary table.
pub fn select_table<'a>(collection: &'a Collection, condition: &Condition) -> &'a str {
    let mut best_name = collection.primary_table_name();
    let mut best_ratio = fixed_prefix_ratio(collection.pkey_exprs(best_name).unwrap(), condition);

    for index in &collection.indexes {
        let ratio = fixed_prefix_ratio(&index.pkey_exprs, condition);
        if ratio > best_ratio {
            best_ratio = ratio;
            best_name = index.table.name.as_str();
        }
    }
    best_name
}

/// `fixed_prefix_length / pkey_schema_length` for one candidate table
/// (spec.md section 4.7.4).
fn fixed_prefix_ratio(pkey_exprs: &[(String, Expr)], condition: &Condition) -> f64 {
    if pkey_exprs.is_empty() {
        return 0.0;
    }
    fixed_prefix_length(pkey_exprs, condition) as f64 / pkey_exprs.len() as f64
}

fn fixed_prefix_length(pkey_exprs: &[(String, Expr)], condition: &Condition) -> usize {
    let mut fixed = 0usize;
    for (_, expr) in pkey_exprs {
        let mut attrs = Vec::new();
        expr.source_attrs(&mut attrs);

        if expr.is_hash() {
            let all_point = !attrs.is_empty()
                && attrs.iter().all(|a| condition.0.get(a).and_then(|f| f.point_values()).is_some());
            if all_point {
                fixed += 1;
                continue;
            }
            break;
        }

        // A non-hash composited column (e.g. a plain `Attr` or a
        // `ShiftToUint64(Attr(..))`) reads exactly one source attribute in
        // practice; match it against the condition on that attribute.
        let Some(attr) = attrs.first() else { break };
        match condition.0.get(attr) {
            Some(field) if field.point_values().is_some() => fixed += 1,
            Some(field) if field.range_bounds().is_some() => {
                fixed += 1;
                break; // only the last fixed column may be a range
            }
            _ => break,
        }
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, RangeOp};
    use crate::schema::IndexSchema;
    use tablestore::schema::{PkeyColSchema, PkeyColumnOption, PkeyColumnType, TableOptions, TableSchema};
    use tablestore::value::Value;

    fn table(name: &str, pkey_names: &[&str]) -> TableSchema {
        TableSchema::new(
            name,
            pkey_names.iter().map(|n| PkeyColSchema::new(*n, PkeyColumnType::Integer, PkeyColumnOption::None).unwrap()).collect(),
            TableOptions::default(),
        )
        .unwrap()
    }

    fn collection_with_index() -> Collection {
        let primary = table("P", &["pkey"]);
        let index = IndexSchema::new(table("I", &["attr", "pkey"]), vec![
            ("attr".into(), Expr::attr("attr")),
            ("pkey".into(), Expr::attr("pkey")),
        ])
        .unwrap();
        Collection::new(primary, vec![("pkey".into(), Expr::attr("pkey"))], vec![index], vec![], vec![]).unwrap()
    }

    #[test]
    fn range_on_index_leading_column_wins_over_primary_full_scan() {
        let coll = collection_with_index();
        let cond = Condition::new().range("attr", vec![(RangeOp::Ge, Value::Integer(-1)), (RangeOp::Le, Value::Integer(1))]);
        assert_eq!(select_table(&coll, &cond), "I");
    }

    #[test]
    fn no_matching_condition_falls_back_to_primary() {
        let coll = collection_with_index();
        let cond = Condition::new();
        assert_eq!(select_table(&coll, &cond), "P");
    }

    #[test]
    fn hash_column_requires_point_match_to_count() {
        let primary = table("P", &["pkey"]);
        let index = IndexSchema::new(table("I", &["hash_name"]), vec![(
            "hash_name".into(),
            Expr::hex(Expr::crc64_str(Expr::attr("name"))),
        )])
        .unwrap();
        let coll = Collection::new(primary, vec![("pkey".into(), Expr::attr("pkey"))], vec![index], vec![], vec![]).unwrap();

        let range_cond = Condition::new().range("name", vec![(RangeOp::Ge, Value::String(bytes::Bytes::from_static(b"a")))]);
        assert_eq!(select_table(&coll, &range_cond), "P", "a range can't fix a hash column");

        let eq_cond = Condition::new().eq("name", Value::String(bytes::Bytes::from_static(b"a")));
        assert_eq!(select_table(&coll, &eq_cond), "I", "a point match does fix a hash column");
    }
}
