//! Collection schema (spec.md "Index overlay schema"): a primary table plus
//! zero or more secondary index tables, each pkey column defined by an
//! [`Expr`] tree over the source row's attributes.
//!
//! Grounded in `examples/original_source/src/ots_static_index/include/static_index.h`'s
//! `Settings`/collection concept, generalized from that header's free-form
//! `Json::Value` schema description into the typed `Collection`/`IndexSchema`
//! spec.md names directly.

use tablestore::schema::TableSchema;

use crate::expr::Expr;
use crate::jsonval::JsonRow;

/// One secondary index table: its own [`TableSchema`] plus the expression
/// tree that computes each of its pkey columns from a source row.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub table: TableSchema,
    /// `(pkey column name, expression)`, in the same order as
    /// `table.pkey_schema`.
    pub pkey_exprs: Vec<(String, Expr)>,
}

impl IndexSchema {
    pub fn new(table: TableSchema, pkey_exprs: Vec<(String, Expr)>) -> Result<Self, tablestore::Error> {
        if pkey_exprs.len() != table.pkey_schema.len() {
            return Err(tablestore::Error::validation(format!(
                "index `{}` declares {} pkey expressions but its schema has {} pkey columns",
                table.name,
                pkey_exprs.len(),
                table.pkey_schema.len()
            )));
        }
        Ok(Self { table, pkey_exprs })
    }

    /// Every source attribute this index's pkey columns read (spec.md
    /// section 4.7.2 step 2: "if `data` contains every required attribute
    /// for Iⱼ").
    pub fn required_source_attrs(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (_, e) in &self.pkey_exprs {
            e.source_attrs(&mut out);
        }
        out.sort();
        out.dedup();
        out
    }

    /// Compute this index's pkey columns from a source row. Returns `None`
    /// if a required attribute is missing (caller skips this index for this
    /// row, per spec.md section 4.7.2 step 2) rather than an error.
    pub fn try_compute_pkey(&self, data: &JsonRow) -> Option<Result<tablestore::value::PrimaryKey, tablestore::Error>> {
        if self.required_source_attrs().iter().any(|a| !data.contains_key(a)) {
            return None;
        }
        Some(self.compute_pkey(data))
    }

    pub fn compute_pkey(&self, data: &JsonRow) -> Result<tablestore::value::PrimaryKey, tablestore::Error> {
        let cols = self
            .pkey_exprs
            .iter()
            .map(|(name, e)| Ok(tablestore::value::PrimaryKeyColumn::new(name.clone(), e.eval(data)?)))
            .collect::<Result<Vec<_>, tablestore::Error>>()?;
        Ok(tablestore::value::PrimaryKey::new(cols))
    }
}

/// `(primary_table, indexes, required_attrs, optional_attrs)` (spec.md
/// "Index overlay schema").
#[derive(Debug, Clone)]
pub struct Collection {
    pub primary: TableSchema,
    /// Primary table pkey expressions; `Expr::Attr(name)` for an ordinary
    /// (non-composited) pkey column, matching `pkey_schema` order.
    pub primary_pkey_exprs: Vec<(String, Expr)>,
    pub indexes: Vec<IndexSchema>,
    pub required_attrs: Vec<String>,
    pub optional_attrs: Vec<String>,
}

impl Collection {
    pub fn new(
        primary: TableSchema,
        primary_pkey_exprs: Vec<(String, Expr)>,
        indexes: Vec<IndexSchema>,
        required_attrs: Vec<String>,
        optional_attrs: Vec<String>,
    ) -> Result<Self, tablestore::Error> {
        if primary_pkey_exprs.len() != primary.pkey_schema.len() {
            return Err(tablestore::Error::validation(
                "primary table's pkey expressions must match its pkey_schema column count",
            ));
        }
        Ok(Self { primary, primary_pkey_exprs, indexes, required_attrs, optional_attrs })
    }

    pub fn primary_table_name(&self) -> &str {
        &self.primary.name
    }

    /// Look up a candidate table's schema by name (primary or an index).
    pub fn table_schema(&self, table_name: &str) -> Option<&TableSchema> {
        if table_name == self.primary.name {
            return Some(&self.primary);
        }
        self.indexes.iter().find(|i| i.table.name == table_name).map(|i| &i.table)
    }

    pub fn pkey_exprs(&self, table_name: &str) -> Option<&[(String, Expr)]> {
        if table_name == self.primary.name {
            return Some(&self.primary_pkey_exprs);
        }
        self.indexes.iter().find(|i| i.table.name == table_name).map(|i| i.pkey_exprs.as_slice())
    }

    pub fn is_index(&self, table_name: &str) -> bool {
        table_name != self.primary.name
    }

    /// Validate that `data` has every attribute [`Collection::required_attrs`]
    /// names (spec.md section 4.7.2 step 1).
    pub fn validate_required_attrs(&self, data: &JsonRow) -> Result<(), tablestore::Error> {
        for attr in &self.required_attrs {
            if !data.contains_key(attr) {
                return Err(tablestore::Error::validation(format!("missing required attribute `{attr}`")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use serde_json::json;
    use tablestore::schema::{PkeyColSchema, PkeyColumnOption, PkeyColumnType, TableOptions};

    fn row(v: serde_json::Value) -> JsonRow {
        v.as_object().unwrap().clone()
    }

    fn table(name: &str, pkey_names: &[&str]) -> TableSchema {
        TableSchema::new(
            name,
            pkey_names.iter().map(|n| PkeyColSchema::new(*n, PkeyColumnType::Integer, PkeyColumnOption::None).unwrap()).collect(),
            TableOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn index_skips_when_required_attr_missing() {
        let idx =
            IndexSchema::new(table("I", &["hash_name"]), vec![("hash_name".into(), Expr::hex(Expr::crc64_str(Expr::attr("name"))))])
                .unwrap();
        assert!(idx.try_compute_pkey(&row(json!({"other": 1}))).is_none());
    }

    #[test]
    fn index_computes_pkey_when_attrs_present() {
        let idx =
            IndexSchema::new(table("I", &["hash_name"]), vec![("hash_name".into(), Expr::hex(Expr::crc64_str(Expr::attr("name"))))])
                .unwrap();
        let result = idx.try_compute_pkey(&row(json!({"name": "x"}))).unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn collection_rejects_missing_required_attrs() {
        let coll = Collection::new(
            table("P", &["pkey"]),
            vec![("pkey".into(), Expr::attr("pkey"))],
            vec![],
            vec!["name".into()],
            vec![],
        )
        .unwrap();
        assert!(coll.validate_required_attrs(&row(json!({"pkey": 1}))).is_err());
        assert!(coll.validate_required_attrs(&row(json!({"pkey": 1, "name": "x"}))).is_ok());
    }
}
