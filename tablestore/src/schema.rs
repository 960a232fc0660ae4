//! Table schema types (spec.md section 3, "Schema").

use core::time::Duration;

/// Column type for a primary-key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkeyColumnType {
    Integer,
    String,
    Binary,
}

/// `AutoIncrement` is only legal on `Integer` columns — enforced in
/// [`PkeyColSchema::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkeyColumnOption {
    None,
    AutoIncrement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PkeyColSchema {
    pub name: String,
    pub ty: PkeyColumnType,
    pub option: PkeyColumnOption,
}

impl PkeyColSchema {
    pub fn new(name: impl Into<String>, ty: PkeyColumnType, option: PkeyColumnOption) -> Result<Self, &'static str> {
        if option == PkeyColumnOption::AutoIncrement && ty != PkeyColumnType::Integer {
            return Err("AutoIncrement pkey option is only legal on an Integer column");
        }
        Ok(Self { name: name.into(), ty, option })
    }
}

/// Reserved throughput, in read/write capacity units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservedThroughput {
    pub read: i64,
    pub write: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableOptions {
    pub reserved_throughput: Option<ReservedThroughput>,
    /// TTL, must be > 0 seconds when set.
    pub ttl: Option<Duration>,
    /// Max versions kept per column, must be > 0 when set.
    pub max_versions: Option<u32>,
    pub bloom_filter_type: Option<String>,
    pub block_size: Option<u32>,
    pub max_time_deviation: Option<Duration>,
}

impl TableOptions {
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(ttl) = self.ttl {
            if ttl.is_zero() {
                return Err("TTL must be greater than zero seconds");
            }
        }
        if let Some(v) = self.max_versions {
            if v == 0 {
                return Err("max_versions must be greater than zero");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub pkey_schema: Vec<PkeyColSchema>,
    pub options: TableOptions,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, pkey_schema: Vec<PkeyColSchema>, options: TableOptions) -> Result<Self, &'static str> {
        if pkey_schema.is_empty() {
            return Err("table schema must declare at least one primary key column");
        }
        options.validate()?;
        Ok(Self { name: name.into(), pkey_schema, options })
    }

    pub fn pkey_column(&self, name: &str) -> Option<&PkeyColSchema> {
        self.pkey_schema.iter().find(|c| c.name == name)
    }
}
