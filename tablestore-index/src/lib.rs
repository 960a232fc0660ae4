//! Statically-indexed collection overlay over [`tablestore`]: a primary
//! table plus schema-defined secondary indexes, insert/delete fan-out, index
//! selection and query planning (spec.md "Index overlay").

pub mod condition;
pub mod expr;
pub mod jsonval;
pub mod mutate;
pub mod operator;
pub mod query;
pub mod schema;
pub mod select;

pub use condition::{Condition, ConditionField, RangeOp};
pub use expr::Expr;
pub use jsonval::JsonRow;
pub use mutate::{delete, insert, update, upsert, Update};
pub use query::find;
pub use schema::{Collection, IndexSchema};
