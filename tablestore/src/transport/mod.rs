//! HTTP/1.1 transport: endpoint parsing, pooled connections, request
//! construction and response parsing (spec.md section 4.3).

pub mod connection;
pub mod parser;
pub mod pool;
pub mod request;
pub mod uri;
