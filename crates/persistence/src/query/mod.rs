//! Search query construction.
//!
//! - [`QueryBuilder`] - builds count, page and `_include` statements
//! - [`SqlFragment`], [`SqlQuery`] - SQL text with anonymous `?` bind values

mod builder;
mod handlers;
mod sql;

pub use builder::QueryBuilder;
pub use sql::{SqlFragment, SqlParam, SqlQuery};
