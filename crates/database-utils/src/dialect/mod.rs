//! Translator implementations, one per database product.

mod db2;
mod derby;
mod postgres;
mod sqlite;

pub use db2::Db2Translator;
pub use derby::DerbyTranslator;
pub use postgres::PostgresTranslator;
pub use sqlite::SqliteTranslator;

/// SQLSTATE class 08 covers every connection exception.
pub(crate) fn is_connection_state(state: &str) -> bool {
    state.starts_with("08")
}
