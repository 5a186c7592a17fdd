//! SQL text with positional bind values.

use rusqlite::ToSql;
use rusqlite::types::{Null, ToSqlOutput};

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    String(String),
    Integer(i64),
    Float(f64),
    Null,
}

impl SqlParam {
    pub fn string(s: impl Into<String>) -> Self {
        SqlParam::String(s.into())
    }

    pub fn integer(i: i64) -> Self {
        SqlParam::Integer(i)
    }

    pub fn float(f: f64) -> Self {
        SqlParam::Float(f)
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlParam::String(s) => s.to_sql(),
            SqlParam::Integer(i) => i.to_sql(),
            SqlParam::Float(f) => f.to_sql(),
            SqlParam::Null => Null.to_sql(),
        }
    }
}

/// A fragment of SQL with its bound parameters.
///
/// Placeholders are anonymous (`?`), so fragments compose in any order as
/// long as their parameter lists are concatenated in the same order as their
/// text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A condition no row satisfies.
    pub fn never() -> Self {
        Self::new("1 = 0")
    }

    /// A condition every row satisfies.
    pub fn always() -> Self {
        Self::new("1 = 1")
    }

    /// Appends raw SQL text.
    pub fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Appends another fragment's text and parameters.
    pub fn push(&mut self, other: SqlFragment) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }

    /// Combines with another fragment using AND.
    pub fn and(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) AND ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Combines with another fragment using OR.
    pub fn or(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) OR ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// ANDs all fragments together. Empty input yields an empty fragment.
    pub fn and_all(fragments: impl IntoIterator<Item = SqlFragment>) -> Self {
        fragments
            .into_iter()
            .fold(SqlFragment::default(), SqlFragment::and)
    }

    /// ORs all fragments together. Empty input yields an empty fragment.
    pub fn or_all(fragments: impl IntoIterator<Item = SqlFragment>) -> Self {
        fragments
            .into_iter()
            .fold(SqlFragment::default(), SqlFragment::or)
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// A complete statement ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlQuery {
    /// Parameters in the form `rusqlite` binds them.
    pub fn bind(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p as &dyn ToSql).collect()
    }
}

impl From<SqlFragment> for SqlQuery {
    fn from(fragment: SqlFragment) -> Self {
        SqlQuery {
            sql: fragment.sql,
            params: fragment.params,
        }
    }
}
