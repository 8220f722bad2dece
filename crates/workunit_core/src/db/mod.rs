//! SQLite backend for the unit of work.
//!
//! # Responsibility
//! - Open and configure SQLite connections.
//! - Prepare tables for entity descriptors.
//! - Implement `TransactionalStore` over one shared connection.
//!
//! # Invariants
//! - Identifiers interpolated into SQL are validated first.
//! - Core code must not write entity data before `ensure_schema_for` ran.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod config;
mod open;
pub mod record;
pub mod schema;
pub mod store;

pub use config::StoreConfig;
pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// A table or column name that is unsafe to interpolate into SQL.
    InvalidIdentifier(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidIdentifier(name) => write!(f, "invalid sql identifier `{name}`"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::InvalidIdentifier(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn validate_identifier(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}
