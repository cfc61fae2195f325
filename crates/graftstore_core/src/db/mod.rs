//! SQLite connection bootstrap for the bundled persistence context.
//!
//! # Responsibility
//! - Open and configure SQLite connections used by `SqliteContext`.
//! - Keep connection pragmas in one place.
//!
//! # Invariants
//! - Schema creation stays with the caller; this module never issues DDL.
//! - Returned connections have the configured pragmas applied.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;

pub use open::{open_db, open_db_in_memory, open_db_with, ConnectionOptions};

pub type DbResult<T> = Result<T, DbError>;

/// Store-level failure raised by SQLite.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
}

impl DbError {
    /// Returns the SQLite extended error code, when the failure carries one.
    pub fn sqlite_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            Self::Sqlite(err) => err.sqlite_error_code(),
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
