//! Database backends
//!
//! The engine is written against the traits in [`core`]; [`postgres`] is the
//! sqlx-backed implementation used by the CLI.

pub mod core;
pub mod postgres;

pub use self::core::{
    Connector, DatabaseConnection, DatabaseRow, DatabaseTransaction, DatabaseValue,
};
pub use self::postgres::{PostgresConnection, PostgresConnector, PostgresTransaction};
