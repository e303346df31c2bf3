//! Database Backend Abstractions
//!
//! The loader prepares, binds and reads statements through the traits in
//! [`core`]. A sqlx-backed PostgreSQL implementation and an in-memory
//! scripted implementation are provided.

pub mod core;
pub mod memory;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use memory::{ExecutedStatement, MemoryConnection, MemoryDatabase, ResultTable};
pub use postgres::PostgresConnection;
