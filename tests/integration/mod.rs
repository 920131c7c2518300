//! Integration tests for db-fanout.

pub mod dispatch_test;
pub mod postgres_test;
pub mod sqlite_test;
