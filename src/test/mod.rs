//! Shared fixtures for the unit tests: a table-backed metadata scope, a small CIL
//! interpreter standing in for an execution engine, and descriptor factories.

mod factories;
mod scope;

pub use factories::*;
pub use interpreter::Interpreter;
pub use scope::TableScope;
