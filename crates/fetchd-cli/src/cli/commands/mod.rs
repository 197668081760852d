//! CLI command handlers.

mod get;

pub use get::{run_get, GetArgs};
