//! CLI domain: parse, route and output only.
//! Route handlers wire configuration into the library services and render results.

mod output;
mod parse;
mod route;

pub use output::map_error;
pub use parse::{BuiltinSchema, Cli, Commands, TaskArgs};
pub use route::RunContext;
