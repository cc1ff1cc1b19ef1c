//! Command line interface.

mod commands;
mod helpers;
mod history;

pub use commands::{is_verbose, run};
