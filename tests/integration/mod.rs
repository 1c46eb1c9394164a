//! Integration tests for textbatch

pub mod test_utils;

mod cli_end_to_end;
mod fanout;
