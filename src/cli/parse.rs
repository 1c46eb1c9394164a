//! CLI parse: clap types for textbatch. No behavior; definitions only.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// textbatch - schema-constrained bulk LLM requests
#[derive(Parser)]
#[command(name = "textbatch")]
#[command(about = "Run structured-output LLM tasks over many texts, live or as deferred batch jobs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides layered config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Provider name from [providers]
    #[arg(long)]
    pub provider: Option<String>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every item live with bounded concurrency and print the results
    Fanout {
        #[command(flatten)]
        task: TaskArgs,

        /// Maximum requests in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Retries after a rejected output
        #[arg(long)]
        max_retries: Option<u32>,

        /// Base sampling temperature
        #[arg(long)]
        temperature: Option<f32>,

        /// Abort on the first failed item
        #[arg(long)]
        raise_on_error: bool,

        /// File with analysis instructions; runs a reasoning pass first
        #[arg(long)]
        analyze: Option<PathBuf>,
    },
    /// Submit items as deferred batch jobs and wait for the results
    Batch {
        #[command(flatten)]
        task: TaskArgs,

        /// Job name; partitions are named <job>_part_<n>
        #[arg(long)]
        job_name: String,
    },
    /// Poll a stored job once and print its record
    Status {
        #[arg(long)]
        job_name: String,
    },
    /// Remove a stored job record
    Clear {
        #[arg(long)]
        job_name: String,
    },
}

#[derive(Args, Clone)]
pub struct TaskArgs {
    /// JSON array of strings or {"id", "text"} objects
    #[arg(long)]
    pub input: PathBuf,

    /// File with the instruction template
    #[arg(long)]
    pub instructions: PathBuf,

    /// JSON file with {"name", "schema", "strict"}
    #[arg(long, conflicts_with = "output_type")]
    pub schema: Option<PathBuf>,

    /// Built-in output schema
    #[arg(long, value_enum)]
    pub output_type: Option<BuiltinSchema>,

    /// Language the model must answer in
    #[arg(long)]
    pub output_lang: Option<String>,

    /// Extra instruction appended to the prompt
    #[arg(long)]
    pub user_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuiltinSchema {
    String,
    Bool,
    StringList,
    EntityList,
    ReasonList,
}
