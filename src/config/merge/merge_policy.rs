//! Built-in defaults applied beneath every other source.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("fanout.concurrency_limit", 5)?
        .set_default("fanout.max_retries", 3)?
        .set_default("batch.completion_window", "24h")?
        .set_default("batch.state_dir", ".batch_jobs")?
        .set_default("logging.level", "info")
}
