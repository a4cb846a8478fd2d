use std::time::Duration;

use clap::Args;

use crate::batch::BatchPolicy;
use crate::error::PipelineError;
use crate::io::CsvFormat;
use crate::llm::RetryPolicy;

/// Delimited-output flags shared by every stage.
#[derive(Args, Debug, Clone)]
pub struct CsvArgs {
    /// Field delimiter for input and output files
    #[arg(long, default_value_t = ',')]
    pub delimiter: char,
    /// Decimal separator for numeric output columns
    #[arg(long, default_value_t = '.')]
    pub decimal_separator: char,
}

impl CsvArgs {
    pub fn format(&self) -> Result<CsvFormat, PipelineError> {
        if self.delimiter == self.decimal_separator {
            return Err(PipelineError::InvalidConfiguration(format!(
                "delimiter and decimal separator are both {:?}",
                self.delimiter
            )));
        }
        Ok(CsvFormat { delimiter: self.delimiter, decimal_separator: self.decimal_separator })
    }
}

/// Pacing flags for stages that call the LLM.
#[derive(Args, Debug, Clone)]
pub struct PacingArgs {
    /// Pause between consecutive LLM calls
    #[arg(long, default_value_t = 2000)]
    pub delay_ms: u64,
    /// Extra attempts for transient failures (0 = fail fast)
    #[arg(long, default_value_t = 0)]
    pub max_retries: u32,
    /// First retry backoff; doubled on every further attempt
    #[arg(long, default_value_t = 2000)]
    pub retry_base_ms: u64,
}

impl PacingArgs {
    pub fn delay(&self) -> Duration { Duration::from_millis(self.delay_ms) }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy { max_retries: self.max_retries, base_delay: Duration::from_millis(self.retry_base_ms) }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Records per LLM call
    #[arg(long, env = "BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,
    #[command(flatten)]
    pub pacing: PacingArgs,
}

impl BatchArgs {
    pub fn policy(&self) -> Result<BatchPolicy, PipelineError> {
        BatchPolicy::new(self.batch_size, self.pacing.delay(), self.pacing.retry())
    }
}
