use anyhow::Result;
use serde::Serialize;

use crate::output::config::OutputConfig;
use crate::output::types::Envelope;
use crate::output::Emitter;

pub fn print_plan<T: Serialize>(op: &'static str, plan: &T) -> Result<()> {
    let env = Envelope::plan(op, plan)?;
    Emitter::from_config(OutputConfig::from_env()).emit(&env)?;
    Ok(())
}

pub fn print_result<T: Serialize>(op: &'static str, result: &T) -> Result<()> {
    let env = Envelope::result(op, result)?;
    Emitter::from_config(OutputConfig::from_env()).emit(&env)?;
    Ok(())
}
