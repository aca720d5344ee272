//! IR validation passes.
//!
//! These passes are not user-facing diagnostics. They assert the invariants
//! the lowerer relies on for soundness, and are used for testing and sanity
//! checks in the compiler.

use crate::code::Code;
use std::fmt::Display;

pub mod cfg_integrity;
pub mod ssa;
pub mod types;

#[derive(Debug, Clone)]
pub struct ValidationError(String);

impl ValidationError {
    pub fn new(msg: impl Display) -> Self {
        Self(msg.to_string())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Run every validation pass.
pub fn validate(code: &Code) -> Result<(), ValidationError> {
    cfg_integrity::verify_cfg_integrity(code)?;
    ssa::verify_ssa(code)?;
    types::verify_arg_types(code)?;
    Ok(())
}
