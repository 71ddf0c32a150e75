use std::time::Duration;

use ecoplan_core::{Bound, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizationError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("solver returned a plan violating the {constraint} constraint")]
    Infeasible { constraint: Bound },
    #[error("action '{action_id}' is free and effortless but has benefit; objective is unbounded")]
    Unbounded { action_id: String },
    #[error("solve budget exhausted after {nodes} nodes (limit {limit:?})")]
    Timeout { limit: Duration, nodes: u64 },
}

pub type Result<T> = std::result::Result<T, OptimizationError>;
