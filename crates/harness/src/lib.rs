//! The evaluation harness: orchestration, persistence, aggregation.

pub mod aggregate;
pub mod evaluator;
pub mod results;

pub use evaluator::{EvaluationReport, Evaluator, EvaluatorOptions};
pub use results::{ModelRunConfig, ResultStore};
