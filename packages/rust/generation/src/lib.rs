//! Generation service adapter for Coursesmith.
//!
//! - [`GenerationClient`]: the injectable service boundary
//! - [`CohereClient`]: the production HTTP implementation
//! - [`repair`]: lenient structural parser for almost-JSON output
//! - [`contracts`]: per-stage schema validation

pub mod client;
pub mod cohere;
pub mod contracts;
pub mod prompts;
pub mod repair;

pub use client::{GenerationClient, StageContext};
pub use cohere::{CohereClient, StageTimeouts};
pub use contracts::StageOutput;

use coursesmith_shared::{OutlineShape, Result};
use tracing::debug;

/// One attempt at a stage: generate, repair, then validate.
///
/// Outline output is normalized to `shape`.
pub async fn generate_validated(
    client: &dyn GenerationClient,
    context: &StageContext,
    shape: OutlineShape,
) -> Result<StageOutput> {
    let raw = client.generate(context).await?;
    debug!(stage = %context.stage(), bytes = raw.len(), "received generation output");

    let value = repair::parse_lenient(&raw)?;
    match context {
        StageContext::Name { .. } => contracts::validate_name(&value).map(StageOutput::Name),
        StageContext::Outline { .. } => {
            contracts::validate_outline(&value, shape).map(StageOutput::Outline)
        }
        StageContext::Topic(_) => contracts::validate_topic(&value).map(StageOutput::Topic),
    }
}
