//! Recruiter triage pipeline.
//!
//! Every fetched message flows through:
//! 1. `normalize` — markup stripped, whitespace collapsed
//! 2. `RulesEngine::classify()` — weighted relevance heuristic (no LLM)
//! 3. `FactExtractor::extract()` — rate and location, optionally service-assisted
//! 4. `NegotiationPolicy::decide()` — thresholds to a decision
//! 5. `TriageProcessor` — drafts the reply, falling back to templates
//!
//! **No auto-reply path exists.** Every outbound message requires approval.

pub mod email_processor;
pub mod extract;
pub mod normalize;
pub mod policy;
pub mod processor;
pub mod rules;
pub mod types;

pub use email_processor::{PassSummary, TriagePass, run_triage_pass};
pub use processor::TriageProcessor;
