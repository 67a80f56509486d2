//! Recruiter triage — classify inbound recruiter mail, extract the offer,
//! and draft a negotiation reply for human approval.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
