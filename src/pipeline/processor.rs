//! Triage processor — composes classification, extraction, and policy.
//!
//! **Core invariant: a draft is never sent from here.** The processor only
//! produces a [`TriageOutcome`]; transmission happens after human approval.
//!
//! Flow:
//! 1. Relevance heuristic (fast, no LLM) → may short-circuit
//! 2. Optional service relevance check, arbitrated by config
//! 3. Fact extraction → negotiation decision
//! 4. Service-drafted prose, or the deterministic template on any failure
//!
//! `process` never returns an error. Every service failure degrades to the
//! heuristic or template path with a logged cause.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{RelevanceArbitration, TriageConfig};
use crate::error::{ConfigError, LlmError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::pipeline::extract::FactExtractor;
use crate::pipeline::normalize::normalize;
use crate::pipeline::policy::NegotiationPolicy;
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::{
    CounterKind, Draft, DraftSource, ExtractedFacts, InboundMessage, NegotiationDecision,
    TriageOutcome,
};

/// Max tokens for the subject relevance check (a single boolean).
const RELEVANCE_MAX_TOKENS: u32 = 64;

/// Max tokens for a drafted reply.
const DRAFT_MAX_TOKENS: u32 = 512;

const RELEVANCE_TEMPERATURE: f32 = 0.0;
const DRAFT_TEMPERATURE: f32 = 0.4;

/// Body characters included in the drafting prompt.
const DRAFT_BODY_CHARS: usize = 3000;

pub struct TriageProcessor {
    rules: RulesEngine,
    extractor: FactExtractor,
    policy: NegotiationPolicy,
    llm: Option<Arc<dyn LlmProvider>>,
    relevance: RelevanceArbitration,
}

impl TriageProcessor {
    /// Build every component from one configuration value.
    pub fn new(
        config: &TriageConfig,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Result<Self, ConfigError> {
        let mut extractor = FactExtractor::new(config.hours_per_year);
        if let Some(llm) = &llm {
            extractor = extractor.with_llm(Arc::clone(llm));
        }

        Ok(Self {
            rules: RulesEngine::new(&config.keywords)?,
            extractor,
            policy: NegotiationPolicy::new(config),
            llm,
            relevance: config.relevance,
        })
    }

    pub fn policy(&self) -> &NegotiationPolicy {
        &self.policy
    }

    /// Run one message through the full pipeline.
    pub async fn process(&self, message: &InboundMessage) -> TriageOutcome {
        let classification = self
            .rules
            .classify(&message.subject, &message.sender, &message.body);

        if !classification.is_job_related() {
            info!(
                id = %message.id,
                sender = %message.sender,
                explain = %classification.explain(),
                "Not a recruiter opportunity"
            );
            return TriageOutcome::Irrelevant {
                classification,
                vetoed_by_service: false,
            };
        }

        debug!(
            id = %message.id,
            explain = %classification.explain(),
            "Heuristic accepted message"
        );

        if self.service_vetoes(message).await {
            return TriageOutcome::Irrelevant {
                classification,
                vetoed_by_service: true,
            };
        }

        let facts = self.extractor.extract(&message.subject, &message.body).await;
        let decision = self.policy.decide(&facts);

        info!(
            id = %message.id,
            sender = %message.sender,
            rate = %facts.rate(),
            location = %facts.location(),
            decision = decision.label(),
            "Decision made"
        );

        if matches!(decision, NegotiationDecision::Skip) {
            return TriageOutcome::NotRelated { classification };
        }

        match self.compose(message, decision, facts).await {
            Some(draft) => TriageOutcome::Drafted {
                classification,
                draft,
            },
            None => {
                warn!(id = %message.id, "Rendered an empty reply, treating as not related");
                TriageOutcome::NotRelated { classification }
            }
        }
    }

    /// True only when the arbitration mode lets a service rejection stand.
    async fn service_vetoes(&self, message: &InboundMessage) -> bool {
        let Some(llm) = &self.llm else {
            return false;
        };
        if self.relevance == RelevanceArbitration::HeuristicOnly {
            return false;
        }

        match check_relevance(llm.as_ref(), &message.subject).await {
            Ok(true) => false,
            Ok(false) if self.relevance == RelevanceArbitration::Veto => {
                info!(
                    id = %message.id,
                    subject = %message.subject,
                    "Service vetoed heuristic relevance"
                );
                true
            }
            Ok(false) => {
                info!(
                    id = %message.id,
                    subject = %message.subject,
                    "Service disagrees with heuristic, keeping heuristic verdict"
                );
                false
            }
            Err(e) => {
                warn!(id = %message.id, error = %e, "Relevance check failed, keeping heuristic verdict");
                false
            }
        }
    }

    /// Service prose when available and non-empty, the template otherwise.
    async fn compose(
        &self,
        message: &InboundMessage,
        decision: NegotiationDecision,
        facts: ExtractedFacts,
    ) -> Option<Draft> {
        if let Some(llm) = &self.llm {
            match self.draft_with_service(llm.as_ref(), message, &decision, &facts).await {
                Ok(body) if !body.trim().is_empty() => {
                    return Draft::new(decision, facts, body, DraftSource::Service);
                }
                Ok(_) => warn!(id = %message.id, "Service draft was blank, using template"),
                Err(e) => warn!(id = %message.id, error = %e, "Service draft failed, using template"),
            }
        }

        let body = self.policy.render(&decision, &facts, message);
        Draft::new(decision, facts, body, DraftSource::Template)
    }

    async fn draft_with_service(
        &self,
        llm: &dyn LlmProvider,
        message: &InboundMessage,
        decision: &NegotiationDecision,
        facts: &ExtractedFacts,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(self.build_draft_system_prompt(decision)),
            ChatMessage::user(build_draft_user_prompt(message, facts)),
        ])
        .with_temperature(DRAFT_TEMPERATURE)
        .with_max_tokens(DRAFT_MAX_TOKENS);

        let response = llm.complete(request).await?;
        Ok(response.content.trim().to_string())
    }

    // ── Prompt construction ─────────────────────────────────────────

    fn build_draft_system_prompt(&self, decision: &NegotiationDecision) -> String {
        let t = self.policy.thresholds();
        let identity = self.policy.identity();

        format!(
            "You write short, polite, professional replies to tech recruiters on behalf of a software engineer.\n\n\
             Negotiation policy (hourly USD):\n\
             - ${accept}/hr or more: accept and state availability ({hours}).\n\
             - ${min} to ${accept}/hr: ask for flexibility toward ${accept}/hr.\n\
             - ${reject} to ${min}/hr: ask whether the budget can reach ${min}/hr, otherwise likely pass.\n\
             - Below ${reject}/hr: decline politely, citing budget.\n\
             - Rate unknown: ask for the rate and role details. Never propose a number first.\n\
             - Strong preference for remote work. If the role is on-site, hybrid, or tied to a city, ask whether remote is possible.\n\n\
             Strategy for this email: {strategy}\n\n\
             Reply with ONLY the email body, starting with a greeting and ending with exactly this signature:\n\
             {signature}",
            accept = t.accept,
            min = t.min_acceptable,
            reject = t.reject_below,
            hours = identity.working_hours,
            strategy = describe_strategy(decision),
            signature = identity.signature(),
        )
    }
}

fn describe_strategy(decision: &NegotiationDecision) -> String {
    match decision {
        NegotiationDecision::Accept { offered } => {
            format!("accept the offered ${}/hr", offered)
        }
        NegotiationDecision::Counter {
            offered,
            target,
            kind: CounterKind::Flexibility,
        } => format!(
            "counter ${}/hr by asking for flexibility toward ${}/hr, while saying you'd proceed if remote",
            offered, target
        ),
        NegotiationDecision::Counter {
            offered,
            target,
            kind: CounterKind::BudgetFloor,
        } => format!(
            "counter ${}/hr by asking whether the budget can move to ${}/hr, otherwise you will likely pass",
            offered, target
        ),
        NegotiationDecision::RequestInfo => {
            "ask for the hourly rate and more details about the role".to_string()
        }
        NegotiationDecision::Decline { offered } => {
            format!("politely decline ${}/hr as below your range", offered)
        }
        NegotiationDecision::RequestResume => {
            "say the resume is attached and ask for the hourly rate".to_string()
        }
        NegotiationDecision::Skip => "do not reply".to_string(),
    }
}

fn build_draft_user_prompt(message: &InboundMessage, facts: &ExtractedFacts) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str(&format!("From: {}", message.sender));
    if let Some(ref name) = message.sender_name {
        prompt.push_str(&format!(" ({})", name));
    }
    prompt.push('\n');
    prompt.push_str(&format!("Subject: {}\n", message.subject));
    prompt.push_str(&format!(
        "Extracted: rate={}, location={}\n",
        facts.rate(),
        facts.location()
    ));

    let body: String = normalize(Some(&message.body))
        .chars()
        .take(DRAFT_BODY_CHARS)
        .collect();
    prompt.push_str(&format!("\nEmail:\n{}", body));

    prompt
}

// ── Relevance check ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RelevanceJudgment {
    job_related: bool,
}

const RELEVANCE_SYSTEM_PROMPT: &str = "I am a software engineer. Decide whether an email subject line belongs to a job opportunity from a recruiter.\n\n\
     - job_related = true ONLY if the subject clearly mentions job openings, interviews, recruiter messages, or hiring opportunities.\n\
     - job_related = false for receipts, advertisements, finance, subscriptions, bills, newsletters, bank alerts, or spam.\n\n\
     Respond with ONLY a JSON object: {\"job_related\": true or false}";

async fn check_relevance(llm: &dyn LlmProvider, subject: &str) -> Result<bool, LlmError> {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(RELEVANCE_SYSTEM_PROMPT),
        ChatMessage::user(format!("Subject: \"{}\"", subject)),
    ])
    .with_temperature(RELEVANCE_TEMPERATURE)
    .with_max_tokens(RELEVANCE_MAX_TOKENS);

    let response = llm.complete(request).await?;
    parse_relevance(&response.content)
}

fn parse_relevance(raw: &str) -> Result<bool, LlmError> {
    let judgment: RelevanceJudgment = serde_json::from_str(&extract_json_object(raw))?;
    Ok(judgment.job_related)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::pipeline::types::{Location, Rate};

    fn recruiter_message(body: &str) -> InboundMessage {
        InboundMessage {
            id: "msg-1".into(),
            sender: "jane@acmestaffing.example".into(),
            sender_name: Some("Jane Doe".into()),
            subject: "Senior Rust Engineer - contract".into(),
            body: format!("Hi, I'm a technical recruiter. {}", body),
            received_at: Utc::now(),
        }
    }

    fn processor(llm: Option<Arc<ScriptedLlm>>, relevance: RelevanceArbitration) -> TriageProcessor {
        let config = TriageConfig {
            relevance,
            ..TriageConfig::default()
        };
        TriageProcessor::new(&config, llm.map(|l| l as Arc<dyn LlmProvider>)).unwrap()
    }

    fn drafted(outcome: TriageOutcome) -> Draft {
        match outcome {
            TriageOutcome::Drafted { draft, .. } => draft,
            other => panic!("expected a draft, got {}", other.label()),
        }
    }

    // ── Prompt construction tests ───────────────────────────────────

    #[test]
    fn draft_system_prompt_carries_policy() {
        let p = processor(None, RelevanceArbitration::Veto);
        let prompt = p.build_draft_system_prompt(&NegotiationDecision::RequestInfo);
        assert!(prompt.contains("$85/hr or more"));
        assert!(prompt.contains("$65 to $75/hr"));
        assert!(prompt.contains("remote"));
        assert!(prompt.contains("ask for the hourly rate"));
        assert!(prompt.contains(&TriageConfig::default().identity.signature()));
    }

    #[test]
    fn draft_user_prompt_truncates_body() {
        let mut message = recruiter_message("");
        message.body = "x".repeat(10_000);
        let prompt = build_draft_user_prompt(&message, &ExtractedFacts::unknown());
        assert!(prompt.contains("Jane Doe"));
        assert!(prompt.contains("rate=Unknown"));
        assert!(prompt.len() < DRAFT_BODY_CHARS + 300);
    }

    #[test]
    fn relevance_parsing() {
        assert!(parse_relevance(r#"{"job_related": true}"#).unwrap());
        assert!(!parse_relevance("Answer: {\"job_related\": false}").unwrap());
        assert!(parse_relevance("yes").is_err());
        assert!(parse_relevance(r#"{"related": true}"#).is_err());
    }

    // ── Pipeline without a service ──────────────────────────────────

    #[tokio::test]
    async fn ninety_remote_accepts_with_template() {
        let p = processor(None, RelevanceArbitration::Veto);
        let draft = drafted(p.process(&recruiter_message("$90/hr, fully remote.")).await);
        assert!(matches!(draft.decision(), NegotiationDecision::Accept { .. }));
        assert_eq!(draft.source(), DraftSource::Template);
        assert_eq!(draft.facts().location(), &Location::Remote);
        assert!(draft.body().starts_with("Hi Jane,"));
    }

    #[tokio::test]
    async fn seventy_austin_counters_and_asks_remote() {
        let p = processor(None, RelevanceArbitration::Veto);
        let draft =
            drafted(p.process(&recruiter_message("$70/hr, on-site in Austin, TX")).await);
        assert!(matches!(
            draft.decision(),
            NegotiationDecision::Counter {
                kind: CounterKind::BudgetFloor,
                ..
            }
        ));
        assert_eq!(
            draft.facts().location(),
            &Location::Place("Austin, TX".into())
        );
        assert!(draft.body().contains("working remotely?"));
    }

    #[tokio::test]
    async fn newsletter_is_irrelevant() {
        let llm = Arc::new(ScriptedLlm::replying(&[r#"{"job_related": true}"#]));
        let p = processor(Some(llm.clone()), RelevanceArbitration::Veto);
        let message = InboundMessage {
            id: "n-1".into(),
            sender: "newsletter@jobboard.example".into(),
            sender_name: None,
            subject: "60 min call re: your background".into(),
            body: String::new(),
            received_at: Utc::now(),
        };
        let outcome = p.process(&message).await;
        assert!(matches!(
            outcome,
            TriageOutcome::Irrelevant {
                vetoed_by_service: false,
                ..
            }
        ));
        assert_eq!(llm.call_count(), 0);
    }

    // ── Pipeline with a scripted service ────────────────────────────

    #[tokio::test]
    async fn malformed_service_output_falls_back_to_template() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("sure, looks job related".into()),
            Ok("{\"rate\": ".into()),
            Err(LlmError::EmptyResponse {
                provider: "scripted".into(),
            }),
        ]));
        let p = processor(Some(llm.clone()), RelevanceArbitration::Veto);
        let draft = drafted(p.process(&recruiter_message("$90/hr, fully remote.")).await);
        assert_eq!(draft.source(), DraftSource::Template);
        assert!(matches!(draft.decision(), NegotiationDecision::Accept { .. }));
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn unreachable_service_still_drafts() {
        let llm = Arc::new(ScriptedLlm::unreachable());
        let p = processor(Some(llm), RelevanceArbitration::Veto);
        let draft = drafted(p.process(&recruiter_message("Let's talk about a role.")).await);
        assert_eq!(draft.decision(), &NegotiationDecision::RequestInfo);
        assert_eq!(draft.source(), DraftSource::Template);
    }

    #[tokio::test]
    async fn veto_rejects_heuristic_accept() {
        let llm = Arc::new(ScriptedLlm::replying(&[r#"{"job_related": false}"#]));
        let p = processor(Some(llm.clone()), RelevanceArbitration::Veto);
        let outcome = p.process(&recruiter_message("$90/hr")).await;
        match outcome {
            TriageOutcome::Irrelevant {
                classification,
                vetoed_by_service,
            } => {
                assert!(vetoed_by_service);
                assert!(classification.is_job_related());
            }
            other => panic!("expected irrelevant, got {}", other.label()),
        }
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn advisory_keeps_heuristic_verdict() {
        let llm = Arc::new(ScriptedLlm::replying(&[r#"{"job_related": false}"#]));
        let p = processor(Some(llm), RelevanceArbitration::Advisory);
        let outcome = p.process(&recruiter_message("$90/hr remote")).await;
        assert_eq!(outcome.label(), "drafted");
    }

    #[tokio::test]
    async fn heuristic_only_skips_relevance_call() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"rate": "Unknown", "location": "Unknown"}"#,
            "Hi Jane,\n\nSounds great.\n\nBest regards,\nCandidate",
        ]));
        let p = processor(Some(llm.clone()), RelevanceArbitration::HeuristicOnly);
        let draft = drafted(p.process(&recruiter_message("$90/hr remote")).await);
        assert_eq!(draft.source(), DraftSource::Service);
        assert_eq!(llm.call_count(), 2);
        assert!(llm.prompt(0).contains("pay rate"));
    }

    #[tokio::test]
    async fn service_draft_used_verbatim() {
        let reply = "Hi Jane,\n\nThanks, $90/hr remote works for me.\n\nBest regards,\nCandidate";
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"job_related": true}"#,
            r#"{"rate": "90", "location": "Remote", "not_related": false}"#,
            reply,
        ]));
        let p = processor(Some(llm.clone()), RelevanceArbitration::Veto);
        let draft = drafted(p.process(&recruiter_message("$90/hr remote")).await);
        assert_eq!(draft.source(), DraftSource::Service);
        assert_eq!(draft.body(), reply);
        assert!(llm.prompt(2).contains("accept the offered $90/hr"));
    }

    #[tokio::test]
    async fn service_not_related_never_drafts() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"job_related": true}"#,
            r#"{"rate": "Unknown", "location": "Unknown", "not_related": true}"#,
            "this should never be requested",
        ]));
        let p = processor(Some(llm.clone()), RelevanceArbitration::Veto);
        let outcome = p.process(&recruiter_message("$90/hr remote")).await;
        assert!(matches!(outcome, TriageOutcome::NotRelated { .. }));
        assert!(outcome.draft().is_none());
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn resume_request_drafts_with_attachment_flag() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(r#"{"job_related": true}"#.into()),
            Ok(r#"{"rate": "Unknown", "requires_resume": true}"#.into()),
            Err(LlmError::Timeout {
                provider: "scripted".into(),
                timeout: std::time::Duration::from_secs(30),
            }),
        ]));
        let p = processor(Some(llm), RelevanceArbitration::Veto);
        let draft = drafted(p.process(&recruiter_message("Please send your resume.")).await);
        assert_eq!(draft.facts().rate(), &Rate::ResumeRequested);
        assert!(draft.decision().attaches_resume());
        assert!(draft.body().contains("resume attached"));
    }
}
