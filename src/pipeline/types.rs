//! Shared types for the triage pipeline.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Timestamp layout used in message identifiers and the sent-emails store.
pub const KEY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Inbound message ─────────────────────────────────────────────────

/// One fetched email, immutable for the duration of a triage pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message-ID header (or a generated id when the header is missing).
    pub id: String,
    /// Sender email address.
    pub sender: String,
    /// Display name from the From header, if any.
    pub sender_name: Option<String>,
    /// Decoded subject line.
    pub subject: String,
    /// Raw body text, possibly HTML.
    pub body: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Identifier used by the skipped-emails set: `"<date> - <sender>"`.
    pub fn key(&self) -> String {
        format!(
            "{} - {}",
            self.received_at.format(KEY_TIMESTAMP_FORMAT),
            self.sender
        )
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Outcome of the weighted relevance heuristic.
///
/// The verdict is derived from the score, so `is_job_related() ⇔ score > 0`
/// holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    /// Sum of the weights of every signal that fired.
    pub score: i32,
    /// One entry per fired signal, in evaluation order.
    pub reasons: Vec<String>,
}

impl ClassificationResult {
    pub fn is_job_related(&self) -> bool {
        self.score > 0
    }

    /// Reasons joined for a single log line.
    pub fn explain(&self) -> String {
        if self.reasons.is_empty() {
            format!("score {} (no signals)", self.score)
        } else {
            format!("score {}: {}", self.score, self.reasons.join("; "))
        }
    }
}

// ── Extracted facts ─────────────────────────────────────────────────

/// An hourly figure, or a simple range, in USD.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateFigure {
    /// Normalized text, e.g. `"85/hr"` or `"80-90/hr"`.
    pub text: String,
    pub low: f64,
    pub high: Option<f64>,
}

impl RateFigure {
    /// Build from the matched digit strings, keeping their original spelling.
    pub fn from_parts(low: &str, high: Option<&str>) -> Option<Self> {
        let low_value: f64 = low.replace(',', "").parse().ok()?;
        let high_value = match high {
            Some(h) => Some(h.replace(',', "").parse::<f64>().ok()?),
            None => None,
        };
        let text = match high {
            Some(h) => format!("{}-{}/hr", low, h),
            None => format!("{}/hr", low),
        };
        Some(Self {
            text,
            low: low_value,
            high: high_value,
        })
    }

    /// Build from a computed hourly value (e.g. a converted salary).
    pub fn hourly(value: f64) -> Self {
        Self {
            text: format!("{}/hr", value),
            low: value,
            high: None,
        }
    }

    /// The figure the negotiation policy compares against thresholds.
    ///
    /// For a range this is the lower bound.
    pub fn value(&self) -> f64 {
        self.low
    }
}

impl fmt::Display for RateFigure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Pay rate as extracted from a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Rate {
    Unknown,
    Hourly(RateFigure),
    /// The message is not a genuine tech-recruiting opportunity.
    NotRelated,
    /// The recruiter asked for a resume before discussing terms.
    ResumeRequested,
}

impl Rate {
    /// Parsed hourly value, if the rate is a figure.
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Hourly(figure) => Some(figure.value()),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("Unknown"),
            Self::Hourly(figure) => figure.fmt(f),
            Self::NotRelated => f.write_str("Not Related"),
            Self::ResumeRequested => f.write_str("Resume Requested"),
        }
    }
}

/// Work location as extracted from a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Location {
    Unknown,
    Remote,
    Hybrid,
    OnSite,
    /// A literal `"City, ST"`.
    Place(String),
    NotRelated,
}

impl Location {
    /// True for locations that warrant asking whether remote work is possible.
    pub fn is_specific_non_remote(&self) -> bool {
        matches!(self, Self::Hybrid | Self::OnSite | Self::Place(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("Unknown"),
            Self::Remote => f.write_str("Remote"),
            Self::Hybrid => f.write_str("Hybrid"),
            Self::OnSite => f.write_str("On-Site"),
            Self::Place(place) => f.write_str(place),
            Self::NotRelated => f.write_str("Not Related"),
        }
    }
}

/// Structured facts pulled out of one message.
///
/// `rate` is `NotRelated` exactly when `location` is; the constructor
/// collapses a half-set sentinel onto both fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedFacts {
    rate: Rate,
    location: Location,
}

impl ExtractedFacts {
    pub fn new(rate: Rate, location: Location) -> Self {
        if matches!(rate, Rate::NotRelated) || matches!(location, Location::NotRelated) {
            return Self::not_related();
        }
        Self { rate, location }
    }

    pub fn not_related() -> Self {
        Self {
            rate: Rate::NotRelated,
            location: Location::NotRelated,
        }
    }

    pub fn unknown() -> Self {
        Self {
            rate: Rate::Unknown,
            location: Location::Unknown,
        }
    }

    pub fn rate(&self) -> &Rate {
        &self.rate
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn is_not_related(&self) -> bool {
        matches!(self.rate, Rate::NotRelated)
    }
}

// ── Negotiation decision ────────────────────────────────────────────

/// Which counter-offer the policy is making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Rate is workable; ask for movement toward the accept threshold.
    Flexibility,
    /// Rate is low; ask for the minimum or signal a likely pass.
    BudgetFloor,
}

/// Response strategy selected by the negotiation policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum NegotiationDecision {
    Accept { offered: f64 },
    Counter {
        offered: f64,
        target: f64,
        kind: CounterKind,
    },
    RequestInfo,
    Decline { offered: f64 },
    RequestResume,
    /// Suppress any reply.
    Skip,
}

impl NegotiationDecision {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::Counter { .. } => "counter",
            Self::RequestInfo => "request_info",
            Self::Decline { .. } => "decline",
            Self::RequestResume => "request_resume",
            Self::Skip => "skip",
        }
    }

    /// Whether a reply for this decision should carry the resume.
    pub fn attaches_resume(&self) -> bool {
        matches!(
            self,
            Self::Accept { .. } | Self::Counter { .. } | Self::RequestResume
        )
    }
}

// ── Drafts and outcomes ─────────────────────────────────────────────

/// Where a draft's prose came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftSource {
    /// Deterministic template.
    Template,
    /// Free-form prose from the reasoning service.
    Service,
}

/// A reply awaiting human approval. Never empty, never for a `Skip` decision.
#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    decision: NegotiationDecision,
    facts: ExtractedFacts,
    body: String,
    source: DraftSource,
}

impl Draft {
    /// Returns `None` for a `Skip` decision or a blank body.
    pub fn new(
        decision: NegotiationDecision,
        facts: ExtractedFacts,
        body: impl Into<String>,
        source: DraftSource,
    ) -> Option<Self> {
        let body = body.into();
        if matches!(decision, NegotiationDecision::Skip) || body.trim().is_empty() {
            return None;
        }
        Some(Self {
            decision,
            facts,
            body,
            source,
        })
    }

    pub fn decision(&self) -> &NegotiationDecision {
        &self.decision
    }

    pub fn facts(&self) -> &ExtractedFacts {
        &self.facts
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn source(&self) -> DraftSource {
        self.source
    }
}

/// Result of composing a reply for one message.
#[derive(Debug, Clone)]
pub enum TriageOutcome {
    /// The heuristic (or a service veto) judged it not a recruiter opportunity.
    Irrelevant {
        classification: ClassificationResult,
        vetoed_by_service: bool,
    },
    /// Passed the filter, but extraction flagged it not related. Never replied to.
    NotRelated { classification: ClassificationResult },
    /// A reply is ready for approval.
    Drafted {
        classification: ClassificationResult,
        draft: Draft,
    },
}

impl TriageOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Irrelevant { .. } => "irrelevant",
            Self::NotRelated { .. } => "not_related",
            Self::Drafted { .. } => "drafted",
        }
    }

    pub fn draft(&self) -> Option<&Draft> {
        match self {
            Self::Drafted { draft, .. } => Some(draft),
            _ => None,
        }
    }
}

// ── Outgoing reply ──────────────────────────────────────────────────

/// A reply the mail sink may transmit. The body is never blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReply {
    recipient: String,
    subject: String,
    body: String,
    attach_resume: bool,
}

impl OutgoingReply {
    /// Reply to `original` using the approved draft text.
    pub fn from_draft(original: &InboundMessage, draft: &Draft) -> Self {
        Self {
            recipient: original.sender.clone(),
            subject: reply_subject(&original.subject),
            body: draft.body().to_string(),
            attach_resume: draft.decision().attaches_resume(),
        }
    }

    /// Reply to `original` with user-edited text. `None` if the edit is blank.
    pub fn edited(original: &InboundMessage, draft: &Draft, body: &str) -> Option<Self> {
        if body.trim().is_empty() {
            return None;
        }
        Some(Self {
            body: body.to_string(),
            ..Self::from_draft(original, draft)
        })
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn attach_resume(&self) -> bool {
        self.attach_resume
    }
}

/// `Re: <subject>`, without stacking prefixes.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Supplies the messages for one triage pass. Pure I/O, no business logic.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Recent messages within the configured window, newest first.
    async fn fetch_recent(&self) -> Result<Vec<InboundMessage>, ChannelError>;
}

/// Delivers approved replies.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send_reply(&self, reply: &OutgoingReply) -> Result<(), ChannelError>;
}

/// Human decision on a drafted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Send,
    SendEdited(String),
    SkipPermanently,
    SkipTemporarily,
}

/// Presents a draft to the user and collects a verdict.
#[async_trait]
pub trait ApprovalSurface: Send {
    async fn review(
        &mut self,
        message: &InboundMessage,
        draft: &Draft,
    ) -> Result<Verdict, ChannelError>;
}
