//! Pre-LLM relevance rules — the weighted heuristic classifier.
//!
//! Runs before any reasoning-service call so obvious non-opportunities never
//! cost a request. Each rule adds (or subtracts) its weight once when it
//! fires; the message is job-related only when the total is positive.
//!
//! Recruiter signals:
//! - strong recruiter phrase → +3
//! - medium job term → +1
//! - number followed by `/hr` or `hour` → +1
//!
//! Noise signals:
//! - job-board sender domain → −3
//! - marketing local part (no-reply, sales@, newsletter@) → −2
//! - mass-mailer platform → −2
//! - newsletter boilerplate → −2
//! - sales call to action → −2
//! - retail/solar vocabulary → −3

use regex::Regex;
use tracing::debug;

use crate::config::KeywordLists;
use crate::error::ConfigError;
use crate::pipeline::normalize::normalize_lower;
use crate::pipeline::types::ClassificationResult;

/// Which part of the message a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    /// `subject + sender + normalized body`, lower-cased.
    Combined,
    /// Domain part of the sender address.
    SenderDomain,
    /// Local part of the sender address.
    SenderLocal,
}

/// A single weighted signal with a compiled matcher.
#[derive(Debug, Clone)]
pub struct ScoreRule {
    /// Human-readable signal name, used in the reasons list.
    pub name: String,
    pub weight: i32,
    pub field: RuleField,
    pub regex: Regex,
}

/// Weighted relevance classifier.
pub struct RulesEngine {
    rules: Vec<ScoreRule>,
}

impl RulesEngine {
    /// Compile the stock signal set from keyword lists.
    pub fn new(keywords: &KeywordLists) -> Result<Self, ConfigError> {
        let rules = vec![
            ScoreRule {
                name: "strong recruiter phrase".into(),
                weight: 3,
                field: RuleField::Combined,
                regex: term_regex("strong_recruiter", &keywords.strong_recruiter)?,
            },
            ScoreRule {
                name: "job term".into(),
                weight: 1,
                field: RuleField::Combined,
                regex: term_regex("job_terms", &keywords.job_terms)?,
            },
            ScoreRule {
                name: "hourly figure".into(),
                weight: 1,
                field: RuleField::Combined,
                regex: Regex::new(r"\d\s*(?:/\s*hr\b|/?\s*hour)").map_err(|source| {
                    ConfigError::InvalidPattern {
                        list: "hourly_figure".into(),
                        source,
                    }
                })?,
            },
            ScoreRule {
                name: "job-board sender".into(),
                weight: -3,
                field: RuleField::SenderDomain,
                regex: domain_regex(&keywords.job_board_domains)?,
            },
            ScoreRule {
                name: "marketing sender".into(),
                weight: -2,
                field: RuleField::SenderLocal,
                regex: alternation("marketing_local_parts", &keywords.marketing_local_parts)?,
            },
            ScoreRule {
                name: "mass-mailer platform".into(),
                weight: -2,
                field: RuleField::Combined,
                regex: term_regex("mass_mailers", &keywords.mass_mailers)?,
            },
            ScoreRule {
                name: "newsletter boilerplate".into(),
                weight: -2,
                field: RuleField::Combined,
                regex: term_regex("newsletter_phrases", &keywords.newsletter_phrases)?,
            },
            ScoreRule {
                name: "sales call to action".into(),
                weight: -2,
                field: RuleField::Combined,
                regex: term_regex("sales_phrases", &keywords.sales_phrases)?,
            },
            ScoreRule {
                name: "retail/solar vocabulary".into(),
                weight: -3,
                field: RuleField::Combined,
                regex: term_regex("retail_terms", &keywords.retail_terms)?,
            },
        ];

        Ok(Self { rules })
    }

    /// Create an engine with no rules (every message scores 0).
    #[cfg(test)]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a custom weighted rule.
    #[cfg(test)]
    pub fn add_rule(
        &mut self,
        name: &str,
        weight: i32,
        field: RuleField,
        pattern: &str,
    ) -> Result<(), regex::Error> {
        self.rules.push(ScoreRule {
            name: name.into(),
            weight,
            field,
            regex: Regex::new(pattern)?,
        });
        Ok(())
    }

    /// Score a message. Never fails; a score of 0 is not job-related.
    pub fn classify(&self, subject: &str, sender: &str, body: &str) -> ClassificationResult {
        let sender_lower = sender.trim().to_lowercase();
        let (local, domain) = split_address(&sender_lower);
        let combined = format!(
            "{} {} {}",
            subject.to_lowercase(),
            sender_lower,
            normalize_lower(Some(body))
        );

        let mut score = 0;
        let mut reasons = Vec::new();

        for rule in &self.rules {
            let haystack = match rule.field {
                RuleField::Combined => combined.as_str(),
                RuleField::SenderDomain => domain,
                RuleField::SenderLocal => local,
            };
            if haystack.is_empty() {
                continue;
            }

            if let Some(hit) = rule.regex.find(haystack) {
                score += rule.weight;
                reasons.push(format!(
                    "{:+} {}: \"{}\"",
                    rule.weight,
                    rule.name,
                    hit.as_str().trim()
                ));
            }
        }

        let result = ClassificationResult { score, reasons };
        debug!(
            sender = %sender,
            score = result.score,
            job_related = result.is_job_related(),
            "Classified message"
        );
        result
    }
}

/// Split `"Name <user@host>"` or `"user@host"` into `(local, domain)`.
fn split_address(sender: &str) -> (&str, &str) {
    let address = match (sender.rfind('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if end > start => &sender[start + 1..end],
        _ => sender,
    };
    address.trim().rsplit_once('@').unwrap_or((address.trim(), ""))
}

/// Word-bounded, case-insensitive alternation of literal terms.
fn term_regex(list: &str, terms: &[String]) -> Result<Regex, ConfigError> {
    let escaped: Vec<String> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(regex::escape)
        .collect();
    build(list, &format!(r"(?i)\b(?:{})\b", or_never(&escaped)))
}

/// Dotted entries match the domain or a subdomain; bare entries match anywhere.
fn domain_regex(domains: &[String]) -> Result<Regex, ConfigError> {
    let parts: Vec<String> = domains
        .iter()
        .map(|d| d.trim().trim_start_matches('@').to_lowercase())
        .filter(|d| !d.is_empty())
        .map(|d| {
            if d.contains('.') {
                format!(r"(?:^|\.){}$", regex::escape(&d))
            } else {
                regex::escape(&d)
            }
        })
        .collect();
    build("job_board_domains", &or_never(&parts))
}

/// Case-insensitive alternation of user-supplied regexes.
fn alternation(list: &str, patterns: &[String]) -> Result<Regex, ConfigError> {
    let parts: Vec<String> = patterns
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!("(?:{})", p))
        .collect();
    build(list, &format!("(?i){}", or_never(&parts)))
}

/// Join with `|`, or a pattern that can never match when the list is empty.
fn or_never(parts: &[String]) -> String {
    if parts.is_empty() {
        r"[^\s\S]".to_string()
    } else {
        parts.join("|")
    }
}

fn build(list: &str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
        list: list.to_string(),
        source,
    })
}
