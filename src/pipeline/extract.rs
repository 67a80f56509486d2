//! Fact extraction — pay rate and work location.
//!
//! Two layers:
//! 1. Pattern layer: deterministic regexes over the normalized text.
//! 2. Delegated layer (optional): the reasoning service returns a structured
//!    judgment that fills gaps and can flag the message as not related or as
//!    a resume request. Any service failure leaves the pattern result as is.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::pipeline::normalize::normalize;
use crate::pipeline::types::{ExtractedFacts, Location, Rate, RateFigure};

const EXTRACT_MAX_TOKENS: u32 = 256;
const EXTRACT_TEMPERATURE: f32 = 0.1;
const BODY_PROMPT_CHARS: usize = 4000;

/// Plain numbers at or above this in a service reply are read as yearly salary.
const SALARY_FLOOR: f64 = 1000.0;

/// Hourly figure or range: `$90/hr`, `80-90/hr`, `$65.50 per hour`, `$80 - $90 an hour`.
static HOURLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\$)?\s?\b(\d{1,3}(?:\.\d{1,2})?)(?:\s?(?:-|–|to)\s?\$?(\d{1,3}(?:\.\d{1,2})?))?\s?(/|per\b|an\b|a\b)?\s?(?:hrs?|hours?)\b",
    )
    .expect("static regex")
});

/// Yearly figure: `$150,000/year`, `$150k`, `$120k-$140k per year`, `$95000 annually`.
static YEARLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\$\s?(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?\s?k|\d{4,7})\b(?:\s?(?:-|–|to)\s?\$?(?:\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?\s?k|\d{4,7})\b)?(\s?(?:/\s?(?:year|yr)\b|per\s(?:year|annum)\b|a\syear\b|annually\b))?",
    )
    .expect("static regex")
});

static ON_SITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bon[\s-]?site\b").expect("static regex"));

/// Capitalized `City, ST`, up to three words of city name.
static CITY_STATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z.'-]*(?: [A-Z][a-zA-Z.'-]*){0,2}), ([A-Z]{2})\b")
        .expect("static regex")
});

const US_STATES: [&str; 51] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY",
];

/// Pulls rate and location out of a message.
pub struct FactExtractor {
    hours_per_year: f64,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl FactExtractor {
    pub fn new(hours_per_year: f64) -> Self {
        Self {
            hours_per_year,
            llm: None,
        }
    }

    /// Enable the delegated layer.
    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Extract facts, consulting the reasoning service when one is configured.
    pub async fn extract(&self, subject: &str, body: &str) -> ExtractedFacts {
        let normalized = normalize(Some(body));
        let facts = self.extract_normalized(subject, &normalized);

        let Some(llm) = &self.llm else {
            return facts;
        };

        match self.judge(llm.as_ref(), subject, &normalized).await {
            Ok(judgment) => {
                debug!(
                    not_related = judgment.not_related,
                    requires_resume = judgment.requires_resume,
                    reason = judgment.classification_reason.as_deref().unwrap_or(""),
                    "Service extraction judgment"
                );
                self.merge(facts, judgment)
            }
            Err(e) => {
                warn!(error = %e, "Service extraction failed, using pattern results");
                facts
            }
        }
    }

    /// Pattern layer only. Deterministic.
    pub fn extract_patterns(&self, subject: &str, body: &str) -> ExtractedFacts {
        self.extract_normalized(subject, &normalize(Some(body)))
    }

    fn extract_normalized(&self, subject: &str, normalized: &str) -> ExtractedFacts {
        let text = format!("{} {}", subject.trim(), normalized);
        ExtractedFacts::new(self.parse_rate(&text), parse_location(&text))
    }

    /// Hourly figures win over yearly ones. No figure gives `Unknown`.
    pub fn parse_rate(&self, text: &str) -> Rate {
        if let Some(figure) = find_hourly(text) {
            return Rate::Hourly(figure);
        }
        match find_yearly(text) {
            Some(yearly) => Rate::Hourly(RateFigure::hourly(self.to_hourly(yearly))),
            None => Rate::Unknown,
        }
    }

    fn to_hourly(&self, yearly: f64) -> f64 {
        (yearly / self.hours_per_year * 100.0).round() / 100.0
    }

    async fn judge(
        &self,
        llm: &dyn LlmProvider,
        subject: &str,
        normalized: &str,
    ) -> Result<ServiceJudgment, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(EXTRACT_SYSTEM_PROMPT),
            ChatMessage::user(build_extract_user_prompt(subject, normalized)),
        ])
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(EXTRACT_MAX_TOKENS);

        let response = llm.complete(request).await?;
        parse_judgment(&response.content)
    }

    /// Pattern values win; service values fill `Unknown` gaps. Flags always apply.
    fn merge(&self, facts: ExtractedFacts, judgment: ServiceJudgment) -> ExtractedFacts {
        if judgment.not_related {
            return ExtractedFacts::not_related();
        }

        let rate = if judgment.requires_resume {
            Rate::ResumeRequested
        } else if facts.rate().is_unknown() {
            judgment
                .rate
                .as_ref()
                .and_then(|v| self.service_rate(v))
                .unwrap_or(Rate::Unknown)
        } else {
            facts.rate().clone()
        };

        let location = if facts.location().is_unknown() {
            judgment
                .location
                .as_deref()
                .and_then(service_location)
                .unwrap_or(Location::Unknown)
        } else {
            facts.location().clone()
        };

        ExtractedFacts::new(rate, location)
    }

    fn service_rate(&self, value: &serde_json::Value) -> Option<Rate> {
        let plain = match value {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => {
                let s = s.trim();
                if s.is_empty() || s.eq_ignore_ascii_case("unknown") {
                    return None;
                }
                if let rate @ Rate::Hourly(_) = self.parse_rate(s) {
                    return Some(rate);
                }
                s.trim_start_matches('$')
                    .trim_end_matches("/hr")
                    .replace(',', "")
                    .trim()
                    .parse::<f64>()
                    .ok()?
            }
            _ => return None,
        };

        if !(plain > 0.0) {
            return None;
        }
        let hourly = if plain >= SALARY_FLOOR {
            self.to_hourly(plain)
        } else {
            plain
        };
        Some(Rate::Hourly(RateFigure::hourly(hourly)))
    }
}

fn find_hourly(text: &str) -> Option<RateFigure> {
    HOURLY
        .captures_iter(text)
        .filter(|caps| caps.get(1).is_some() || caps.get(4).is_some())
        .find_map(|caps| {
            let low = caps.get(2)?.as_str();
            let high = caps.get(3).map(|m| m.as_str());
            RateFigure::from_parts(low, high)
        })
}

/// Lower bound of the first yearly figure, in dollars.
fn find_yearly(text: &str) -> Option<f64> {
    YEARLY.captures_iter(text).find_map(|caps| {
        let raw = caps.get(1)?.as_str();
        let has_k = raw.to_ascii_lowercase().ends_with('k');
        if !has_k && caps.get(2).is_none() {
            return None;
        }
        parse_salary(raw)
    })
}

fn parse_salary(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(',', "").to_ascii_lowercase();
    let cleaned = cleaned.trim();
    match cleaned.strip_suffix('k') {
        Some(thousands) => thousands.trim().parse::<f64>().ok().map(|v| v * 1000.0),
        None => cleaned.parse::<f64>().ok(),
    }
}

/// First match wins: remote, hybrid, on-site, then `City, ST`.
///
/// An on-site mention alongside a `City, ST` yields the place, which is the
/// more specific of the two.
pub fn parse_location(text: &str) -> Location {
    let lower = text.to_lowercase();
    if lower.contains("remote") {
        return Location::Remote;
    }
    if lower.contains("hybrid") {
        return Location::Hybrid;
    }
    let place = find_city_state(text);
    if ON_SITE.is_match(&lower) {
        return place.map(Location::Place).unwrap_or(Location::OnSite);
    }
    place.map(Location::Place).unwrap_or(Location::Unknown)
}

fn find_city_state(text: &str) -> Option<String> {
    CITY_STATE.captures_iter(text).find_map(|caps| {
        let state = caps.get(2)?.as_str();
        if !US_STATES.contains(&state) {
            return None;
        }
        Some(format!("{}, {}", caps.get(1)?.as_str(), state))
    })
}

fn service_location(raw: &str) -> Option<Location> {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" | "unknown" | "n/a" | "none" | "not related" => None,
        "remote" => Some(Location::Remote),
        "hybrid" => Some(Location::Hybrid),
        "on-site" | "onsite" | "on site" => Some(Location::OnSite),
        _ => Some(Location::Place(trimmed.to_string())),
    }
}

// ── Service contract ────────────────────────────────────────────────

const EXTRACT_SYSTEM_PROMPT: &str = "You read emails sent to a software engineer who receives many tech recruiter messages.\n\n\
     1. Decide whether this email is a genuine job opportunity from a recruiter.\n\
     2. Extract the pay rate in USD per hour and the job location (Remote, Hybrid, On-Site, or \"City, ST\").\n\
     3. Note whether the recruiter asks for a resume before discussing terms.\n\n\
     If the email is not job-related, set \"not_related\" to true and leave rate and location as \"Unknown\".\n\n\
     Respond with ONLY a JSON object:\n\
     {\"rate\": \"90\" or \"Unknown\", \"location\": \"Remote\" or \"City, ST\" or \"On-Site\" or \"Unknown\", \
     \"not_related\": false, \"requires_resume\": false, \"classification_reason\": \"...\"}";

fn build_extract_user_prompt(subject: &str, normalized: &str) -> String {
    let body: String = normalized.chars().take(BODY_PROMPT_CHARS).collect();
    format!("Subject: {}\n\nEmail content:\n{}", subject, body)
}

/// Structured judgment returned by the reasoning service.
#[derive(Debug, Default, Deserialize)]
pub struct ServiceJudgment {
    /// A number, a string like `"90"` or `"$80-90/hr"`, or `"Unknown"`.
    #[serde(default)]
    pub rate: Option<serde_json::Value>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub not_related: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub requires_resume: bool,
    #[serde(default)]
    pub classification_reason: Option<String>,
}

/// Parse a judgment out of free-form model output.
pub fn parse_judgment(raw: &str) -> Result<ServiceJudgment, LlmError> {
    let json = extract_json_object(raw);
    Ok(serde_json::from_str(&json)?)
}

/// Accepts `true`, `"true"`, `"yes"`, or null.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes")
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_HOURS_PER_YEAR;
    use crate::llm::testing::ScriptedLlm;

    fn extractor() -> FactExtractor {
        FactExtractor::new(DEFAULT_HOURS_PER_YEAR)
    }

    fn hourly_text(rate: &Rate) -> &str {
        match rate {
            Rate::Hourly(figure) => &figure.text,
            other => panic!("expected hourly rate, got {:?}", other),
        }
    }

    #[test]
    fn ninety_remote() {
        let facts = extractor().extract_patterns(
            "Rust contract",
            "<p>Pay is $90/hr, fully remote.</p>",
        );
        assert_eq!(hourly_text(facts.rate()), "90/hr");
        assert_eq!(facts.rate().value(), Some(90.0));
        assert_eq!(facts.location(), &Location::Remote);
    }

    #[test]
    fn seventy_on_site_austin() {
        let facts = extractor().extract_patterns(
            "Backend role",
            "The rate is $70/hr, on-site in Austin, TX.",
        );
        assert_eq!(hourly_text(facts.rate()), "70/hr");
        assert_eq!(facts.location(), &Location::Place("Austin, TX".into()));
    }

    #[test]
    fn rate_spellings() {
        let e = extractor();
        assert_eq!(hourly_text(&e.parse_rate("paying $85 per hour")), "85/hr");
        assert_eq!(hourly_text(&e.parse_rate("up to 95/hour on W2")), "95/hr");
        assert_eq!(hourly_text(&e.parse_rate("$65.50 / hr")), "65.50/hr");
        assert_eq!(hourly_text(&e.parse_rate("$75 an hour")), "75/hr");
    }

    #[test]
    fn ranges_use_lower_bound() {
        let e = extractor();
        let rate = e.parse_rate("Budget is $80-90/hr depending on experience");
        assert_eq!(hourly_text(&rate), "80-90/hr");
        assert_eq!(rate.value(), Some(80.0));

        let spaced = e.parse_rate("$80 - $95 per hour");
        assert_eq!(hourly_text(&spaced), "80-95/hr");
    }

    #[test]
    fn working_hours_are_not_rates() {
        let e = extractor();
        assert_eq!(e.parse_rate("40 hours a week, 6 month contract"), Rate::Unknown);
        assert_eq!(e.parse_rate("a 1 hour interview"), Rate::Unknown);
    }

    #[test]
    fn yearly_salary_converts() {
        let e = extractor();
        let rate = e.parse_rate("Salary: $150,000/year plus bonus");
        assert_eq!(hourly_text(&rate), "72.12/hr");

        let exact = e.parse_rate("$176,800 per year");
        assert_eq!(hourly_text(&exact), "85/hr");

        let k = e.parse_rate("comp is $150k base");
        assert_eq!(hourly_text(&k), "72.12/hr");
    }

    #[test]
    fn bare_dollar_amount_is_not_salary() {
        assert_eq!(extractor().parse_rate("a $5000 signing bonus"), Rate::Unknown);
    }

    #[test]
    fn unparseable_year_mention_is_unknown() {
        assert_eq!(extractor().parse_rate("competitive pay /year"), Rate::Unknown);
    }

    #[test]
    fn hourly_beats_yearly() {
        let rate = extractor().parse_rate("$150,000/year or $80/hr on C2C");
        assert_eq!(hourly_text(&rate), "80/hr");
    }

    #[test]
    fn custom_hours_per_year() {
        let e = FactExtractor::new(2000.0);
        assert_eq!(hourly_text(&e.parse_rate("$100,000/year")), "50/hr");
    }

    #[test]
    fn location_priority() {
        assert_eq!(parse_location("Remote or hybrid in Denver, CO"), Location::Remote);
        assert_eq!(parse_location("Hybrid, 3 days on-site"), Location::Hybrid);
        assert_eq!(parse_location("100% onsite"), Location::OnSite);
        assert_eq!(parse_location("On site at HQ"), Location::OnSite);
        assert_eq!(
            parse_location("Office in New York, NY"),
            Location::Place("New York, NY".into())
        );
        assert_eq!(parse_location("Let me know"), Location::Unknown);
    }

    #[test]
    fn city_requires_real_state_code() {
        assert_eq!(parse_location("Regards, ZZ"), Location::Unknown);
        assert_eq!(parse_location("Team Lead, QA"), Location::Unknown);
        assert_eq!(
            parse_location("Client is in Portland, OR"),
            Location::Place("Portland, OR".into())
        );
    }

    #[test]
    fn extraction_is_idempotent() {
        let e = extractor();
        let body = "<div>$80-90/hr</div> hybrid in Seattle, WA";
        assert_eq!(e.extract_patterns("s", body), e.extract_patterns("s", body));
        let normalized = normalize(Some(body));
        assert_eq!(e.extract_patterns("s", body), e.extract_patterns("s", &normalized));
    }

    #[test]
    fn nothing_found_is_unknown() {
        let facts = extractor().extract_patterns("Quick question", "Are you open to new roles?");
        assert_eq!(facts, ExtractedFacts::unknown());
    }

    #[test]
    fn judgment_parsing() {
        let j = parse_judgment(
            "```json\n{\"rate\": 90, \"location\": \"Remote\", \"not_related\": \"false\", \"requires_resume\": true}\n```",
        )
        .unwrap();
        assert_eq!(j.rate, Some(serde_json::json!(90)));
        assert!(!j.not_related);
        assert!(j.requires_resume);

        assert!(parse_judgment("I think this is a recruiter email").is_err());
    }

    #[tokio::test]
    async fn service_fills_unknown_gaps() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"rate": "95", "location": "Denver, CO", "not_related": false}"#,
        ]));
        let facts = extractor()
            .with_llm(llm.clone())
            .extract("Opportunity", "Can we talk about a contract role?")
            .await;
        assert_eq!(hourly_text(facts.rate()), "95/hr");
        assert_eq!(facts.location(), &Location::Place("Denver, CO".into()));
        assert_eq!(llm.call_count(), 1);
        assert!(llm.prompt(0).contains("Can we talk about a contract role?"));
    }

    #[tokio::test]
    async fn pattern_values_win_over_service() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"rate": "60", "location": "On-Site", "not_related": false}"#,
        ]));
        let facts = extractor()
            .with_llm(llm)
            .extract("Role", "$90/hr remote")
            .await;
        assert_eq!(hourly_text(facts.rate()), "90/hr");
        assert_eq!(facts.location(), &Location::Remote);
    }

    #[tokio::test]
    async fn service_salary_number_converts() {
        let llm = Arc::new(ScriptedLlm::replying(&[r#"{"rate": 176800, "location": "Unknown"}"#]));
        let facts = extractor().with_llm(llm).extract("Role", "details inside").await;
        assert_eq!(hourly_text(facts.rate()), "85/hr");
        assert_eq!(facts.location(), &Location::Unknown);
    }

    #[tokio::test]
    async fn service_not_related_sets_both_sentinels() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"rate": "Unknown", "location": "Unknown", "not_related": true}"#,
        ]));
        let facts = extractor().with_llm(llm).extract("Deal", "$90/hr remote").await;
        assert!(facts.is_not_related());
        assert_eq!(facts.rate(), &Rate::NotRelated);
        assert_eq!(facts.location(), &Location::NotRelated);
    }

    #[tokio::test]
    async fn service_resume_request_overrides_rate() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"rate": "Unknown", "location": "Remote", "requires_resume": true}"#,
        ]));
        let facts = extractor().with_llm(llm).extract("Role", "$90/hr").await;
        assert_eq!(facts.rate(), &Rate::ResumeRequested);
        assert_eq!(facts.location(), &Location::Remote);
    }

    #[tokio::test]
    async fn malformed_or_unreachable_service_falls_back() {
        let body = "$70/hr, on-site in Austin, TX";
        let expected = extractor().extract_patterns("Role", body);

        let malformed = Arc::new(ScriptedLlm::replying(&["rate is probably 70"]));
        let facts = extractor().with_llm(malformed).extract("Role", body).await;
        assert_eq!(facts, expected);

        let down = Arc::new(ScriptedLlm::unreachable());
        let facts = extractor().with_llm(down).extract("Role", body).await;
        assert_eq!(facts, expected);
    }
}
