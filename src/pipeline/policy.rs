//! Negotiation policy — rate thresholds to a decision, decision to prose.
//!
//! Both halves are pure and total over every `ExtractedFacts` value.

use crate::config::{Identity, RateThresholds, TriageConfig};
use crate::pipeline::types::{
    CounterKind, ExtractedFacts, InboundMessage, Location, NegotiationDecision, Rate,
};

/// Decides how to answer an offer and renders the templated reply.
#[derive(Debug, Clone)]
pub struct NegotiationPolicy {
    thresholds: RateThresholds,
    identity: Identity,
}

impl NegotiationPolicy {
    pub fn new(config: &TriageConfig) -> Self {
        Self {
            thresholds: config.thresholds,
            identity: config.identity.clone(),
        }
    }

    pub fn thresholds(&self) -> &RateThresholds {
        &self.thresholds
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Apply the decision table. `accept` and `reject_below` are inclusive lower bounds.
    pub fn decide(&self, facts: &ExtractedFacts) -> NegotiationDecision {
        let t = &self.thresholds;
        match facts.rate() {
            Rate::NotRelated => NegotiationDecision::Skip,
            Rate::ResumeRequested => NegotiationDecision::RequestResume,
            Rate::Unknown => NegotiationDecision::RequestInfo,
            Rate::Hourly(figure) => {
                let offered = figure.value();
                if offered >= t.accept {
                    NegotiationDecision::Accept { offered }
                } else if offered >= t.min_acceptable {
                    NegotiationDecision::Counter {
                        offered,
                        target: t.accept,
                        kind: CounterKind::Flexibility,
                    }
                } else if offered >= t.reject_below {
                    NegotiationDecision::Counter {
                        offered,
                        target: t.min_acceptable,
                        kind: CounterKind::BudgetFloor,
                    }
                } else {
                    NegotiationDecision::Decline { offered }
                }
            }
        }
    }

    /// Render the reply for `decision`. Empty for `Skip`.
    pub fn render(
        &self,
        decision: &NegotiationDecision,
        facts: &ExtractedFacts,
        message: &InboundMessage,
    ) -> String {
        let location = facts.location();
        let offered = offered_text(facts.rate());

        let mut paragraphs: Vec<String> = Vec::new();
        match decision {
            NegotiationDecision::Skip => return String::new(),

            NegotiationDecision::Accept { .. } => {
                paragraphs.push(format!(
                    "Thank you for reaching out about this opportunity. The rate of {} works for me and I'd be glad to move forward.",
                    offered
                ));
                paragraphs.push(format!(
                    "I'm available {}. Let me know the next steps.",
                    self.identity.working_hours
                ));
            }

            NegotiationDecision::Counter {
                target,
                kind: CounterKind::Flexibility,
                ..
            } => {
                paragraphs.push(format!(
                    "Thank you for reaching out, the role sounds like a good fit. You mentioned {}. Is there any flexibility to bring the rate closer to ${}/hr?",
                    offered,
                    money(*target)
                ));
                paragraphs.push(
                    "Either way, I'd be happy to proceed if the position can be done remotely."
                        .to_string(),
                );
            }

            NegotiationDecision::Counter {
                target,
                kind: CounterKind::BudgetFloor,
                ..
            } => {
                paragraphs.push(format!(
                    "Thank you for reaching out. The rate you mentioned ({}) is below what I'm looking for. Could the budget move to ${}/hr?",
                    offered,
                    money(*target)
                ));
                paragraphs.push(
                    "If not, I'll most likely have to pass on this one.".to_string(),
                );
            }

            NegotiationDecision::RequestInfo => {
                let ask = if location.is_unknown() {
                    "Could you share the hourly rate, whether the role is remote, and a few more details about the position?"
                } else {
                    "Could you share the hourly rate and a few more details about the position?"
                };
                paragraphs.push(format!(
                    "Thank you for reaching out about this opportunity. {}",
                    ask
                ));
            }

            NegotiationDecision::Decline { .. } => {
                paragraphs.push(format!(
                    "Thank you for thinking of me. Unfortunately a rate of {} is below my range, so I'll have to pass on this one.",
                    offered
                ));
                paragraphs.push(
                    "Please keep me in mind for future roles with a higher budget.".to_string(),
                );
            }

            NegotiationDecision::RequestResume => {
                let ask = if location.is_unknown() {
                    "Could you also share the hourly rate and whether the role is remote?"
                } else {
                    "Could you also share the hourly rate for the position?"
                };
                paragraphs.push(format!(
                    "Thank you for reaching out. Please find my resume attached as requested. {}",
                    ask
                ));
            }
        }

        if let Some(question) = location_question(decision, location) {
            paragraphs.push(question);
        }

        format!(
            "{}\n\n{}\n\n{}",
            greeting(message),
            paragraphs.join("\n\n"),
            self.identity.signature()
        )
    }
}

/// Remote-work question layered on top of the rate decision.
fn location_question(decision: &NegotiationDecision, location: &Location) -> Option<String> {
    if matches!(decision, NegotiationDecision::Skip) {
        return None;
    }

    match location {
        Location::Place(place) => Some(format!(
            "I see the role is based in {}. Is there any possibility of working remotely?",
            place
        )),
        Location::OnSite => Some(
            "I see the role is on-site. Is there any possibility of working remotely?".to_string(),
        ),
        Location::Hybrid => Some(
            "I see the role is hybrid. Is there any possibility of working fully remotely?"
                .to_string(),
        ),
        // RequestInfo and RequestResume already fold the remote question in.
        Location::Unknown
            if matches!(
                decision,
                NegotiationDecision::Accept { .. } | NegotiationDecision::Counter { .. }
            ) =>
        {
            Some("Could you also confirm whether the role is remote?".to_string())
        }
        _ => None,
    }
}

fn greeting(message: &InboundMessage) -> String {
    message
        .sender_name
        .as_deref()
        .and_then(|name| name.split_whitespace().next())
        .filter(|first| first.chars().any(char::is_alphabetic))
        .map(|first| format!("Hi {},", first.trim_matches(|c: char| !c.is_alphanumeric())))
        .unwrap_or_else(|| "Hi,".to_string())
}

fn offered_text(rate: &Rate) -> String {
    match rate {
        Rate::Hourly(figure) => format!("${}", figure),
        _ => "the rate mentioned".to_string(),
    }
}

/// `85` rather than `85.0`.
fn money(value: f64) -> String {
    format!("{}", value)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::pipeline::types::RateFigure;

    fn policy() -> NegotiationPolicy {
        let mut config = TriageConfig::default();
        config.identity = Identity {
            name: "Sam Rivera".into(),
            phone: Some("555-0100".into()),
            working_hours: "9am to 5pm Eastern".into(),
        };
        NegotiationPolicy::new(&config)
    }

    fn facts(rate: f64, location: Location) -> ExtractedFacts {
        ExtractedFacts::new(Rate::Hourly(RateFigure::hourly(rate)), location)
    }

    fn message(sender_name: Option<&str>) -> InboundMessage {
        InboundMessage {
            id: "m-1".into(),
            sender: "jane@agency.example".into(),
            sender_name: sender_name.map(String::from),
            subject: "Rust contract".into(),
            body: String::new(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn boundaries() {
        let p = policy();
        assert!(matches!(
            p.decide(&facts(85.0, Location::Remote)),
            NegotiationDecision::Accept { .. }
        ));
        assert!(matches!(
            p.decide(&facts(84.99, Location::Remote)),
            NegotiationDecision::Counter {
                kind: CounterKind::Flexibility,
                ..
            }
        ));
        assert!(matches!(
            p.decide(&facts(75.0, Location::Remote)),
            NegotiationDecision::Counter {
                kind: CounterKind::Flexibility,
                ..
            }
        ));
        assert!(matches!(
            p.decide(&facts(74.99, Location::Remote)),
            NegotiationDecision::Counter {
                kind: CounterKind::BudgetFloor,
                ..
            }
        ));
        assert!(matches!(
            p.decide(&facts(65.0, Location::Remote)),
            NegotiationDecision::Counter {
                kind: CounterKind::BudgetFloor,
                ..
            }
        ));
        assert!(matches!(
            p.decide(&facts(64.99, Location::Remote)),
            NegotiationDecision::Decline { .. }
        ));
    }

    #[test]
    fn sentinels() {
        let p = policy();
        assert_eq!(p.decide(&ExtractedFacts::not_related()), NegotiationDecision::Skip);
        assert_eq!(p.decide(&ExtractedFacts::unknown()), NegotiationDecision::RequestInfo);
        assert_eq!(
            p.decide(&ExtractedFacts::new(Rate::ResumeRequested, Location::Remote)),
            NegotiationDecision::RequestResume
        );
    }

    #[test]
    fn counter_targets() {
        let p = policy();
        assert_eq!(
            p.decide(&facts(80.0, Location::Remote)),
            NegotiationDecision::Counter {
                offered: 80.0,
                target: 85.0,
                kind: CounterKind::Flexibility
            }
        );
        assert_eq!(
            p.decide(&facts(70.0, Location::Remote)),
            NegotiationDecision::Counter {
                offered: 70.0,
                target: 75.0,
                kind: CounterKind::BudgetFloor
            }
        );
    }

    #[test]
    fn skip_renders_nothing() {
        let p = policy();
        let facts = ExtractedFacts::not_related();
        assert_eq!(p.render(&p.decide(&facts), &facts, &message(None)), "");
    }

    #[test]
    fn accept_remote_reply() {
        let p = policy();
        let facts = facts(90.0, Location::Remote);
        let text = p.render(&p.decide(&facts), &facts, &message(Some("Jane Doe")));
        assert!(text.starts_with("Hi Jane,"));
        assert!(text.contains("$90/hr works for me"));
        assert!(text.contains("9am to 5pm Eastern"));
        assert!(!text.contains("remotely?"));
        assert!(text.ends_with("Best regards,\nSam Rivera\n555-0100"));
    }

    #[test]
    fn counter_on_site_asks_about_remote() {
        let p = policy();
        let facts = facts(70.0, Location::Place("Austin, TX".into()));
        let text = p.render(&p.decide(&facts), &facts, &message(None));
        assert!(text.starts_with("Hi,"));
        assert!(text.contains("($70/hr)"));
        assert!(text.contains("$75/hr"));
        assert!(text.contains("based in Austin, TX"));
        assert!(text.contains("working remotely?"));
    }

    #[test]
    fn unknown_rate_and_location_combined_into_one_ask() {
        let p = policy();
        let facts = ExtractedFacts::unknown();
        let text = p.render(&p.decide(&facts), &facts, &message(None));
        assert_eq!(text.matches('?').count(), 1);
        assert!(text.contains("hourly rate, whether the role is remote"));
        assert!(!text.contains('$'));
    }

    #[test]
    fn unknown_rate_known_location() {
        let p = policy();
        let facts = ExtractedFacts::new(Rate::Unknown, Location::Hybrid);
        let text = p.render(&p.decide(&facts), &facts, &message(None));
        assert!(text.contains("share the hourly rate and"));
        assert!(text.contains("fully remotely?"));
    }

    #[test]
    fn accept_with_unknown_location_confirms_remote() {
        let p = policy();
        let facts = facts(95.0, Location::Unknown);
        let text = p.render(&p.decide(&facts), &facts, &message(None));
        assert!(text.contains("confirm whether the role is remote"));
    }

    #[test]
    fn decline_still_asks_about_remote_for_a_place() {
        let p = policy();
        let facts = facts(50.0, Location::Place("Austin, TX".into()));
        let decision = p.decide(&facts);
        assert_eq!(decision, NegotiationDecision::Decline { offered: 50.0 });
        let text = p.render(&decision, &facts, &message(None));
        assert!(text.contains("pass on this one"));
        assert!(text.contains("based in Austin, TX"));
        assert!(text.contains("working remotely?"));
    }

    #[test]
    fn decline_with_unknown_location_adds_no_question() {
        let p = policy();
        let facts = facts(50.0, Location::Unknown);
        let text = p.render(&p.decide(&facts), &facts, &message(None));
        assert!(text.contains("pass on this one"));
        assert!(!text.contains("remote"));
    }

    #[test]
    fn resume_request_mentions_attachment() {
        let p = policy();
        let facts = ExtractedFacts::new(Rate::ResumeRequested, Location::Unknown);
        let decision = p.decide(&facts);
        assert!(decision.attaches_resume());
        let text = p.render(&decision, &facts, &message(None));
        assert!(text.contains("resume attached"));
        assert!(text.contains("whether the role is remote"));
    }

    #[test]
    fn every_reply_is_signed() {
        let p = policy();
        let samples = [
            facts(90.0, Location::Remote),
            facts(80.0, Location::OnSite),
            facts(66.0, Location::Hybrid),
            facts(20.0, Location::Unknown),
            ExtractedFacts::unknown(),
            ExtractedFacts::new(Rate::ResumeRequested, Location::Remote),
        ];
        for facts in samples {
            let text = p.render(&p.decide(&facts), &facts, &message(Some("Alex")));
            assert!(text.ends_with(&p.identity().signature()), "{text}");
        }
    }

    #[test]
    fn greeting_ignores_punctuation_only_names() {
        assert_eq!(greeting(&message(Some("\"Jane\" Doe"))), "Hi Jane,");
        assert_eq!(greeting(&message(Some("--"))), "Hi,");
        assert_eq!(greeting(&message(Some("   "))), "Hi,");
    }
}
