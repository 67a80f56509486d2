//! Configuration types.
//!
//! Everything the decision engine consults (thresholds, keyword lists, the
//! signature identity) lives in one immutable [`TriageConfig`] that is handed
//! to each component at construction.

use crate::error::ConfigError;

/// Hours in a working year (40 h/week × 52 weeks).
pub const DEFAULT_HOURS_PER_YEAR: f64 = 2080.0;

/// Top-level triage configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub thresholds: RateThresholds,
    pub keywords: KeywordLists,
    pub identity: Identity,
    /// Divisor used to turn a yearly salary into an hourly rate.
    pub hours_per_year: f64,
    /// Precedence between the heuristic classifier and the reasoning service.
    pub relevance: RelevanceArbitration,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            thresholds: RateThresholds::default(),
            keywords: KeywordLists::default(),
            identity: Identity::default(),
            hours_per_year: DEFAULT_HOURS_PER_YEAR,
            relevance: RelevanceArbitration::default(),
        }
    }
}

impl TriageConfig {
    /// Build from defaults, overriding thresholds and identity from the environment.
    ///
    /// Recognised variables:
    /// - `TRIAGE_ACCEPT_RATE`, `TRIAGE_MIN_ACCEPTABLE_RATE`, `TRIAGE_REJECT_BELOW_RATE`
    /// - `TRIAGE_HOURS_PER_YEAR`
    /// - `TRIAGE_SIGNATURE_NAME`, `TRIAGE_SIGNATURE_PHONE`, `TRIAGE_WORKING_HOURS`
    /// - `TRIAGE_RELEVANCE` (`heuristic_only` | `advisory` | `veto`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_f64("TRIAGE_ACCEPT_RATE")? {
            config.thresholds.accept = v;
        }
        if let Some(v) = env_f64("TRIAGE_MIN_ACCEPTABLE_RATE")? {
            config.thresholds.min_acceptable = v;
        }
        if let Some(v) = env_f64("TRIAGE_REJECT_BELOW_RATE")? {
            config.thresholds.reject_below = v;
        }
        if let Some(v) = env_f64("TRIAGE_HOURS_PER_YEAR")? {
            config.hours_per_year = v;
        }

        if let Ok(name) = std::env::var("TRIAGE_SIGNATURE_NAME") {
            config.identity.name = name;
        }
        if let Ok(phone) = std::env::var("TRIAGE_SIGNATURE_PHONE") {
            config.identity.phone = Some(phone).filter(|p| !p.trim().is_empty());
        }
        if let Ok(hours) = std::env::var("TRIAGE_WORKING_HOURS") {
            config.identity.working_hours = hours;
        }

        if let Ok(raw) = std::env::var("TRIAGE_RELEVANCE") {
            config.relevance = raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "TRIAGE_RELEVANCE".into(),
                message,
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        if !(self.hours_per_year > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "hours_per_year".into(),
                message: format!("must be positive, got {}", self.hours_per_year),
            });
        }
        Ok(())
    }
}

fn env_f64(key: &str) -> Result<Option<f64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Hourly-rate thresholds for the negotiation policy, in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateThresholds {
    /// At or above this rate the offer is accepted outright.
    pub accept: f64,
    /// Lowest rate worth proceeding at; counter-offers below `accept` aim here or above.
    pub min_acceptable: f64,
    /// Below this rate the offer is declined.
    pub reject_below: f64,
}

impl Default for RateThresholds {
    fn default() -> Self {
        Self {
            accept: 85.0,
            min_acceptable: 75.0,
            reject_below: 65.0,
        }
    }
}

impl RateThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reject_below <= self.min_acceptable && self.min_acceptable <= self.accept {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue {
                key: "thresholds".into(),
                message: format!(
                    "expected reject_below <= min_acceptable <= accept, got {} / {} / {}",
                    self.reject_below, self.min_acceptable, self.accept
                ),
            })
        }
    }
}

/// Who the replies are signed by.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub phone: Option<String>,
    /// Stated in Accept replies, e.g. "9am to 5pm Eastern".
    pub working_hours: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            name: "Candidate".into(),
            phone: None,
            working_hours: "9am to 5pm Eastern, Monday through Friday".into(),
        }
    }
}

impl Identity {
    /// Closing block appended to every rendered reply.
    pub fn signature(&self) -> String {
        match &self.phone {
            Some(phone) => format!("Best regards,\n{}\n{}", self.name, phone),
            None => format!("Best regards,\n{}", self.name),
        }
    }
}

/// How a reasoning-service relevance verdict combines with the heuristic score.
///
/// The heuristic always runs first; the service is only consulted for messages
/// the heuristic accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelevanceArbitration {
    /// Never ask the service.
    HeuristicOnly,
    /// Ask, log disagreements, keep the heuristic verdict.
    Advisory,
    /// The service may reject a message the heuristic accepted.
    #[default]
    Veto,
}

impl std::str::FromStr for RelevanceArbitration {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic_only" | "heuristic" => Ok(Self::HeuristicOnly),
            "advisory" => Ok(Self::Advisory),
            "veto" => Ok(Self::Veto),
            other => Err(format!("Unknown relevance arbitration: {}", other)),
        }
    }
}

/// Vocabulary driving the relevance classifier.
///
/// Plain-term lists are matched case-insensitively on word boundaries;
/// `marketing_local_parts` holds regexes tested against the sender's local part.
/// A `job_board_domains` entry containing a dot matches that domain and its
/// subdomains; an entry without one matches anywhere inside the sender domain.
#[derive(Debug, Clone)]
pub struct KeywordLists {
    pub strong_recruiter: Vec<String>,
    pub job_terms: Vec<String>,
    pub job_board_domains: Vec<String>,
    pub marketing_local_parts: Vec<String>,
    pub mass_mailers: Vec<String>,
    pub newsletter_phrases: Vec<String>,
    pub sales_phrases: Vec<String>,
    pub retail_terms: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordLists {
    fn default() -> Self {
        Self {
            strong_recruiter: owned(&[
                "recruiter",
                "recruiting",
                "talent acquisition",
                "hiring manager",
                "technical recruiter",
                "staffing",
                "your resume",
                "your background",
                "your profile",
            ]),
            job_terms: owned(&[
                "contract",
                "contract-to-hire",
                "rate",
                "interview",
                "position",
                "role",
                "opening",
                "opportunity",
                "w2",
                "c2c",
                "1099",
                "full-time",
                "engineer",
                "developer",
            ]),
            job_board_domains: owned(&[
                "linkedin.com",
                "indeed.com",
                "indeedemail.com",
                "ziprecruiter.com",
                "glassdoor.com",
                "monster.com",
                "careerbuilder.com",
                "dice.com",
                "simplyhired.com",
                "wellfound.com",
                "hired.com",
                "otta.com",
                "builtin.com",
                "jobboard",
                "jobalerts",
            ]),
            marketing_local_parts: owned(&[
                r"^no[\-_.]?reply",
                r"^do[\-_.]?not[\-_.]?reply",
                r"^sales$",
                r"^newsletters?$",
                r"^marketing",
                r"^news$",
                r"^promo",
                r"^offers?$",
                r"^deals?$",
                r"^notifications?$",
                r"^info$",
                r"^hello$",
            ]),
            mass_mailers: owned(&[
                "mailchimp",
                "list-manage.com",
                "sendgrid",
                "constant contact",
                "constantcontact",
                "hubspot",
                "klaviyo",
                "mailgun",
                "sendinblue",
                "brevo",
                "marketo",
            ]),
            newsletter_phrases: owned(&[
                "unsubscribe",
                "manage preferences",
                "manage your preferences",
                "email preferences",
                "digest",
                "job alert",
                "jobs you may be interested in",
                "privacy policy",
                "view in browser",
            ]),
            sales_phrases: owned(&[
                "book a call",
                "schedule a demo",
                "free estimate",
                "free quote",
                "demo",
                "promo",
                "limited time",
                "special offer",
            ]),
            retail_terms: owned(&[
                "solar",
                "panel",
                "panels",
                "inverter",
                "utility bill",
                "site survey",
                "roof",
                "tax credit",
            ]),
        }
    }
}
