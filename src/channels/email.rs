//! Email channel — IMAP fetch for inbound, SMTP via lettre for outbound.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::imap::{ImapError, ImapSession};
use crate::error::ChannelError;
use crate::pipeline::types::{InboundMessage, MailSink, MailSource, OutgoingReply};

/// Default look-back window for a triage pass.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 4;

/// Larger look-back values fall back to the default.
pub const MAX_LOOKBACK_DAYS: i64 = 365;

const CHANNEL: &str = "email";

// ── Configuration ───────────────────────────────────────────────────

/// Email channel configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Only messages received within this many days are fetched.
    pub lookback_days: i64,
    /// PDF attached to Accept, Counter and RequestResume replies.
    pub resume_path: Option<PathBuf>,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let imap_host = lookup("EMAIL_IMAP_HOST").filter(|h| !h.trim().is_empty())?;

        let imap_port: u16 = lookup("EMAIL_IMAP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            lookup("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = lookup("EMAIL_SMTP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = lookup("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(lookup("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = lookup("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());

        let lookback_days: i64 = lookup("EMAIL_LOOKBACK_DAYS")
            .and_then(|s| s.parse().ok())
            .filter(|d| (1..=MAX_LOOKBACK_DAYS).contains(d))
            .unwrap_or(DEFAULT_LOOKBACK_DAYS);

        let resume_path = lookup("EMAIL_RESUME_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            lookback_days,
            resume_path,
        })
    }
}

// ── Channel ─────────────────────────────────────────────────────────

/// Email channel — IMAP fetch (inbound) + SMTP (outbound).
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Read the resume for attaching. A missing file is logged, not fatal.
    async fn load_resume(&self) -> Option<(String, Vec<u8>)> {
        let path = self.config.resume_path.as_ref()?;
        match tokio::fs::read(path).await {
            Ok(bytes) => Some((attachment_name(path), bytes)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Resume not readable, sending without it");
                None
            }
        }
    }
}

#[async_trait]
impl MailSource for EmailChannel {
    async fn fetch_recent(&self) -> Result<Vec<InboundMessage>, ChannelError> {
        let cfg = self.config.clone();
        let now = Utc::now();

        let raw = tokio::task::spawn_blocking(move || fetch_since_imap(&cfg, now))
            .await
            .map_err(|e| ChannelError::FetchFailed {
                name: CHANNEL.into(),
                reason: format!("IMAP task panicked: {e}"),
            })?
            .map_err(|e| ChannelError::FetchFailed {
                name: CHANNEL.into(),
                reason: e.to_string(),
            })?;

        let parsed: Vec<InboundMessage> = raw.iter().filter_map(|r| parse_message(r)).collect();
        let messages = retain_window(parsed, now, self.config.lookback_days);

        info!(
            fetched = raw.len(),
            kept = messages.len(),
            "Fetched recent email"
        );
        Ok(messages)
    }
}

#[async_trait]
impl MailSink for EmailChannel {
    async fn send_reply(&self, reply: &OutgoingReply) -> Result<(), ChannelError> {
        let attachment = if reply.attach_resume() {
            self.load_resume().await
        } else {
            None
        };

        let email = build_email(&self.config.from_address, reply, attachment)?;
        let cfg = self.config.clone();

        tokio::task::spawn_blocking(move || send_smtp(&cfg, &email))
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL.into(),
                reason: format!("SMTP task panicked: {e}"),
            })??;

        info!(to = %reply.recipient(), "Email sent");
        Ok(())
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: CHANNEL.into(),
        reason,
    }
}

/// Build the reply, as multipart when a resume is attached.
fn build_email(
    from: &str,
    reply: &OutgoingReply,
    attachment: Option<(String, Vec<u8>)>,
) -> Result<Message, ChannelError> {
    let builder = Message::builder()
        .from(
            from.parse()
                .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
        )
        .to(reply
            .recipient()
            .parse()
            .map_err(|e| send_failed(format!("Invalid to address: {e}")))?)
        .subject(reply.subject());

    let built = match attachment {
        Some((name, bytes)) => {
            let pdf = ContentType::parse("application/pdf")
                .map_err(|e| send_failed(format!("Invalid content type: {e}")))?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(reply.body().to_string()))
                    .singlepart(Attachment::new(name).body(bytes, pdf)),
            )
        }
        None => builder.body(reply.body().to_string()),
    };

    built.map_err(|e| send_failed(format!("Failed to build email: {e}")))
}

/// Port 465 is implicit TLS; anything else negotiates STARTTLS.
fn send_smtp(config: &EmailConfig, email: &Message) -> Result<(), ChannelError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let builder = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    }
    .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?;

    let transport = builder
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    transport
        .send(email)
        .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
    Ok(())
}

fn attachment_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resume.pdf".to_string())
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Raw messages from INBOX received since the look-back cutoff.
fn fetch_since_imap(config: &EmailConfig, now: DateTime<Utc>) -> Result<Vec<Vec<u8>>, ImapError> {
    let since = (now - Duration::days(config.lookback_days)).date_naive();

    let mut session = ImapSession::connect(&config.imap_host, config.imap_port)?;
    session.login(&config.username, config.password.expose_secret())?;
    session.select("INBOX")?;

    let ids = session.search_since(since)?;
    debug!(count = ids.len(), since = %since, "IMAP search");

    let mut raw = Vec::with_capacity(ids.len());
    for id in ids {
        match session.fetch_raw(id) {
            Ok(Some(bytes)) => raw.push(bytes),
            Ok(None) => debug!(id, "FETCH returned no body"),
            Err(e) => warn!(id, error = %e, "Failed to fetch message"),
        }
    }

    session.logout();
    Ok(raw)
}

// ── Parsing (public for testing) ────────────────────────────────────

/// Parse one RFC 822 message. `None` if it has no usable sender or date.
pub fn parse_message(raw: &[u8]) -> Option<InboundMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = parsed.from().and_then(|addr| addr.first());
    let sender = from.and_then(|a| a.address())?.trim().to_string();
    if sender.is_empty() {
        return None;
    }
    let sender_name = from
        .and_then(|a| a.name())
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        strip_quoted_text(&text)
    } else if let Some(html) = parsed.body_html(0) {
        html.into_owned()
    } else {
        String::new()
    };

    // The skipped-set key is built from the date, so an undated message could never stay skipped.
    let Some(received_at) = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
    else {
        debug!(sender = %sender, subject = %subject, "Dropping message without a usable Date header");
        return None;
    };

    let id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    Some(InboundMessage {
        id,
        sender,
        sender_name,
        subject,
        body,
        received_at,
    })
}

/// Drop messages dated in the future or before the cutoff; newest first.
pub fn retain_window(
    mut messages: Vec<InboundMessage>,
    now: DateTime<Utc>,
    lookback_days: i64,
) -> Vec<InboundMessage> {
    let cutoff = now - Duration::days(lookback_days);
    messages.retain(|m| m.received_at <= now && m.received_at >= cutoff);
    messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
    messages
}

/// Strip quoted text from an email body.
///
/// Removes:
/// - Lines starting with `>` (quoted reply lines)
/// - Everything after an "On ... wrote:" attribution line
/// - Everything after an "Original Message" separator
///
/// Keeps rates we quoted in earlier replies out of extraction.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }
        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

// ── Tests ───────────────────────────────────────────────────────────
