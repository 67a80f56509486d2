//! Triage pass — fetch, compose, review, deliver, persist.
//!
//! One pass over the recent inbox:
//! 1. `MailSource::fetch_recent()` — newest first
//! 2. Skip anything in `SkippedEmails`, or from a sender awaiting our reply
//! 3. `TriageProcessor::process()` → outcome
//! 4. Drafts go to the `ApprovalSurface`; only approved text reaches the `MailSink`
//! 5. Sets are saved right after each decision that changes them
//!
//! Messages are handled strictly one at a time.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{ChannelError, Error};
use crate::pipeline::processor::TriageProcessor;
use crate::pipeline::types::{
    ApprovalSurface, Draft, InboundMessage, MailSink, MailSource, OutgoingReply, TriageOutcome,
    Verdict,
};
use crate::store::{JsonStore, SentEmails, SkippedEmails};

/// Counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub fetched: usize,
    pub already_skipped: usize,
    pub awaiting_reply: usize,
    pub irrelevant: usize,
    pub not_related: usize,
    pub sent: usize,
    pub send_failures: usize,
    pub skipped_permanently: usize,
    pub skipped_temporarily: usize,
}

/// Collaborators borrowed for the duration of one pass.
pub struct TriagePass<'a> {
    pub processor: &'a TriageProcessor,
    pub source: &'a dyn MailSource,
    pub sink: &'a dyn MailSink,
    pub approval: &'a mut dyn ApprovalSurface,
    pub store: &'a JsonStore,
}

/// Run a single pass to completion.
///
/// Fetch and persistence failures end the pass with an error. A failed send
/// is logged and counted; the pass moves on. If the approval input closes,
/// the pass stops early and returns what it has.
pub async fn run_triage_pass(pass: TriagePass<'_>) -> Result<PassSummary, Error> {
    let TriagePass {
        processor,
        source,
        sink,
        approval,
        store,
    } = pass;

    let mut skipped = SkippedEmails::load(store).await?;
    let mut sent = SentEmails::load(store).await?;

    let messages = source.fetch_recent().await?;
    let mut summary = PassSummary {
        fetched: messages.len(),
        ..PassSummary::default()
    };
    info!(count = messages.len(), "Starting triage pass");

    for message in &messages {
        let key = message.key();

        if skipped.contains(&key) {
            debug!(key = %key, "Previously skipped");
            summary.already_skipped += 1;
            continue;
        }

        if sent.awaiting_reply(&message.sender, message.received_at) {
            info!(
                sender = %message.sender,
                subject = %message.subject,
                "Already replied, awaiting recruiter response"
            );
            summary.awaiting_reply += 1;
            continue;
        }

        match processor.process(message).await {
            TriageOutcome::Irrelevant { .. } => {
                summary.irrelevant += 1;
            }
            TriageOutcome::NotRelated { .. } => {
                info!(key = %key, "Not related, skipping permanently");
                skipped.insert(key);
                skipped.save(store).await?;
                summary.not_related += 1;
            }
            TriageOutcome::Drafted { draft, .. } => {
                let verdict = match approval.review(message, &draft).await {
                    Ok(verdict) => verdict,
                    Err(ChannelError::InputClosed) => {
                        warn!("Approval input closed, ending pass early");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                };

                handle_verdict(
                    verdict, message, &draft, sink, store, &mut skipped, &mut sent,
                    &mut summary,
                )
                .await?;
            }
        }
    }

    info!(?summary, "Triage pass complete");
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
async fn handle_verdict(
    verdict: Verdict,
    message: &InboundMessage,
    draft: &Draft,
    sink: &dyn MailSink,
    store: &JsonStore,
    skipped: &mut SkippedEmails,
    sent: &mut SentEmails,
    summary: &mut PassSummary,
) -> Result<(), Error> {
    let reply = match verdict {
        Verdict::Send => OutgoingReply::from_draft(message, draft),
        Verdict::SendEdited(body) => match OutgoingReply::edited(message, draft, &body) {
            Some(reply) => reply,
            None => {
                info!(sender = %message.sender, "Edited reply was empty, skipping for now");
                summary.skipped_temporarily += 1;
                return Ok(());
            }
        },
        Verdict::SkipPermanently => {
            info!(key = %message.key(), "Skipped permanently");
            skipped.insert(message.key());
            skipped.save(store).await?;
            summary.skipped_permanently += 1;
            return Ok(());
        }
        Verdict::SkipTemporarily => {
            debug!(key = %message.key(), "Skipped for now");
            summary.skipped_temporarily += 1;
            return Ok(());
        }
    };

    match sink.send_reply(&reply).await {
        Ok(()) => {
            info!(
                to = %reply.recipient(),
                subject = %reply.subject(),
                resume = reply.attach_resume(),
                "Reply sent"
            );
            sent.record(&message.sender, Utc::now());
            sent.save(store).await?;
            summary.sent += 1;
        }
        Err(e) => {
            error!(to = %reply.recipient(), error = %e, "Failed to send reply");
            summary.send_failures += 1;
        }
    }
    Ok(())
}
