//! CLI approval surface — shows each draft on stdout and reads a verdict from stdin.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use crate::error::ChannelError;
use crate::pipeline::normalize::normalize;
use crate::pipeline::types::{ApprovalSurface, Draft, InboundMessage, Verdict};

const RULE: &str = "────────────────────────────────────────────────────────";
const PREVIEW_CHARS: usize = 300;

/// Interactive reviewer over any line reader and writer.
///
/// `Y` sends, `N` skips permanently, `S` skips for this pass, `M` opens a
/// multi-line edit terminated by a lone `.`. Anything else is treated as `S`.
pub struct CliApproval<R, W> {
    lines: Lines<R>,
    out: W,
}

impl CliApproval<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Reviewer bound to the process terminal.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> CliApproval<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, out: W) -> Self {
        Self {
            lines: reader.lines(),
            out,
        }
    }

    /// Consume the reviewer, returning the writer (for inspecting output).
    pub fn into_writer(self) -> W {
        self.out
    }

    async fn write(&mut self, text: &str) -> Result<(), ChannelError> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, ChannelError> {
        self.lines
            .next_line()
            .await?
            .ok_or(ChannelError::InputClosed)
    }

    async fn read_edit(&mut self) -> Result<String, ChannelError> {
        self.write("Enter the reply. Finish with a line containing only '.':\n")
            .await?;
        let mut body = Vec::new();
        loop {
            let line = self.next_line().await?;
            if line.trim_end() == "." {
                break;
            }
            body.push(line);
        }
        Ok(body.join("\n"))
    }
}

/// Block shown to the reviewer for one draft.
pub fn render_review(message: &InboundMessage, draft: &Draft) -> String {
    let from = match &message.sender_name {
        Some(name) => format!("{} <{}>", name, message.sender),
        None => message.sender.clone(),
    };
    format!(
        "\n{rule}\nFrom:     {from}\nSubject:  {subject}\nReceived: {received}\n\
         Preview:  {preview}\n\
         Rate:     {rate}\nLocation: {location}\nDecision: {decision}\n{rule}\n{body}\n{rule}\n",
        rule = RULE,
        from = from,
        subject = message.subject,
        received = message.received_at.format("%Y-%m-%d %H:%M UTC"),
        preview = preview(&message.body),
        rate = draft.facts().rate(),
        location = draft.facts().location(),
        decision = draft.decision().label(),
        body = draft.body(),
    )
}

/// First few hundred characters of the message, markup stripped.
fn preview(body: &str) -> String {
    let text = normalize(Some(body));
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text,
    }
}

/// Map a single-key answer onto a verdict. `None` means "edit".
fn parse_choice(answer: &str) -> Option<Verdict> {
    match answer.trim().to_ascii_uppercase().as_str() {
        "Y" => Some(Verdict::Send),
        "N" => Some(Verdict::SkipPermanently),
        "M" => None,
        _ => Some(Verdict::SkipTemporarily),
    }
}

#[async_trait]
impl<R, W> ApprovalSurface for CliApproval<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn review(
        &mut self,
        message: &InboundMessage,
        draft: &Draft,
    ) -> Result<Verdict, ChannelError> {
        self.write(&render_review(message, draft)).await?;
        self.write("Send? [Y]es / [N]o, never / [S]kip for now / [M]odify: ")
            .await?;

        let answer = self.next_line().await?;
        match parse_choice(&answer) {
            Some(verdict) => Ok(verdict),
            None => Ok(Verdict::SendEdited(self.read_edit().await?)),
        }
    }
}
