//! Minimal raw IMAP client over rustls. Blocking; call it from spawn_blocking.
//!
//! Only what a triage pass needs: LOGIN, SELECT, SEARCH SINCE, FETCH
//! BODY.PEEK[] (so nothing is marked seen), LOGOUT.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rustls_pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

/// Error type for IMAP operations.
pub type ImapError = Box<dyn std::error::Error + Send + Sync>;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// One command's untagged lines, literals, and the tagged status line.
#[derive(Debug, Default)]
pub struct ImapResponse {
    pub lines: Vec<String>,
    pub literals: Vec<Vec<u8>>,
    pub status: String,
}

impl ImapResponse {
    pub fn is_ok(&self) -> bool {
        self.status
            .split_whitespace()
            .nth(1)
            .is_some_and(|s| s.eq_ignore_ascii_case("OK"))
    }
}

pub struct ImapSession {
    tls: StreamOwned<ClientConnection, TcpStream>,
    next_tag: u32,
}

impl ImapSession {
    /// Connect, verify the server certificate, and read the greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(host.to_string())?;
        let conn = ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: StreamOwned::new(conn, tcp),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(format!("unexpected IMAP greeting: {}", greeting.trim()).into());
        }
        Ok(session)
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), ImapError> {
        let resp = self.command(&format!(
            "LOGIN {} {}",
            quote(username),
            quote(password)
        ))?;
        if !resp.is_ok() {
            return Err("IMAP login failed".into());
        }
        Ok(())
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), ImapError> {
        let resp = self.command(&format!("SELECT {}", quote(mailbox)))?;
        if !resp.is_ok() {
            return Err(format!("IMAP SELECT {} failed: {}", mailbox, resp.status.trim()).into());
        }
        Ok(())
    }

    /// Sequence numbers of messages with an internal date on or after `since`.
    pub fn search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>, ImapError> {
        let resp = self.command(&format!("SEARCH SINCE {}", since.format("%d-%b-%Y")))?;
        if !resp.is_ok() {
            return Err(format!("IMAP SEARCH failed: {}", resp.status.trim()).into());
        }
        Ok(parse_search(&resp.lines))
    }

    /// Raw RFC 822 bytes of one message, without setting `\Seen`.
    pub fn fetch_raw(&mut self, seq: u32) -> Result<Option<Vec<u8>>, ImapError> {
        let resp = self.command(&format!("FETCH {} BODY.PEEK[]", seq))?;
        if !resp.is_ok() {
            return Err(format!("IMAP FETCH {} failed: {}", seq, resp.status.trim()).into());
        }
        Ok(resp.literals.into_iter().next())
    }

    pub fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }

    fn command(&mut self, cmd: &str) -> Result<ImapResponse, ImapError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.tls.write_all(format!("{} {}\r\n", tag, cmd).as_bytes())?;
        self.tls.flush()?;

        let mut resp = ImapResponse::default();
        loop {
            let line = self.read_line()?;
            if line.starts_with(&format!("{} ", tag)) {
                resp.status = line;
                return Ok(resp);
            }
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.tls.read_exact(&mut literal)?;
                resp.literals.push(literal);
            }
            resp.lines.push(line);
        }
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.tls.read(&mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `{123}` at the end of a line announces a literal of that many bytes.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let open = trimmed.rfind('{')?;
    trimmed.strip_suffix('}')?[open + 1..].parse().ok()
}

fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter(|l| l.starts_with("* SEARCH"))
        .flat_map(|l| l.split_whitespace().skip(2))
        .filter_map(|n| n.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_length_detection() {
        assert_eq!(literal_len("* 1 FETCH (BODY[] {2048}\r\n"), Some(2048));
        assert_eq!(literal_len("* 1 FETCH (FLAGS (\\Seen))\r\n"), None);
        assert_eq!(literal_len("* OK {abc}\r\n"), None);
    }

    #[test]
    fn search_results() {
        let lines = vec![
            "* SEARCH 3 7 12\r\n".to_string(),
            "* 14 EXISTS\r\n".to_string(),
        ];
        assert_eq!(parse_search(&lines), vec![3, 7, 12]);
        assert!(parse_search(&["* SEARCH\r\n".to_string()]).is_empty());
    }

    #[test]
    fn quoting_escapes() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn tagged_status() {
        let ok = ImapResponse {
            status: "A3 OK SEARCH completed\r\n".into(),
            ..ImapResponse::default()
        };
        let no = ImapResponse {
            status: "A1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n".into(),
            ..ImapResponse::default()
        };
        assert!(ok.is_ok());
        assert!(!no.is_ok());
    }
}
