//! Mail channel: polls one IMAP account for unseen messages.
//!
//! Each monitored address gets its own channel named `mail:<address>`.
//! Messages are fetched with `BODY.PEEK[]` and marked `\Seen` only once
//! they are in hand, then de-duplicated by Message-ID, so every mail
//! reaches the rules once.

use std::collections::{HashSet, VecDeque};
use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::config::MailAccountConfig;
use crate::error::{ChannelError, ConfigError};

/// Prefix of every mail channel name.
pub const MAIL_CHANNEL_PREFIX: &str = "mail:";

/// Message-IDs remembered per channel for de-duplication.
const SEEN_CAPACITY: usize = 1024;

/// Resolved settings for one IMAP account.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub address: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
    pub poll_interval_secs: u64,
}

impl EmailConfig {
    /// Build from the account section, reading the password from the
    /// environment.
    pub fn from_account(account: &MailAccountConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            address: account.address.clone(),
            imap_host: account.imap_host.clone(),
            imap_port: account.imap_port,
            username: account.username().to_string(),
            password: account.password()?,
            mailbox: account.mailbox.clone(),
            poll_interval_secs: account.poll_interval_secs,
        })
    }
}

/// A message fetched from the server.
#[derive(Debug, Clone)]
pub struct FetchedEmail {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub timestamp: i64,
}

/// Inbound channel for one monitored mail account.
pub struct EmailChannel {
    name: String,
    config: EmailConfig,
    seen_messages: Arc<Mutex<SeenIds>>,
    shutdown: Arc<AtomicBool>,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            name: channel_name(&config.address),
            config,
            seen_messages: Arc::new(Mutex::new(SeenIds::with_capacity(SEEN_CAPACITY))),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Channel name for a monitored address.
pub fn channel_name(address: &str) -> String {
    format!("{MAIL_CHANNEL_PREFIX}{}", address.to_lowercase())
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let name = self.name.clone();
        let config = self.config.clone();
        let seen = Arc::clone(&self.seen_messages);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            tracing::info!(
                channel = %name,
                "Mail channel polling every {}s on {}",
                config.poll_interval_secs,
                config.imap_host
            );

            let mut tick = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));

            loop {
                tick.tick().await;

                if shutdown.load(Ordering::Relaxed) {
                    tracing::info!(channel = %name, "Mail poll loop shutting down");
                    return;
                }

                let cfg = config.clone();
                let messages = match tokio::task::spawn_blocking(move || fetch_unseen_imap(&cfg)).await {
                    Ok(Ok(messages)) => messages,
                    Ok(Err(e)) => {
                        tracing::error!(channel = %name, "Mail poll failed: {e}");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(channel = %name, "Mail poll task panicked: {e}");
                        continue;
                    }
                };

                for email in messages {
                    if !remember(&seen, &email.message_id) {
                        tracing::debug!(message_id = %email.message_id, "Skipping duplicate mail");
                        continue;
                    }
                    if tx.send(to_incoming(&name, email)).is_err() {
                        tracing::info!(channel = %name, "Mail listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        _response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::SendFailed {
            name: self.name.clone(),
            reason: "mail channels are receive-only".into(),
        })
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let cfg = self.config.clone();
        let ok = tokio::task::spawn_blocking(move || {
            TcpStream::connect((&*cfg.imap_host, cfg.imap_port)).is_ok()
        })
        .await
        .unwrap_or(false);

        if ok {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: self.name.clone(),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!(channel = %self.name, "Mail channel shutting down");
        self.shutdown.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Recently delivered Message-IDs, oldest evicted first.
#[derive(Debug)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn insert(&mut self, message_id: &str) -> bool {
        if self.ids.contains(message_id) {
            return false;
        }
        if self.order.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
        self.ids.insert(message_id.to_string());
        self.order.push_back(message_id.to_string());
        true
    }
}

/// Record a Message-ID; false if it was already seen.
fn remember(seen: &Mutex<SeenIds>, message_id: &str) -> bool {
    match seen.lock() {
        Ok(mut guard) => guard.insert(message_id),
        // A poisoned set only loses dedup history.
        Err(poisoned) => poisoned.into_inner().insert(message_id),
    }
}

/// Turn a fetched mail into an inbound event. The rules see the body only.
fn to_incoming(channel: &str, email: FetchedEmail) -> IncomingMessage {
    let received_at =
        chrono::DateTime::from_timestamp(email.timestamp, 0).unwrap_or_else(chrono::Utc::now);
    IncomingMessage::new(channel, &email.sender, &email.body)
        .with_user_name(&email.sender)
        .with_thread(&email.subject)
        .with_received_at(received_at)
        .with_metadata(serde_json::json!({
            "from": email.sender,
            "subject": email.subject,
            "message_id": email.message_id,
        }))
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Plain-text body; HTML is stripped when there is no text part.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.trim().to_string();
        }
    }
    String::new()
}

/// Parse a raw RFC 822 message.
pub fn parse_email(raw: &[u8]) -> Option<FetchedEmail> {
    let parsed = MessageParser::default().parse(raw)?;
    Some(FetchedEmail {
        message_id: parsed
            .message_id()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4())),
        sender: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        body: extract_text(&parsed),
        timestamp: parsed
            .date()
            .map(|d| d.to_timestamp())
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
    })
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Error type for IMAP fetch operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Quote a string for an IMAP command.
fn imap_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Numeric ids from `* SEARCH` lines.
fn parse_search_response(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(String::from))
        .collect()
}

/// One command round-trip. The fetch loop only needs this, so tests can
/// drive it with a scripted server.
trait ImapCommand {
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ImapError>;
}

/// Message bytes of a FETCH response: everything between the untagged
/// header line and the closing `)` / tagged status lines.
fn fetch_body(lines: &[String]) -> String {
    lines
        .iter()
        .skip(1)
        .take(lines.len().saturating_sub(3))
        .cloned()
        .collect()
}

struct ImapSession {
    tls: TlsStream,
    tag: u32,
}

impl ImapSession {
    fn connect(config: &EmailConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            tag: 0,
        };
        let _greeting = session.read_line()?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn command_ok(&mut self, cmd: &str, what: &str) -> Result<Vec<String>, ImapError> {
        let lines = self.command(cmd)?;
        if !is_tagged_ok(&lines) {
            return Err(format!("IMAP {what} failed").into());
        }
        Ok(lines)
    }
}

impl ImapCommand for ImapSession {
    /// Send a command and collect lines up to its tagged status line.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ImapError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        IoWrite::write_all(&mut self.tls, format!("{tag} {cmd}\r\n").as_bytes())?;
        IoWrite::flush(&mut self.tls)?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&format!("{tag} "));
            lines.push(line);
            if done {
                break;
            }
        }
        Ok(lines)
    }
}

fn is_tagged_ok(lines: &[String]) -> bool {
    lines.last().is_some_and(|l| l.contains(" OK"))
}

/// Fetch unseen mail and mark it seen (blocking, run in spawn_blocking).
/// Failures before the fetch loop are errors; failures inside it are not.
fn fetch_unseen_imap(config: &EmailConfig) -> Result<Vec<FetchedEmail>, ImapError> {
    let mut session = ImapSession::connect(config)?;

    session.command_ok(
        &format!(
            "LOGIN {} {}",
            imap_quote(&config.username),
            imap_quote(config.password.expose_secret())
        ),
        "login",
    )?;
    session.command_ok(&format!("SELECT {}", imap_quote(&config.mailbox)), "select")?;

    let ids = parse_search_response(&session.command_ok("SEARCH UNSEEN", "search")?);
    let results = fetch_messages(&mut session, &ids);

    let _ = session.command("LOGOUT");
    Ok(results)
}

/// Fetch each id without touching its flags, then mark it `\Seen`.
///
/// A FETCH that errors ends the pass with what was collected so far; the
/// ids not reached stay unseen for the next poll.
fn fetch_messages(session: &mut impl ImapCommand, ids: &[String]) -> Vec<FetchedEmail> {
    let mut results = Vec::new();

    for id in ids {
        let fetch_resp = match session.command(&format!("FETCH {id} BODY.PEEK[]")) {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(id = %id, "Fetch failed, leaving remaining mail unseen: {e}");
                break;
            }
        };
        if !is_tagged_ok(&fetch_resp) {
            tracing::warn!(id = %id, "Server refused fetch, leaving mail unseen");
            continue;
        }

        match parse_email(fetch_body(&fetch_resp).as_bytes()) {
            Some(email) => results.push(email),
            None => tracing::warn!(id = %id, "Could not parse fetched mail"),
        }

        if let Err(e) = session.command(&format!("STORE {id} +FLAGS (\\Seen)")) {
            tracing::warn!(id = %id, "Failed to mark mail as seen: {e}");
        }
    }

    results
}

#[cfg(test)]
#[path = "email_tests.rs"]
mod tests;
