//! Text wire protocol shared by the server and the interactive client.
//!
//! Every connection opens with a handshake `ROLE:TOPIC`. Publishers then send
//! `TOPIC:CONTENT` payloads, and subscribers receive
//! `[PUBLISHED - TOPIC] CONTENT` lines. Either side may send `terminate` to
//! announce its own disconnect.

use std::{collections::VecDeque, fmt, io, str::FromStr};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound of a single read, and of a line held back without a newline.
pub const CHUNK_SIZE: usize = 1024;

/// Keyword a client sends to end its own session. Compared case-insensitively.
pub const TERMINATE_KEYWORD: &str = "terminate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Publisher => "PUBLISHER",
            Role::Subscriber => "SUBSCRIBER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HandshakeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(Role::Publisher.as_str()) {
            Ok(Role::Publisher)
        } else if trimmed.eq_ignore_ascii_case(Role::Subscriber.as_str()) {
            Ok(Role::Subscriber)
        } else {
            Err(HandshakeError::InvalidRole(trimmed.to_string()))
        }
    }
}

/// An upper-cased, non-empty topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Normalizes `raw`, returning `None` when nothing is left after trimming.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_uppercase()))
    }

    /// Upper-cases `raw` without trimming it, as publisher payloads address
    /// topics verbatim.
    pub fn case_folded(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        Some(Self(raw.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake '{0}' is missing the ROLE:TOPIC separator")]
    MissingSeparator(String),
    #[error("role '{0}' must be PUBLISHER or SUBSCRIBER")]
    InvalidRole(String),
    #[error("topic cannot be empty")]
    EmptyTopic,
    #[error("connection closed before handshake")]
    ConnectionClosed,
}

/// The first message of every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub role: Role,
    pub topic: Topic,
}

impl Handshake {
    pub fn new(role: Role, topic: Topic) -> Self {
        Self { role, topic }
    }

    /// Parses `ROLE:TOPIC`, splitting on the first colon only.
    pub fn parse(message: &str) -> Result<Self, HandshakeError> {
        let message = message.trim();
        let (role, topic) = message
            .split_once(':')
            .ok_or_else(|| HandshakeError::MissingSeparator(message.to_string()))?;
        let role = role.parse::<Role>()?;
        let topic = Topic::new(topic).ok_or(HandshakeError::EmptyTopic)?;
        Ok(Self { role, topic })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.role, self.topic)
    }
}

/// A publisher payload addressed to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: Topic,
    pub content: String,
}

impl Publication {
    /// Parses `TOPIC:CONTENT`. Returns `None` for payloads that cannot be routed.
    ///
    /// Only leading whitespace of the whole payload is dropped; the topic part
    /// is case-folded but not trimmed, so `NEWS :x` targets `"NEWS "`.
    pub fn parse(message: &str) -> Option<Self> {
        let (topic, content) = message.trim_start().split_once(':')?;
        Some(Self {
            topic: Topic::case_folded(topic)?,
            content: content.to_string(),
        })
    }

    /// Wire form delivered to subscribers, newline included.
    pub fn delivery_line(&self) -> String {
        format!("[PUBLISHED - {}] {}\n", self.topic, self.content)
    }
}

pub fn is_terminate(message: &str) -> bool {
    message.trim().eq_ignore_ascii_case(TERMINATE_KEYWORD)
}

/// Reads logical messages from a byte stream in bounded chunks.
///
/// Lines are split on `\n`, and bytes after the last newline of a read are
/// held back until the rest of the line arrives, so a line straddling two
/// reads comes out whole. A read with no newline and nothing held back is a
/// single message, so peers that send one bare write per message keep
/// working. A held-back line that grows past `CHUNK_SIZE` without a newline
/// is emitted as is.
pub struct MessageReader<R> {
    inner: R,
    pending: VecDeque<String>,
    partial: Vec<u8>,
    buf: Box<[u8; CHUNK_SIZE]>,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
            partial: Vec::new(),
            buf: Box::new([0; CHUNK_SIZE]),
        }
    }

    /// Returns the next message, or `None` once the peer has closed its side.
    ///
    /// Cancel safe: the only await point is a single `read`.
    pub async fn next_message(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }

            let read = self.inner.read(&mut self.buf[..]).await?;
            if read == 0 {
                let tail = std::mem::take(&mut self.partial);
                push_message(&mut self.pending, &tail);
                return Ok(self.pending.pop_front());
            }

            self.absorb(read);
        }
    }

    fn absorb(&mut self, read: usize) {
        let chunk = &self.buf[..read];
        if self.partial.is_empty() && !chunk.contains(&b'\n') {
            push_message(&mut self.pending, chunk);
            return;
        }

        self.partial.extend_from_slice(chunk);
        let Some(last_newline) = self.partial.iter().rposition(|byte| *byte == b'\n') else {
            if self.partial.len() >= CHUNK_SIZE {
                let oversized = std::mem::take(&mut self.partial);
                push_message(&mut self.pending, &oversized);
            }
            return;
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        for line in complete.split(|byte| *byte == b'\n') {
            push_message(&mut self.pending, line);
        }
    }
}

/// Decodes one complete line; blank lines are skipped.
fn push_message(pending: &mut VecDeque<String>, line: &[u8]) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches('\r');
    if !text.trim().is_empty() {
        pending.push_back(text.to_string());
    }
}

/// Writes one newline-terminated message and flushes it.
pub async fn write_line<W>(writer: &mut W, message: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One write per message keeps chunk-per-message peers working.
    let mut encoded = message.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_normalizes_role_and_topic() {
        let handshake = Handshake::parse("subscriber:news \r\n").expect("valid handshake");
        assert_eq!(handshake.role, Role::Subscriber);
        assert_eq!(handshake.topic.as_str(), "NEWS");
        assert_eq!(handshake.encode(), "SUBSCRIBER:NEWS");
    }

    #[test]
    fn handshake_splits_on_first_colon_only() {
        let handshake = Handshake::parse("PUBLISHER:a:b").expect("valid handshake");
        assert_eq!(handshake.topic.as_str(), "A:B");
    }

    #[test]
    fn handshake_rejects_malformed_input() {
        assert!(matches!(
            Handshake::parse("PUBLISHER"),
            Err(HandshakeError::MissingSeparator(_))
        ));
        assert_eq!(
            Handshake::parse("LURKER:NEWS"),
            Err(HandshakeError::InvalidRole("LURKER".into()))
        );
        assert_eq!(
            Handshake::parse("SUBSCRIBER:   "),
            Err(HandshakeError::EmptyTopic)
        );
    }

    #[test]
    fn publication_keeps_content_verbatim() {
        let publication = Publication::parse("news: hello: world").expect("routable");
        assert_eq!(publication.topic.as_str(), "NEWS");
        assert_eq!(publication.content, " hello: world");
        assert_eq!(
            publication.delivery_line(),
            "[PUBLISHED - NEWS]  hello: world\n"
        );
    }

    #[test]
    fn publication_without_topic_is_dropped() {
        assert_eq!(Publication::parse("oops"), None);
        assert_eq!(Publication::parse(" :content"), None);
    }

    #[test]
    fn publication_topic_is_not_trimmed() {
        let publication = Publication::parse("news :x").expect("routable");
        assert_eq!(publication.topic.as_str(), "NEWS ");
        assert_ne!(publication.topic, Topic::new("NEWS").expect("topic"));
    }

    #[test]
    fn terminate_is_case_insensitive() {
        assert!(is_terminate("TERMINATE"));
        assert!(is_terminate("  Terminate \r"));
        assert!(!is_terminate("NEWS:terminate"));
    }

    #[tokio::test]
    async fn reader_splits_coalesced_lines() {
        let (mut writer, reader) = tokio::io::duplex(CHUNK_SIZE);
        let mut reader = MessageReader::new(reader);

        writer
            .write_all(b"PUBLISHER:NEWS\r\n\nNEWS:hello\n")
            .await
            .expect("write chunk");
        drop(writer);

        let first = reader.next_message().await.expect("read first");
        let second = reader.next_message().await.expect("read second");
        let end = reader.next_message().await.expect("read eof");

        assert_eq!(first.as_deref(), Some("PUBLISHER:NEWS"));
        assert_eq!(second.as_deref(), Some("NEWS:hello"));
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn reader_treats_unterminated_chunk_as_one_message() {
        let (mut writer, reader) = tokio::io::duplex(CHUNK_SIZE);
        let mut reader = MessageReader::new(reader);

        write_line(&mut writer, "SUBSCRIBER:SPORTS")
            .await
            .expect("write line");
        let handshake = reader.next_message().await.expect("read line");
        assert_eq!(handshake.as_deref(), Some("SUBSCRIBER:SPORTS"));

        writer.write_all(b"terminate").await.expect("write raw");
        let raw = reader.next_message().await.expect("read raw");
        assert_eq!(raw.as_deref(), Some("terminate"));
    }

    #[tokio::test]
    async fn reader_keeps_lines_that_straddle_reads() {
        let lines: Vec<String> = (0..100).map(|n| format!("NEWS:message {n:03}abc")).collect();
        let mut batch = lines.join("\n");
        batch.push('\n');
        assert!(batch.len() > 2 * CHUNK_SIZE);

        let (mut writer, reader) = tokio::io::duplex(4 * CHUNK_SIZE);
        let mut reader = MessageReader::new(reader);
        writer.write_all(batch.as_bytes()).await.expect("write batch");
        drop(writer);

        let mut received = Vec::new();
        while let Some(message) = reader.next_message().await.expect("read") {
            received.push(message);
        }
        assert_eq!(received, lines);
    }

    #[tokio::test]
    async fn reader_decodes_characters_split_across_reads() {
        let (mut writer, reader) = tokio::io::duplex(4 * CHUNK_SIZE);
        let mut reader = MessageReader::new(reader);

        // The two bytes of 'é' land on either side of the first read.
        let filler = "x".repeat(CHUNK_SIZE - 2);
        writer
            .write_all(format!("{filler}\nécho\n").as_bytes())
            .await
            .expect("write");

        let first = reader.next_message().await.expect("read filler");
        let second = reader.next_message().await.expect("read accented");
        assert_eq!(first.as_deref(), Some(filler.as_str()));
        assert_eq!(second.as_deref(), Some("écho"));
    }

    #[tokio::test]
    async fn reader_joins_keyword_split_across_writes() {
        let (mut writer, reader) = tokio::io::duplex(CHUNK_SIZE);
        let mut reader = MessageReader::new(reader);

        writer.write_all(b"NEWS:a\nterm").await.expect("write head");
        let first = reader.next_message().await.expect("read first");
        assert_eq!(first.as_deref(), Some("NEWS:a"));

        writer.write_all(b"inate\n").await.expect("write tail");
        let second = reader.next_message().await.expect("read keyword");
        assert_eq!(second.as_deref(), Some("terminate"));
    }

    #[tokio::test]
    async fn reader_flushes_unterminated_tail_at_eof() {
        let (mut writer, reader) = tokio::io::duplex(CHUNK_SIZE);
        let mut reader = MessageReader::new(reader);

        writer.write_all(b"NEWS:a\nterminate").await.expect("write");
        drop(writer);

        assert_eq!(reader.next_message().await.expect("read").as_deref(), Some("NEWS:a"));
        assert_eq!(reader.next_message().await.expect("read").as_deref(), Some("terminate"));
        assert_eq!(reader.next_message().await.expect("read"), None);
    }
}
