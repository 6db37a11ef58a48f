//! Textual wire form used on the stream transport.
//!
//! One message per frame, CRLF terminated. Keywords are uppercase on send
//! and matched case-insensitively on receive (RFC 5234 rule names). The
//! content production runs to the end of the frame, so everything after the
//! `IS` keyword is kept verbatim apart from the single separating space.

use anyhow::anyhow;

use crate::protocol::message::{Message, MessageId};

pub const FRAME_DELIMITER: &[u8] = b"\r\n";

impl Message {
    /// Renders the frame for the stream transport, delimiter included.
    /// CONFIRM has no textual form and the client never sends REPLY, so
    /// both render empty.
    pub fn ser_tcp(&self) -> String {
        match self {
            Message::Confirm { .. } => String::new(),
            Message::Reply { ok, content, .. } => {
                let result = if *ok { "OK" } else { "NOK" };
                format!("REPLY {result} IS {content}\r\n")
            }
            Message::Auth { username, display_name, secret, .. } => {
                format!("AUTH {username} AS {display_name} USING {secret}\r\n")
            }
            Message::Join { channel_id, display_name, .. } => {
                format!("JOIN {channel_id} AS {display_name}\r\n")
            }
            Message::Msg { display_name, content, .. } => {
                format!("MSG FROM {display_name} IS {content}\r\n")
            }
            Message::Err { display_name, content, .. } => {
                format!("ERR FROM {display_name} IS {content}\r\n")
            }
            Message::Bye { .. } => "BYE\r\n".to_owned(),
        }
    }

    /// Parses one delimiter-stripped frame. Frame ids do not exist in the
    /// textual form; decoded messages carry id 0 and replies no ref id.
    pub fn try_deser_tcp(line: &str) -> anyhow::Result<Message> {
        let (keyword, rest) = next_token(line).ok_or_else(|| anyhow!("empty message"))?;

        if keyword.eq_ignore_ascii_case("REPLY") {
            let (result, rest) =
                next_token(rest).ok_or_else(|| anyhow!("Invalid REPLY message"))?;
            let ok = if result.eq_ignore_ascii_case("OK") {
                true
            } else if result.eq_ignore_ascii_case("NOK") {
                false
            } else {
                return Err(anyhow!("Unknown reply result"));
            };
            let content = content_after_is(rest).ok_or_else(|| anyhow!("Invalid REPLY message"))?;
            Ok(Message::Reply { id: MessageId::ZERO, ok, ref_id: None, content })
        } else if keyword.eq_ignore_ascii_case("MSG") {
            let (display_name, rest) =
                from_clause(rest).ok_or_else(|| anyhow!("Invalid MSG message"))?;
            let content = content_after_is(rest).ok_or_else(|| anyhow!("Invalid MSG message"))?;
            Ok(Message::Msg { id: MessageId::ZERO, display_name, content })
        } else if keyword.eq_ignore_ascii_case("ERR") {
            let (display_name, rest) =
                from_clause(rest).ok_or_else(|| anyhow!("Invalid ERR message"))?;
            let content = content_after_is(rest).ok_or_else(|| anyhow!("Invalid ERR message"))?;
            Ok(Message::Err { id: MessageId::ZERO, display_name, content })
        } else if keyword.eq_ignore_ascii_case("BYE") {
            Ok(Message::Bye { id: MessageId::ZERO })
        } else {
            Err(anyhow!("Unknown message type"))
        }
    }
}

/// Splits off the next space-separated token. The remainder keeps its
/// leading spaces so the content production can preserve them.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start_matches(' ');
    if s.is_empty() {
        return None;
    }
    match s.find(' ') {
        Some(idx) => Some((&s[..idx], &s[idx..])),
        None => Some((s, "")),
    }
}

/// `FROM <display_name>` clause shared by MSG and ERR.
fn from_clause(rest: &str) -> Option<(String, &str)> {
    let (from, rest) = next_token(rest)?;
    if !from.eq_ignore_ascii_case("FROM") {
        return None;
    }
    let (display_name, rest) = next_token(rest)?;
    Some((display_name.to_owned(), rest))
}

/// Matches the `IS` keyword and returns the rest of the frame with exactly
/// one separating space stripped.
fn content_after_is(rest: &str) -> Option<String> {
    let (is, rest) = next_token(rest)?;
    if !is.eq_ignore_ascii_case("IS") {
        return None;
    }
    Some(rest.strip_prefix(' ').unwrap_or(rest).to_owned())
}
