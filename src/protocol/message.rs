use std::fmt::{Display, Formatter};

use anyhow::anyhow;
use bytes::BufMut;
use bytes_varint::try_get_fixed::TryGetFixedSupport;

/// Session-unique identifier carried by every outbound message and echoed
/// back by the server in confirmations and replies.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct MessageId(u16);

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl MessageId {
    pub const ZERO: MessageId = MessageId(0);

    pub fn from_raw(value: u16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    pub fn next(&self) -> MessageId {
        MessageId(self.0.wrapping_add(1))
    }
}

/// Wire tags of the protocol message set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Confirm = 0x00,
    Reply = 0x01,
    Auth = 0x02,
    Join = 0x03,
    Msg = 0x04,
    Err = 0xFE,
    Bye = 0xFF,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<MessageType> {
        match tag {
            0x00 => Some(MessageType::Confirm),
            0x01 => Some(MessageType::Reply),
            0x02 => Some(MessageType::Auth),
            0x03 => Some(MessageType::Join),
            0x04 => Some(MessageType::Msg),
            0xFE => Some(MessageType::Err),
            0xFF => Some(MessageType::Bye),
            _ => None,
        }
    }
}

/// One protocol message. The same model serializes to both wire forms: the
/// datagram binary layout ([`Message::ser_udp`]) and the textual stream
/// grammar (`ser_tcp` in the text module).
///
/// `Reply.ref_id` is present when decoded from a datagram; the textual
/// grammar carries no reference id, so stream replies leave it `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Confirm {
        ref_id: MessageId,
    },
    Reply {
        id: MessageId,
        ok: bool,
        ref_id: Option<MessageId>,
        content: String,
    },
    Auth {
        id: MessageId,
        username: String,
        display_name: String,
        secret: String,
    },
    Join {
        id: MessageId,
        channel_id: String,
        display_name: String,
    },
    Msg {
        id: MessageId,
        display_name: String,
        content: String,
    },
    Err {
        id: MessageId,
        display_name: String,
        content: String,
    },
    Bye {
        id: MessageId,
    },
}

impl Message {
    /// The id this message occupies on the wire. For a confirmation that is
    /// the id of the message being confirmed.
    pub fn id(&self) -> MessageId {
        match self {
            Message::Confirm { ref_id } => *ref_id,
            Message::Reply { id, .. } => *id,
            Message::Auth { id, .. } => *id,
            Message::Join { id, .. } => *id,
            Message::Msg { id, .. } => *id,
            Message::Err { id, .. } => *id,
            Message::Bye { id } => *id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Confirm { .. } => MessageType::Confirm,
            Message::Reply { .. } => MessageType::Reply,
            Message::Auth { .. } => MessageType::Auth,
            Message::Join { .. } => MessageType::Join,
            Message::Msg { .. } => MessageType::Msg,
            Message::Err { .. } => MessageType::Err,
            Message::Bye { .. } => MessageType::Bye,
        }
    }

    /// Datagram layout: tag byte, 16-bit id in network byte order, then the
    /// variant's strings as zero-terminated ASCII. REPLY carries a result
    /// byte and the referenced id between the header and the content.
    pub fn ser_udp(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.message_type().tag());
        buf.put_u16(self.id().to_raw());

        match self {
            Message::Confirm { .. } | Message::Bye { .. } => {}
            Message::Reply { ok, ref_id, content, .. } => {
                buf.put_u8(if *ok { 0x01 } else { 0x00 });
                buf.put_u16(ref_id.map(|r| r.to_raw()).unwrap_or(0));
                put_string(content, buf);
            }
            Message::Auth { username, display_name, secret, .. } => {
                put_string(username, buf);
                put_string(display_name, buf);
                put_string(secret, buf);
            }
            Message::Join { channel_id, display_name, .. } => {
                put_string(channel_id, buf);
                put_string(display_name, buf);
            }
            Message::Msg { display_name, content, .. }
            | Message::Err { display_name, content, .. } => {
                put_string(display_name, buf);
                put_string(content, buf);
            }
        }
    }

    pub fn try_deser_udp(mut data: &[u8]) -> anyhow::Result<Message> {
        let buf = &mut data;
        let tag = buf.try_get_u8()?;
        let id = MessageId::from_raw(buf.try_get_u16()?);

        let message_type = MessageType::from_tag(tag)
            .ok_or_else(|| anyhow!("unknown message type {:#04x}", tag))?;

        match message_type {
            MessageType::Confirm => Ok(Message::Confirm { ref_id: id }),
            MessageType::Reply => {
                let ok = match buf.try_get_u8()? {
                    0x00 => false,
                    0x01 => true,
                    other => return Err(anyhow!("unknown reply result {:#04x}", other)),
                };
                let ref_id = MessageId::from_raw(buf.try_get_u16()?);
                let content = take_string(buf)?;
                Ok(Message::Reply { id, ok, ref_id: Some(ref_id), content })
            }
            MessageType::Auth => {
                let username = take_string(buf)?;
                let display_name = take_string(buf)?;
                let secret = take_string(buf)?;
                Ok(Message::Auth { id, username, display_name, secret })
            }
            MessageType::Join => {
                let channel_id = take_string(buf)?;
                let display_name = take_string(buf)?;
                Ok(Message::Join { id, channel_id, display_name })
            }
            MessageType::Msg => {
                let display_name = take_string(buf)?;
                let content = take_string(buf)?;
                Ok(Message::Msg { id, display_name, content })
            }
            MessageType::Err => {
                let display_name = take_string(buf)?;
                let content = take_string(buf)?;
                Ok(Message::Err { id, display_name, content })
            }
            MessageType::Bye => Ok(Message::Bye { id }),
        }
    }

    /// Tag and id of a datagram without decoding the payload; used for
    /// confirmation matching and duplicate tracking. `None` for runts.
    pub fn peek_udp_header(data: &[u8]) -> Option<(u8, MessageId)> {
        if data.len() < 3 {
            return None;
        }
        Some((data[0], MessageId::from_raw(u16::from_be_bytes([data[1], data[2]]))))
    }
}

fn put_string(s: &str, buf: &mut impl BufMut) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0x00);
}

fn take_string(buf: &mut &[u8]) -> anyhow::Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0x00)
        .ok_or_else(|| anyhow!("string without zero terminator"))?;
    let s = std::str::from_utf8(&buf[..end])?.to_owned();
    *buf = &buf[end + 1..];
    Ok(s)
}
