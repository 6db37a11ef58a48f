//! Turns one line of user input into an outbound message or a local effect.
//!
//! The handler owns the display name (set by `/auth`, changed by `/rename`)
//! and the outbound id counter. Invalid input prints its own diagnostic and
//! produces nothing; the engine never sees it.

use tracing::debug;

use crate::protocol::message::{Message, MessageId};

pub struct InputHandler {
    next_id: MessageId,
    display_name: String,
}

impl Default for InputHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHandler {
    pub fn new() -> InputHandler {
        InputHandler {
            next_id: MessageId::ZERO,
            display_name: String::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Hands out the next outbound id. Also used by the engine for the
    /// farewell ERR/BYE it manufactures itself, keeping ids monotonic
    /// across both producers.
    pub fn take_next_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id = self.next_id.next();
        id
    }

    pub fn handle_line(&mut self, line: &str) -> Option<Message> {
        if line.is_empty() {
            return None;
        }

        let Some(command_line) = line.strip_prefix('/') else {
            // anything that is not a command is chat content
            if !is_valid_content(line) {
                eprintln!("ERR: Message content is not valid");
                return None;
            }
            return Some(Message::Msg {
                id: self.take_next_id(),
                display_name: self.display_name.clone(),
                content: line.to_owned(),
            });
        };

        let mut words = command_line.split_whitespace();
        let command = words.next().unwrap_or("");
        let args: Vec<&str> = words.collect();

        match (command, args.as_slice()) {
            ("help", _) => {
                println!("\nList of commands:");
                println!("\t/help - display this message");
                println!("\t/auth <username> <secret> <display_name> - authenticate");
                println!("\t/join <channelID> - join a channel");
                println!("\t/rename <new_display_name> - change display name");
                println!("\t/exit - exit the application");
                None
            }
            ("auth", [username, secret, display_name]) => {
                if !is_valid_id(username) {
                    eprintln!("ERR: Username is not valid");
                    return None;
                }
                if !is_valid_secret(secret) {
                    eprintln!("ERR: Secret is not valid");
                    return None;
                }
                if !is_valid_display_name(display_name) {
                    eprintln!("ERR: Display name is not valid");
                    return None;
                }
                self.display_name = (*display_name).to_owned();
                debug!(username, display_name, "authentication request ready");
                Some(Message::Auth {
                    id: self.take_next_id(),
                    username: (*username).to_owned(),
                    display_name: self.display_name.clone(),
                    secret: (*secret).to_owned(),
                })
            }
            ("join", [channel_id]) => {
                if !is_valid_id(channel_id) {
                    eprintln!("ERR: Channel ID is not valid");
                    return None;
                }
                Some(Message::Join {
                    id: self.take_next_id(),
                    channel_id: (*channel_id).to_owned(),
                    display_name: self.display_name.clone(),
                })
            }
            ("rename", [display_name]) => {
                if !is_valid_display_name(display_name) {
                    eprintln!("ERR: Display name is not valid");
                    return None;
                }
                self.display_name = (*display_name).to_owned();
                None
            }
            ("exit", []) => Some(Message::Bye { id: self.take_next_id() }),
            _ => {
                eprintln!("ERR: Unknown or malformed command");
                None
            }
        }
    }
}

/// `[A-Za-z0-9-]{1,20}`, shared by usernames and channel ids
fn is_valid_id(s: &str) -> bool {
    (1..=20).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// `[A-Za-z0-9-]{1,128}`
fn is_valid_secret(s: &str) -> bool {
    (1..=128).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// printable ASCII without space, 1 to 20 bytes
fn is_valid_display_name(s: &str) -> bool {
    (1..=20).contains(&s.len()) && s.bytes().all(|b| (0x21..=0x7E).contains(&b))
}

/// printable ASCII including space, 1 to 1400 bytes
fn is_valid_content(s: &str) -> bool {
    (1..=1400).contains(&s.len()) && s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}
