//! The protocol engine: queues, FSM, dispatcher and the event loop.
//!
//! A session is single threaded. Concurrency is readiness multiplexing over
//! stdin and the transport socket; the queues are plain `VecDeque`s touched
//! from one task only. Errors never unwind across the loop: every failure
//! sets the FSM state and the loop exits on its next check.

pub mod input;
pub mod state;

use std::collections::VecDeque;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, trace, warn};

use crate::client::input::InputHandler;
use crate::client::state::ClientState;
use crate::config::ClientConfig;
use crate::protocol::message::{Message, MessageType};
use crate::transport::{RawFrame, RecvOutcome, Transport};

pub struct Client {
    transport: Transport,
    state: ClientState,
    input: InputHandler,
    outbound: VecDeque<Message>,
    inbound: VecDeque<RawFrame>,
    /// an AUTH or JOIN is in flight; it stays at the head of the outbound
    /// queue until its REPLY is matched against it
    waiting_on_reply: bool,
    authenticated: bool,
    /// the server sent ERR; the loop exits and shutdown answers with BYE
    err_received: bool,
    error_msg: String,
}

enum LoopEvent {
    Line(Option<String>),
    Net(anyhow::Result<RecvOutcome>),
    Interrupt,
    SignalDead,
}

impl Client {
    pub async fn connect(config: &ClientConfig) -> anyhow::Result<Client> {
        let transport = Transport::connect(config).await?;
        Ok(Client {
            transport,
            state: ClientState::Start,
            input: InputHandler::new(),
            outbound: VecDeque::new(),
            inbound: VecDeque::new(),
            waiting_on_reply: false,
            authenticated: false,
            err_received: false,
            error_msg: String::new(),
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Runs the session until a terminal state, a server ERR or an
    /// interrupt, then performs the shutdown sequence. Returns whether the
    /// session ended cleanly; `false` maps to a failure exit code.
    pub async fn run(&mut self, input: impl AsyncBufRead + Unpin) -> bool {
        let mut lines = input.lines();
        let mut stdin_open = true;
        let mut signal_active = true;
        let mut interrupted = false;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        while !self.state.is_terminal() && !self.err_received && !interrupted {
            let event = tokio::select! {
                line = lines.next_line(), if stdin_open => LoopEvent::Line(line.unwrap_or(None)),
                outcome = self.transport.recv_into(&mut self.inbound) => LoopEvent::Net(outcome),
                result = &mut ctrl_c, if signal_active => match result {
                    Ok(()) => LoopEvent::Interrupt,
                    Err(_) => LoopEvent::SignalDead,
                },
            };

            match event {
                LoopEvent::Line(Some(line)) => {
                    if line == "/exit" && self.state == ClientState::Start {
                        // nothing was ever sent, no farewell needed
                        break;
                    }
                    if let Some(msg) = self.input.handle_line(&line) {
                        trace!(id = %msg.id(), "queueing outbound message");
                        self.outbound.push_back(msg);
                    }
                }
                LoopEvent::Line(None) => {
                    // EOF ends the session like /exit
                    debug!("stdin closed");
                    stdin_open = false;
                    if let Some(msg) = self.input.handle_line("/exit") {
                        self.outbound.push_back(msg);
                    }
                }
                LoopEvent::Net(Ok(RecvOutcome::Frames)) => {}
                LoopEvent::Net(Ok(RecvOutcome::PeerClosed)) => {
                    self.state = ClientState::End;
                }
                LoopEvent::Net(Err(e)) => {
                    eprintln!("ERR: Failed to receive message from server");
                    self.fail(format!("receive failed: {e:#}"));
                }
                LoopEvent::Interrupt => {
                    debug!("interrupted");
                    interrupted = true;
                    continue;
                }
                LoopEvent::SignalDead => {
                    warn!("interrupt handler unavailable");
                    signal_active = false;
                }
            }

            self.drain_outbound().await;
            while self.drain_inbound().await {
                self.drain_outbound().await;
            }
        }

        self.shutdown(interrupted).await
    }

    /// Best-effort farewell. The exit disposition is fixed before any
    /// farewell traffic: confirming a farewell BYE moves the FSM to End and
    /// must not turn a failed session into a success.
    async fn shutdown(&mut self, interrupted: bool) -> bool {
        let failure = matches!(self.state, ClientState::Error | ClientState::ErrorExit)
            || self.err_received;

        if self.state == ClientState::Error {
            let err = Message::Err {
                id: self.input.take_next_id(),
                display_name: self.input.display_name().to_owned(),
                content: self.error_msg.clone(),
            };
            self.send_message(&err).await;
        }

        if self.state == ClientState::Error
            || self.err_received
            || (interrupted && self.state != ClientState::Start)
        {
            let bye = Message::Bye { id: self.input.take_next_id() };
            self.send_message(&bye).await;
        }

        debug!(state = ?self.state, failure, "session over");
        !failure
    }

    /// Sends every admissible queued message, stopping at the first AUTH or
    /// JOIN (one outstanding reply) and on any terminal state.
    async fn drain_outbound(&mut self) {
        while !self.waiting_on_reply && !self.state.is_terminal() {
            let Some(head) = self.outbound.front() else { break };
            let message_type = head.message_type();

            // BYE is exempt from the authentication gate: leaving must work
            // from any state
            if message_type != MessageType::Auth
                && message_type != MessageType::Bye
                && !self.authenticated
            {
                eprintln!("ERR: You need to authenticate first");
                self.outbound.pop_front();
                continue;
            }
            if matches!(message_type, MessageType::Msg | MessageType::Join)
                && self.state != ClientState::Open
            {
                eprintln!("ERR: Cannot send message in non-open state");
                self.outbound.pop_front();
                continue;
            }
            if message_type == MessageType::Auth && self.authenticated {
                eprintln!("ERR: No need to authenticate, already authenticated");
                self.outbound.pop_front();
                continue;
            }

            let msg = head.clone();
            self.send_message(&msg).await;

            if matches!(message_type, MessageType::Auth | MessageType::Join)
                && !self.state.is_terminal()
            {
                // the head stays queued so the reply can be matched against it
                debug!(id = %msg.id(), "waiting on reply");
                self.waiting_on_reply = true;
            } else {
                self.outbound.pop_front();
            }
        }
    }

    /// Dispatches every queued inbound frame. Returns whether a REPLY was
    /// consumed, in which case the caller re-drives the outbound queue.
    async fn drain_inbound(&mut self) -> bool {
        let mut reply_handled = false;
        while let Some(frame) = self.inbound.pop_front() {
            let handled = if matches!(self.transport, Transport::Udp(_)) {
                self.dispatch_datagram(&frame).await
            } else {
                self.dispatch_frame(&frame)
            };
            reply_handled |= handled;
            if self.state == ClientState::Error {
                break;
            }
        }
        reply_handled
    }

    async fn send_message(&mut self, msg: &Message) {
        if matches!(self.transport, Transport::Udp(_)) {
            self.send_datagram_confirmed(msg).await
        } else {
            self.send_stream(msg).await
        }
    }

    async fn send_stream(&mut self, msg: &Message) {
        let send_result = {
            let Transport::Tcp(tcp) = &mut self.transport else { return };
            tcp.send(msg).await
        };
        match send_result {
            Ok(()) => {
                if msg.message_type() == MessageType::Bye {
                    self.state = ClientState::End;
                } else if self.state == ClientState::Start {
                    self.state = ClientState::Authenticate;
                }
            }
            Err(e) => {
                eprintln!("ERR: Failed to send message to server");
                self.fail(format!("send failed: {e:#}"));
            }
        }
    }

    /// Sends a datagram and blocks until the server confirms it,
    /// retransmitting with the same id on a silent timeout. Unrelated
    /// datagrams arriving during the wait are dispatched immediately (they
    /// get their own confirmations) before the wait resumes; the outbound
    /// queue is not re-driven while the in-flight send holds its head.
    async fn send_datagram_confirmed(&mut self, msg: &Message) {
        let max_retransmissions = match &self.transport {
            Transport::Udp(udp) => udp.max_retransmissions(),
            Transport::Tcp(_) => return,
        };
        let mut retransmissions: u32 = 0;

        'transmit: loop {
            let send_result = {
                let Transport::Udp(udp) = &self.transport else { return };
                udp.send_message(msg, udp.target()).await
            };
            if let Err(e) = send_result {
                // a failing send syscall is fatal, unlike a confirmation
                // timeout
                eprintln!("ERR: Failed to send message to server");
                self.fail(format!("send failed: {e:#}"));
                return;
            }

            loop {
                let received = {
                    let Transport::Udp(udp) = &self.transport else { return };
                    udp.recv_timeout().await
                };
                match received {
                    Ok(None) => {
                        if retransmissions < max_retransmissions {
                            retransmissions += 1;
                            debug!(id = %msg.id(), retransmissions, "confirmation timed out, retransmitting");
                            continue 'transmit;
                        }
                        // a silent server ends the session, it is not a
                        // client fault
                        debug!("server is not responding");
                        self.state = ClientState::End;
                        return;
                    }
                    Err(e) => {
                        eprintln!("ERR: Failed to receive message from server");
                        self.fail(format!("receive failed: {e:#}"));
                        return;
                    }
                    Ok(Some((data, from))) => {
                        match Message::peek_udp_header(&data) {
                            Some((tag, ref_id)) if tag == MessageType::Confirm.tag() => {
                                if ref_id != msg.id() {
                                    trace!(%ref_id, "stale confirmation, ignoring");
                                    continue;
                                }
                                if msg.message_type() == MessageType::Bye {
                                    self.state = ClientState::End;
                                } else if self.state == ClientState::Start {
                                    // the session moves to the port the
                                    // server confirmed AUTH from
                                    if let Transport::Udp(udp) = &mut self.transport {
                                        udp.learn_response_addr(from);
                                    }
                                    self.state = ClientState::Authenticate;
                                }
                                trace!(id = %msg.id(), "confirmed");
                                return;
                            }
                            _ => {
                                self.inbound.push_back(RawFrame { data, from: Some(from) });
                                self.drain_inbound().await;
                                if self.state == ClientState::Error {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_datagram(&mut self, frame: &RawFrame) -> bool {
        let Some((tag, id)) = Message::peek_udp_header(&frame.data) else {
            trace!(len = frame.data.len(), "dropping runt datagram");
            return false;
        };
        if tag == MessageType::Confirm.tag() {
            // a confirmation nobody is waiting for; never confirmed back,
            // never entered into the seen set
            trace!(%id, "stray confirmation");
            return false;
        }

        let duplicate = {
            let Transport::Udp(udp) = &mut self.transport else { return false };
            let duplicate = udp.already_seen(id);
            if !duplicate {
                udp.mark_seen(id);
            }
            duplicate
        };

        let mut reply_handled = false;
        if duplicate {
            debug!(%id, "duplicate delivery suppressed");
        } else {
            match Message::try_deser_udp(&frame.data) {
                Ok(msg) => reply_handled = self.apply_server_message(msg),
                Err(e) => {
                    eprintln!("ERR: {e:#}");
                    self.fail(format!("{e:#}"));
                }
            }
        }

        // the server may have missed an earlier confirmation, so duplicates
        // are confirmed again
        if let Some(source) = frame.from {
            let confirm_result = {
                let Transport::Udp(udp) = &self.transport else { return reply_handled };
                udp.send_confirm(id, source).await
            };
            if let Err(e) = confirm_result {
                eprintln!("ERR: Failed to send message to server");
                self.fail(format!("send failed: {e:#}"));
            }
        }
        reply_handled
    }

    fn dispatch_frame(&mut self, frame: &RawFrame) -> bool {
        if frame.data.is_empty() {
            return false;
        }
        let line = match std::str::from_utf8(&frame.data) {
            Ok(line) => line,
            Err(_) => {
                eprintln!("ERR: Malformed message");
                self.fail("malformed message: not valid ASCII");
                return false;
            }
        };
        trace!(line, "dispatching frame");
        match Message::try_deser_tcp(line) {
            Ok(msg) => self.apply_server_message(msg),
            Err(e) => {
                eprintln!("ERR: {e:#}");
                self.fail(format!("{e:#}"));
                false
            }
        }
    }

    /// Interprets one decoded server message. Returns whether it was a
    /// REPLY that resolved the outstanding request.
    fn apply_server_message(&mut self, msg: Message) -> bool {
        match msg {
            Message::Reply { ok, ref_id, content, .. } => {
                if !self.waiting_on_reply {
                    debug!("reply with no outstanding request, discarding");
                    return false;
                }
                let Some(head) = self.outbound.front() else { return false };
                if let Some(ref_id) = ref_id {
                    // the textual form carries no reference id; only
                    // datagram replies are matched against the head
                    if ref_id != head.id() {
                        eprintln!("ERR: Received reply for wrong message");
                        self.fail("Received reply for wrong message");
                        return false;
                    }
                }
                if ok {
                    eprintln!("Success: {content}");
                    if head.message_type() == MessageType::Auth {
                        self.authenticated = true;
                        self.state = ClientState::Open;
                    }
                } else {
                    eprintln!("Failure: {content}");
                }
                self.outbound.pop_front();
                self.waiting_on_reply = false;
                true
            }
            Message::Msg { display_name, content, .. } => {
                println!("{display_name}: {content}");
                false
            }
            Message::Err { display_name, content, .. } => {
                eprintln!("ERR FROM {display_name}: {content}");
                self.err_received = true;
                false
            }
            Message::Bye { .. } => {
                debug!("server closed the session");
                self.state = ClientState::End;
                false
            }
            // stray confirmations are filtered out before decoding
            Message::Confirm { .. } => false,
            Message::Auth { .. } | Message::Join { .. } => {
                eprintln!("ERR: Unexpected message type from server");
                self.fail("Unexpected message type from server");
                false
            }
        }
    }

    fn fail(&mut self, diagnostic: impl Into<String>) {
        self.error_msg = diagnostic.into();
        self.state = ClientState::Error;
    }
}
