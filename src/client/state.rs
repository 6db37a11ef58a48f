/// States of the client FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// nothing sent yet; only AUTH (or an immediate exit) leaves this state
    #[default]
    Start,
    /// AUTH is on the wire, its REPLY decides between Open and staying here
    Authenticate,
    /// authenticated; JOIN and MSG are admissible
    Open,
    /// session over: BYE exchanged, peer closed, or the server went silent
    End,
    /// local or protocol failure; shutdown emits best-effort ERR and BYE
    Error,
    /// failure before the session ever started; no farewell traffic is sent
    ErrorExit,
}

impl ClientState {
    /// Terminal states exit the event loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientState::End | ClientState::Error | ClientState::ErrorExit)
    }
}
