//! WebREPL password exchange.
//!
//! The WiFi bridge asks for a password before it exposes the REPL:
//!
//! ```text
//! Device                          Client
//! ──────                          ──────
//! "Password: "          ──▶
//!                       ◀──       "<password>\r\n"
//! "\r\nWebREPL connected\r\n>>> "  (success)
//!   or "\r\nAccess denied\r\n"     (failure)
//! ```
//!
//! [`AuthExchange`] is a pure state machine: the socket transport feeds it
//! every text frame it receives and acts on the returned [`AuthStep`].  Keeping
//! the exchange free of I/O lets it be tested without a network.

use std::fmt;

use tracing::debug;

/// Text the device sends to request the password.
pub const PASSWORD_PROMPT: &str = "Password:";

/// Banner the device sends after accepting the password.
pub const SUCCESS_BANNER: &str = "WebREPL connected";

/// Friendly prompt; seeing it after the credential also means success.
pub const FRIENDLY_PROMPT: &str = ">>>";

/// Text the device sends after rejecting the password.
pub const DENIAL: &str = "Access denied";

/// What the transport should do after feeding a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Nothing decisive yet; keep reading frames.
    Pending,
    /// Send this line (credential + CR-LF) to the device.
    SendCredential(String),
    /// The device accepted the session.
    Authenticated,
    /// The device explicitly refused the credential.
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingPrompt,
    AwaitingVerdict,
    Authenticated,
    Denied,
}

/// Client side of the WebREPL password exchange.
pub struct AuthExchange {
    password: String,
    phase: Phase,
    buffer: String,
}

impl fmt::Debug for AuthExchange {
    // The password must never end up in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthExchange")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl AuthExchange {
    /// Creates an exchange that will answer the prompt with `password`.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            phase: Phase::AwaitingPrompt,
            buffer: String::new(),
        }
    }

    /// Returns `true` once the exchange reached a verdict.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Authenticated | Phase::Denied)
    }

    /// Feeds one received text frame and returns the next action.
    ///
    /// Frames are accumulated so a prompt split across two frames is still
    /// recognised.  The credential is produced at most once per exchange.
    pub fn feed(&mut self, frame: &str) -> AuthStep {
        if self.is_finished() {
            return self.verdict();
        }
        self.buffer.push_str(frame);

        match self.phase {
            Phase::AwaitingPrompt => {
                if self.buffer.contains(PASSWORD_PROMPT) {
                    self.buffer.clear();
                    self.phase = Phase::AwaitingVerdict;
                    debug!("WebREPL password prompt received, sending credential");
                    AuthStep::SendCredential(format!("{}\r\n", self.password))
                } else if self.buffer.contains(SUCCESS_BANNER) {
                    // Bridges without a password go straight to the banner.
                    self.phase = Phase::Authenticated;
                    AuthStep::Authenticated
                } else {
                    AuthStep::Pending
                }
            }
            Phase::AwaitingVerdict => {
                if self.buffer.contains(DENIAL) {
                    debug!("WebREPL access denied");
                    self.phase = Phase::Denied;
                } else if self.buffer.contains(SUCCESS_BANNER)
                    || self.buffer.contains(FRIENDLY_PROMPT)
                {
                    self.phase = Phase::Authenticated;
                }
                self.verdict()
            }
            Phase::Authenticated | Phase::Denied => self.verdict(),
        }
    }

    fn verdict(&self) -> AuthStep {
        match self.phase {
            Phase::Authenticated => AuthStep::Authenticated,
            Phase::Denied => AuthStep::Denied,
            Phase::AwaitingPrompt | Phase::AwaitingVerdict => AuthStep::Pending,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
