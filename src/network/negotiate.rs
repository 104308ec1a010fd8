//! Credential negotiation over the interactive control session
//!
//! One remote command, `agent manifest <patterns>`, is used both to log in
//! and to fetch the manifest. Whatever the session prints is cut into
//! tokens which drive a small state machine:
//!
//! ```text
//! AwaitPrompt --password prompt--> PromptUser --> SendSecret --> AwaitPrompt
//! AwaitPrompt --closing brace----> ExtractJson --parsed--> Done
//!                                              --not yet--> AwaitPrompt
//! AwaitPrompt --end of stream | timeout | host key prompt--> Failed
//! ```
//!
//! The operator is asked for the secret at most once. Later prompts are
//! answered with the same secret, so a wrong secret ends when the secure
//! channel gives up and closes the session.

use crate::core::Manifest;
use crate::error::{Result, StripeCopyError};
use crate::network::remote::Secret;
use console::Term;
use std::time::Duration;

/// Something observed on the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bytes printed to the session terminal
    Output(Vec<u8>),
    /// The session ended
    Closed,
    /// Nothing arrived within the timeout
    TimedOut,
}

/// Interactive text channel to the remote side
pub trait SessionIo {
    /// Wait up to `timeout` for the next event
    fn read_event(&mut self, timeout: Duration) -> SessionEvent;

    /// Type a line into the session
    fn send_line(&mut self, line: &str) -> Result<()>;
}

/// Asks the operator for a secret
pub trait SecretPrompt {
    /// Show `prompt` and read a secret without echo
    fn solicit(&self, prompt: &str) -> Result<Secret>;
}

/// Reads the secret from the controlling terminal
#[derive(Debug, Default)]
pub struct ConsolePrompt;

impl SecretPrompt for ConsolePrompt {
    fn solicit(&self, prompt: &str) -> Result<Secret> {
        let term = Term::stderr();
        term.write_str(&format!("{} ", prompt.trim()))?;
        let secret = term.read_secure_line()?;
        Ok(Secret::new(secret))
    }
}

/// Pattern matches the negotiation reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A password prompt; carries the prompt line as printed
    PasswordPrompt(String),
    /// Request to confirm an unknown host key
    HostKeyPrompt,
    /// A closing brace that may end the manifest
    ManifestEnd,
    /// The session closed
    EndOfStream,
    /// No output within the timeout
    Timeout,
}

/// Why a negotiation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Session closed before a manifest arrived
    Closed,
    /// Session closed after the secret was sent
    Rejected,
    /// No progress within the timeout
    TimedOut,
    /// Host key needs confirmation
    HostKey,
}

/// Negotiation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    /// Waiting for the next token
    AwaitPrompt,
    /// Ask the operator, showing this prompt
    PromptUser(String),
    /// Type the secret into the session
    SendSecret,
    /// Try to parse the reply seen so far
    ExtractJson,
    /// Manifest received
    Done,
    /// Negotiation failed
    Failed(FailureReason),
}

impl NegotiationState {
    /// Next state after `token`
    ///
    /// Tokens only move the machine out of `AwaitPrompt`; every other state
    /// is advanced by the action it names.
    pub fn on_token(self, token: Token, have_secret: bool) -> Self {
        match (self, token) {
            (Self::AwaitPrompt, Token::PasswordPrompt(_)) if have_secret => Self::SendSecret,
            (Self::AwaitPrompt, Token::PasswordPrompt(prompt)) => Self::PromptUser(prompt),
            (Self::AwaitPrompt, Token::ManifestEnd) => Self::ExtractJson,
            (Self::AwaitPrompt, Token::HostKeyPrompt) => Self::Failed(FailureReason::HostKey),
            (Self::AwaitPrompt, Token::Timeout) => Self::Failed(FailureReason::TimedOut),
            (Self::AwaitPrompt, Token::EndOfStream) if have_secret => {
                Self::Failed(FailureReason::Rejected)
            }
            (Self::AwaitPrompt, Token::EndOfStream) => Self::Failed(FailureReason::Closed),
            (state, _) => state,
        }
    }
}

/// Prompt patterns and timeout for a negotiation
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Silence tolerated between outputs
    pub timeout: Duration,
    /// Substrings that mark a password prompt
    pub password_prompts: Vec<String>,
    /// Substrings that mark a host key confirmation
    pub host_key_prompts: Vec<String>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            password_prompts: vec!["password:".to_string(), "Password:".to_string()],
            host_key_prompts: vec!["fingerprint".to_string(), "(yes/no".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Hit {
    Password,
    HostKey,
    Brace,
}

/// Accumulated session output, tokenized front to back
#[derive(Debug, Default)]
struct OutputScanner {
    buf: Vec<u8>,
    consumed: usize,
    reply_start: usize,
}

impl OutputScanner {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Earliest token in the unconsumed output
    ///
    /// Prompts are not looked for once a reply object has opened, so file
    /// names in the manifest cannot pass for prompts.
    fn next_token(&mut self, config: &NegotiationConfig) -> Option<Token> {
        let pending = &self.buf[self.consumed..];
        let brace = pending.iter().position(|&b| b == b'}');
        let opened = self.buf[self.reply_start..]
            .iter()
            .position(|&b| b == b'{')
            .map(|pos| pos + self.reply_start);

        let prompt_limit = match opened {
            Some(open) if open >= self.consumed => open - self.consumed,
            Some(_) => 0,
            None => pending.len(),
        };
        let searchable = &pending[..prompt_limit];

        let password = earliest(searchable, &config.password_prompts);
        let host_key = earliest(searchable, &config.host_key_prompts);

        let mut best: Option<(usize, usize, Hit)> = None;
        let candidates = [
            (password, Hit::Password),
            (host_key, Hit::HostKey),
            (brace.map(|pos| (pos, 1)), Hit::Brace),
        ];
        for (candidate, hit) in candidates {
            if let Some((pos, len)) = candidate {
                if best.map_or(true, |(best_pos, _, _)| pos < best_pos) {
                    best = Some((pos, len, hit));
                }
            }
        }

        let (pos, len, hit) = best?;
        let start = self.consumed + pos;
        let end = start + len;
        self.consumed = end;

        Some(match hit {
            Hit::Password => {
                self.reply_start = end;
                let line_start = self.buf[..start]
                    .iter()
                    .rposition(|&b| b == b'\n' || b == b'\r')
                    .map_or(0, |p| p + 1);
                Token::PasswordPrompt(String::from_utf8_lossy(&self.buf[line_start..end]).into_owned())
            }
            Hit::HostKey => Token::HostKeyPrompt,
            Hit::Brace => Token::ManifestEnd,
        })
    }

    /// Manifest spanning the reply up to the last consumed brace
    ///
    /// A brace inside a still-open object (one in a file name, say) leaves
    /// the reply pending. Braces around text that can never become a
    /// manifest are dropped, so prompts printed after them are seen again.
    fn manifest(&mut self) -> Option<Manifest> {
        let reply = &self.buf[self.reply_start..self.consumed];
        let open = reply.iter().position(|&b| b == b'{')?;

        match Manifest::parse(&reply[open..]) {
            Ok(manifest) => Some(manifest),
            Err(e) if e.is_eof() => None,
            Err(e) => {
                tracing::debug!("discarding non-manifest output: {}", e);
                self.reply_start = self.consumed;
                None
            }
        }
    }

    /// Last non-empty line of output, for error messages
    fn last_line(&self) -> Option<String> {
        String::from_utf8_lossy(&self.buf)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
    }
}

fn earliest(haystack: &[u8], needles: &[String]) -> Option<(usize, usize)> {
    needles
        .iter()
        .filter(|needle| !needle.is_empty())
        .filter_map(|needle| {
            let needle = needle.as_bytes();
            haystack
                .windows(needle.len())
                .position(|window| window == needle)
                .map(|pos| (pos, needle.len()))
        })
        .min_by_key(|&(pos, _)| pos)
}

/// What a successful negotiation yields
#[derive(Debug)]
pub struct Negotiated {
    /// Secret typed by the operator, if one was asked for
    pub secret: Option<Secret>,
    /// The agent's manifest
    pub manifest: Manifest,
}

/// Drives one control session to a manifest
pub struct Negotiator {
    config: NegotiationConfig,
    user: String,
    host: String,
}

impl Negotiator {
    /// Create a negotiator for `user@host`
    pub fn new(config: NegotiationConfig, user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            config,
            user: user.into(),
            host: host.into(),
        }
    }

    /// Run the negotiation to completion
    pub fn run(&self, io: &mut dyn SessionIo, prompt: &dyn SecretPrompt) -> Result<Negotiated> {
        let mut scanner = OutputScanner::default();
        let mut secret: Option<Secret> = None;
        let mut manifest = None;
        let mut state = NegotiationState::AwaitPrompt;

        loop {
            tracing::trace!("negotiation state {:?}", state);

            state = match state {
                NegotiationState::AwaitPrompt => {
                    let token = self.next_token(&mut scanner, io);
                    tracing::debug!("negotiation token {:?}", token);
                    NegotiationState::AwaitPrompt.on_token(token, secret.is_some())
                }
                NegotiationState::PromptUser(text) => {
                    secret = Some(prompt.solicit(&text)?);
                    NegotiationState::SendSecret
                }
                NegotiationState::SendSecret => {
                    if let Some(secret) = &secret {
                        io.send_line(secret.expose())?;
                    }
                    NegotiationState::AwaitPrompt
                }
                NegotiationState::ExtractJson => {
                    manifest = scanner.manifest();
                    match manifest {
                        Some(_) => NegotiationState::Done,
                        None => NegotiationState::AwaitPrompt,
                    }
                }
                NegotiationState::Done => {
                    let manifest = manifest.ok_or_else(|| {
                        StripeCopyError::connection(&self.host, "negotiation ended without a manifest")
                    })?;
                    tracing::debug!(
                        "manifest from agent {} with {} entries",
                        manifest.version,
                        manifest.entries.len()
                    );
                    return Ok(Negotiated { secret, manifest });
                }
                NegotiationState::Failed(reason) => return Err(self.failure(reason, &scanner)),
            };
        }
    }

    fn next_token(&self, scanner: &mut OutputScanner, io: &mut dyn SessionIo) -> Token {
        loop {
            if let Some(token) = scanner.next_token(&self.config) {
                return token;
            }

            match io.read_event(self.config.timeout) {
                SessionEvent::Output(bytes) => scanner.push(&bytes),
                SessionEvent::Closed => return Token::EndOfStream,
                SessionEvent::TimedOut => return Token::Timeout,
            }
        }
    }

    fn failure(&self, reason: FailureReason, scanner: &OutputScanner) -> StripeCopyError {
        let detail = scanner.last_line();
        tracing::debug!("negotiation failed: {:?} (last output {:?})", reason, detail);

        match reason {
            FailureReason::HostKey => StripeCopyError::HostKeyUnverified {
                host: self.host.clone(),
            },
            FailureReason::TimedOut => StripeCopyError::Timeout(self.config.timeout.as_secs()),
            FailureReason::Rejected => StripeCopyError::auth(
                &self.user,
                &self.host,
                detail.unwrap_or_else(|| "password rejected".to_string()),
            ),
            FailureReason::Closed => StripeCopyError::connection(
                &self.host,
                detail.unwrap_or_else(|| "session closed before the agent replied".to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    const REPLY: &str = r#"{"version": "0.4.0", "entries": [["f", true, true, "/data/a.bin"]]}"#;

    /// Session replaying canned events and recording typed lines
    #[derive(Default)]
    struct ScriptedSession {
        events: VecDeque<SessionEvent>,
        sent: Vec<String>,
    }

    impl ScriptedSession {
        fn new(events: &[&str]) -> Self {
            let events = events
                .iter()
                .map(|&event| match event {
                    "<eof>" => SessionEvent::Closed,
                    "<timeout>" => SessionEvent::TimedOut,
                    text => SessionEvent::Output(text.as_bytes().to_vec()),
                })
                .collect();
            Self {
                events,
                ..Default::default()
            }
        }
    }

    impl SessionIo for ScriptedSession {
        fn read_event(&mut self, _timeout: Duration) -> SessionEvent {
            self.events.pop_front().unwrap_or(SessionEvent::Closed)
        }

        fn send_line(&mut self, line: &str) -> Result<()> {
            self.sent.push(line.to_string());
            Ok(())
        }
    }

    struct FakePrompt {
        prompts: RefCell<Vec<String>>,
    }

    impl FakePrompt {
        fn new() -> Self {
            Self {
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl SecretPrompt for FakePrompt {
        fn solicit(&self, prompt: &str) -> Result<Secret> {
            self.prompts.borrow_mut().push(prompt.to_string());
            Ok(Secret::new("shhh"))
        }
    }

    fn negotiate(events: &[&str]) -> (Result<Negotiated>, ScriptedSession, FakePrompt) {
        let mut session = ScriptedSession::new(events);
        let prompt = FakePrompt::new();
        let result = Negotiator::new(NegotiationConfig::default(), "user", "host").run(&mut session, &prompt);
        (result, session, prompt)
    }

    #[test]
    fn test_password_then_manifest() {
        let (result, session, prompt) = negotiate(&["user@host's password: ", "\r\n", REPLY, "\r\n"]);

        let negotiated = result.unwrap();
        assert_eq!(negotiated.secret, Some(Secret::new("shhh")));
        assert_eq!(negotiated.manifest.entries[0].path, "/data/a.bin");
        assert_eq!(session.sent, vec!["shhh"]);
        assert_eq!(*prompt.prompts.borrow(), vec!["user@host's password:"]);
    }

    #[test]
    fn test_second_prompt_reuses_secret() {
        let (result, session, prompt) = negotiate(&[
            "user@host's password: ",
            "\r\nPermission denied, please try again.\r\nuser@host's password: ",
            REPLY,
        ]);

        assert!(result.is_ok());
        assert_eq!(session.sent, vec!["shhh", "shhh"]);
        assert_eq!(prompt.prompts.borrow().len(), 1);
    }

    #[test]
    fn test_key_auth_needs_no_secret() {
        let (result, session, prompt) = negotiate(&[REPLY]);

        let negotiated = result.unwrap();
        assert!(negotiated.secret.is_none());
        assert!(session.sent.is_empty());
        assert!(prompt.prompts.borrow().is_empty());
    }

    #[test]
    fn test_reply_split_across_reads() {
        let (head, tail) = REPLY.split_at(20);
        let (result, _, _) = negotiate(&["Password:", head, tail]);
        assert_eq!(result.unwrap().manifest.version, "0.4.0");
    }

    #[test]
    fn test_prompt_split_across_reads() {
        let (result, session, _) = negotiate(&["user@host's pass", "word: ", REPLY]);
        assert!(result.is_ok());
        assert_eq!(session.sent.len(), 1);
    }

    #[test]
    fn test_brace_inside_path_keeps_waiting() {
        let reply = r#"{"version": "0.4.0", "entries": [["f", true, true, "/x/a}b password: c"]]}"#;
        let (result, session, _) = negotiate(&[reply]);

        assert_eq!(result.unwrap().manifest.entries[0].path, "/x/a}b password: c");
        assert!(session.sent.is_empty());
    }

    #[test]
    fn test_banner_braces_do_not_hide_prompt() {
        let (result, session, _) = negotiate(&["Welcome {to} the host\r\n", "password: ", REPLY]);
        assert!(result.is_ok());
        assert_eq!(session.sent, vec!["shhh"]);
    }

    #[test]
    fn test_end_of_stream_fails() {
        let (result, _, _) = negotiate(&["bash: stripecp: command not found\r\n", "<eof>"]);
        let err = result.unwrap_err();
        assert!(matches!(err, StripeCopyError::ConnectionError { .. }));
        assert!(err.to_string().contains("command not found"));
        assert!(err.is_credential_error());
    }

    #[test]
    fn test_rejected_secret_fails_after_close() {
        let (result, session, prompt) = negotiate(&[
            "password: ",
            "password: ",
            "\r\nuser@host: Permission denied (publickey,password).\r\n",
            "<eof>",
        ]);

        assert!(matches!(result, Err(StripeCopyError::AuthenticationError { .. })));
        assert_eq!(session.sent.len(), 2);
        assert_eq!(prompt.prompts.borrow().len(), 1);
    }

    #[test]
    fn test_timeout_fails() {
        let (result, _, _) = negotiate(&["password: ", "<timeout>"]);
        assert!(matches!(result, Err(StripeCopyError::Timeout(30))));

        let (result, _, prompt) = negotiate(&["<timeout>"]);
        assert!(matches!(result, Err(StripeCopyError::Timeout(_))));
        assert!(prompt.prompts.borrow().is_empty());
    }

    #[test]
    fn test_host_key_prompt_fails() {
        let (result, session, _) = negotiate(&[
            "ED25519 key fingerprint is SHA256:abc.\r\nAre you sure you want to continue connecting (yes/no/[fingerprint])? ",
        ]);

        assert!(matches!(result, Err(StripeCopyError::HostKeyUnverified { .. })));
        assert!(session.sent.is_empty());
    }

    #[test]
    fn test_localized_prompt() {
        let mut config = NegotiationConfig::default();
        config.password_prompts.push("Passwort:".to_string());

        let mut session = ScriptedSession::new(&["Passwort: ", REPLY]);
        let prompt = FakePrompt::new();
        let negotiated = Negotiator::new(config, "user", "host").run(&mut session, &prompt).unwrap();
        assert!(negotiated.secret.is_some());
    }

    #[test]
    fn test_transitions() {
        use NegotiationState::*;

        let prompt = || Token::PasswordPrompt("password:".to_string());
        assert_eq!(AwaitPrompt.on_token(prompt(), false), PromptUser("password:".to_string()));
        assert_eq!(AwaitPrompt.on_token(prompt(), true), SendSecret);
        assert_eq!(AwaitPrompt.on_token(Token::ManifestEnd, false), ExtractJson);
        assert_eq!(AwaitPrompt.on_token(Token::HostKeyPrompt, false), Failed(FailureReason::HostKey));
        assert_eq!(AwaitPrompt.on_token(Token::Timeout, true), Failed(FailureReason::TimedOut));
        assert_eq!(AwaitPrompt.on_token(Token::EndOfStream, false), Failed(FailureReason::Closed));
        assert_eq!(AwaitPrompt.on_token(Token::EndOfStream, true), Failed(FailureReason::Rejected));
        assert_eq!(SendSecret.on_token(Token::ManifestEnd, true), SendSecret);
    }
}
