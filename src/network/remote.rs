//! Remote-execution primitive
//!
//! Everything that runs on the far side goes through a [`RemoteShell`],
//! which turns an agent argument list into a local [`Command`]. The SSH
//! implementation wraps the system `ssh` client (and `sshpass` once a secret
//! is known); [`LocalShell`] runs the agent directly on this host.

use crate::config::TransferConfig;
use crate::network::netspec::quote_path;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

/// Environment variable `sshpass -e` reads the secret from
const SSHPASS_ENV: &str = "SSHPASS";

/// Secret typed by the operator; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret string
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Reveal the secret to hand it to the secure channel
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Who to connect as and where, plus the secret once obtained
#[derive(Debug, Clone)]
pub struct Session {
    /// Remote user
    pub user: String,
    /// Remote host
    pub host: String,
    /// Secure-channel port
    pub port: u16,
    /// Held in memory for one invocation only
    pub secret: Option<Secret>,
}

impl Session {
    /// Create a session without a secret
    pub fn new(user: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port,
            secret: None,
        }
    }

    /// `user@host` destination string
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Runs agent invocations on a session's host
pub trait RemoteShell: Send + Sync {
    /// Command for the interactive control session
    ///
    /// Authentication prompts must reach the command's terminal so the
    /// negotiator can observe and answer them.
    fn control_command(&self, session: &Session, agent_args: &[String]) -> Command;

    /// Command for a non-interactive data channel
    ///
    /// Uses the session secret, when present, without prompting.
    fn data_command(&self, session: &Session, agent_args: &[String]) -> Command;
}

/// `ssh`-backed remote shell
#[derive(Debug, Clone)]
pub struct SshShell {
    /// Secure-channel client program
    pub ssh_program: OsString,
    /// Non-interactive password helper
    pub sshpass_program: OsString,
    /// Agent program name on the remote host
    pub remote_program: String,
}

impl Default for SshShell {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".into(),
            sshpass_program: "sshpass".into(),
            remote_program: "stripecp".to_string(),
        }
    }
}

impl SshShell {
    /// Build from the transfer configuration
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            ssh_program: config.ssh_program.clone().into(),
            sshpass_program: config.sshpass_program.clone().into(),
            remote_program: config.remote_program.clone(),
        }
    }

    /// Remote command line; ssh joins it into one string for the remote shell
    fn remote_args(&self, agent_args: &[String]) -> Vec<String> {
        std::iter::once(quote_path(&self.remote_program))
            .chain(agent_args.iter().map(|arg| quote_path(arg)))
            .collect()
    }

    fn ssh_args(&self, session: &Session, batch: bool, agent_args: &[String]) -> Vec<String> {
        let mut args = vec!["-p".to_string(), session.port.to_string()];
        if batch {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args.push(session.destination());
        args.extend(self.remote_args(agent_args));
        args
    }
}

impl RemoteShell for SshShell {
    fn control_command(&self, session: &Session, agent_args: &[String]) -> Command {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.args(self.ssh_args(session, false, agent_args));
        cmd
    }

    fn data_command(&self, session: &Session, agent_args: &[String]) -> Command {
        match &session.secret {
            Some(secret) => {
                let mut cmd = Command::new(&self.sshpass_program);
                cmd.arg("-e")
                    .arg(&self.ssh_program)
                    .args(self.ssh_args(session, false, agent_args))
                    .env(SSHPASS_ENV, secret.expose());
                cmd
            }
            None => {
                let mut cmd = Command::new(&self.ssh_program);
                cmd.args(self.ssh_args(session, true, agent_args));
                cmd
            }
        }
    }
}

/// Runs the agent program on this host, ignoring user and host
///
/// Arguments are passed verbatim since no remote shell re-parses them.
#[derive(Debug, Clone)]
pub struct LocalShell {
    program: PathBuf,
}

impl LocalShell {
    /// Use `program` as the agent
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use the currently running executable as the agent
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

impl RemoteShell for LocalShell {
    fn control_command(&self, _session: &Session, agent_args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(agent_args);
        cmd
    }

    fn data_command(&self, session: &Session, agent_args: &[String]) -> Command {
        self.control_command(session, agent_args)
    }
}
