//! Pseudo-terminal backed interactive session
//!
//! `ssh` only asks for a password on a terminal, so the control session
//! runs its command as the leader of a new session whose controlling
//! terminal is a fresh pty. A reader thread forwards everything printed to
//! the terminal as [`SessionEvent`]s.

use crate::error::Result;
use crate::network::negotiate::{SessionEvent, SessionIo};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

/// A command running on its own pseudo-terminal
pub struct PtySession {
    child: Child,
    writer: File,
    events: Receiver<SessionEvent>,
    closed: bool,
}

impl PtySession {
    /// Spawn `cmd` with the pty as its stdin, stdout, stderr and controlling terminal
    pub fn spawn(mut cmd: Command) -> Result<Self> {
        let pty = nix::pty::openpty(None, None)?;

        cmd.stdin(Stdio::from(pty.slave.try_clone()?))
            .stdout(Stdio::from(pty.slave.try_clone()?))
            .stderr(Stdio::from(pty.slave));

        // SAFETY: only async-signal-safe libc calls between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        // Closing our copies of the slave lets the master see the hangup.
        drop(cmd);

        let master = File::from(pty.master);
        let writer = master.try_clone()?;

        let (sender, events) = unbounded();
        thread::Builder::new()
            .name("control-session".to_string())
            .spawn(move || {
                let mut master = master;
                let mut buf = [0u8; 4096];
                loop {
                    match master.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if sender.send(SessionEvent::Output(buf[..n].to_vec())).is_err() {
                                return;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        // Linux reports EIO once the slave side is gone
                        Err(_) => break,
                    }
                }
                let _ = sender.send(SessionEvent::Closed);
            })?;

        tracing::debug!("control session started as pid {}", child.id());

        Ok(Self {
            child,
            writer,
            events,
            closed: false,
        })
    }
}

impl SessionIo for PtySession {
    fn read_event(&mut self, timeout: Duration) -> SessionEvent {
        if self.closed {
            return SessionEvent::Closed;
        }

        match self.events.recv_timeout(timeout) {
            Ok(SessionEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                SessionEvent::Closed
            }
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => SessionEvent::TimedOut,
        }
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
