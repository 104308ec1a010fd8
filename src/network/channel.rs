//! Stripe data channels
//!
//! Each channel owns one remote process emitting a single stripe, a fifo in
//! a private scratch directory that the process writes into, and a producer
//! thread that cuts the fifo stream into `chunk_bytes` reads and queues them.
//!
//! ```text
//!  remote agent ──ssh──▶ fifo ──producer thread──▶ bounded queue (10) ──▶ reassembler
//! ```
//!
//! The child runs in its own process group so that tearing the channel
//! down also stops helpers it spawned (`sshpass` forks `ssh`), which is what
//! closes the fifo and lets the producer finish.

use crate::core::{read_full, StripeDescriptor, StripeSource};
use crate::error::{IoResultExt, Result, StripeCopyError};
use crate::network::remote::{RemoteShell, Session};
use crossbeam::channel::{bounded, Receiver, Sender};
use nix::sys::stat::Mode;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::thread::{self, JoinHandle};
use tempfile::TempDir;

/// Chunks a producer may queue ahead of the reassembler
pub const QUEUE_DEPTH: usize = 10;

/// Item on a stripe queue
#[derive(Debug)]
pub enum StripeMessage {
    /// Next chunk of the stripe
    Chunk(Vec<u8>),
    /// The remote stream closed
    End,
    /// Reading the stream failed
    Failed(String),
}

/// Where a channel creates its scratch directory
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    /// Parent for scratch directories; the system temp dir when unset
    pub scratch_root: Option<PathBuf>,
}

/// One stripe's remote process, fifo and queue
pub struct RemoteChannel {
    stripe: StripeDescriptor,
    child: Option<Child>,
    scratch: Option<TempDir>,
    receiver: Option<Receiver<StripeMessage>>,
    producer: Option<JoinHandle<()>>,
    stderr_relay: Option<JoinHandle<()>>,
    ended: bool,
}

impl RemoteChannel {
    /// Start emitting `stripe` of `remote_path` through a new channel
    pub fn open(
        shell: &dyn RemoteShell,
        session: &Session,
        remote_path: &str,
        stripe: StripeDescriptor,
        options: &ChannelOptions,
    ) -> Result<Self> {
        let index = stripe.slice_index();

        let mut builder = tempfile::Builder::new();
        builder.prefix("stripecp-");
        let scratch = match &options.scratch_root {
            Some(root) => builder.tempdir_in(root).with_path(root)?,
            None => builder.tempdir()?,
        };

        let fifo = scratch.path().join(format!("stripe-{}.fifo", index));
        nix::unistd::mkfifo(&fifo, Mode::S_IRUSR | Mode::S_IWUSR)
            .map_err(|e| StripeCopyError::io(&fifo, e.into()))?;

        let (reader, writer) = open_fifo_pair(&fifo)?;

        let (sender, receiver) = bounded(QUEUE_DEPTH);
        let chunk_bytes = stripe.chunk_bytes();
        let producer = thread::Builder::new()
            .name(format!("stripe-{}", index))
            .spawn(move || produce(reader, chunk_bytes, sender))?;

        // From here on the channel owns everything; Drop releases it on error.
        let mut channel = Self {
            stripe,
            child: None,
            scratch: Some(scratch),
            receiver: Some(receiver),
            producer: Some(producer),
            stderr_relay: None,
            ended: false,
        };

        let args = vec![
            "agent".to_string(),
            "stripe".to_string(),
            stripe.num_slices().to_string(),
            index.to_string(),
            chunk_bytes.to_string(),
            remote_path.to_string(),
        ];

        let mut cmd = shell.data_command(session, &args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| StripeCopyError::connection(&session.host, e.to_string()))?;
        // Drop our copy of the fifo's write end so EOF follows the child's exit.
        drop(cmd);

        if let Some(stderr) = child.stderr.take() {
            channel.stderr_relay = thread::Builder::new()
                .name(format!("stripe-{}-stderr", index))
                .spawn(move || relay_stderr(index, stderr))
                .ok();
        }
        channel.child = Some(child);

        tracing::debug!(
            "opened stripe {}/{} of {} via {:?}",
            index,
            stripe.num_slices(),
            remote_path,
            channel.scratch_dir()
        );

        Ok(channel)
    }

    /// Private directory holding the fifo, while the channel is open
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|dir| dir.path())
    }

    /// Block for the next chunk; `None` once the stripe is complete
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let index = self.stripe.slice_index();
        let receiver = self
            .receiver
            .as_ref()
            .ok_or_else(|| StripeCopyError::stripe(index, "channel already closed"))?;

        match receiver.recv() {
            Ok(StripeMessage::Chunk(chunk)) => Ok(Some(chunk)),
            Ok(StripeMessage::End) => {
                self.ended = true;
                Ok(None)
            }
            Ok(StripeMessage::Failed(message)) => Err(StripeCopyError::stripe(index, message)),
            Err(_) => Err(StripeCopyError::stripe(index, "producer exited without end of stream")),
        }
    }

    /// Close after a completed transfer, checking the remote exit status
    ///
    /// The stripe must be at its end: a channel still holding chunks means
    /// the remote sent more than the file layout allows (the file grew, say).
    /// It is killed rather than waited on, since its producer may be parked
    /// on a full queue.
    pub fn finish(mut self) -> Result<()> {
        let index = self.stripe.slice_index();

        if let Err(e) = self.expect_end() {
            tracing::debug!("stripe {} not at its end: {}", index, e);
            self.release();
            return Err(e);
        }

        let status = match self.child.as_mut() {
            Some(child) => Some(child.wait()?),
            None => None,
        };
        self.release();

        match status {
            Some(status) if !status.success() => Err(StripeCopyError::stripe(
                index,
                format!("remote process exited with {}", status),
            )),
            _ => Ok(()),
        }
    }

    /// Consume the end-of-stream marker if it has not been seen yet
    fn expect_end(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }

        match self.recv()? {
            None => Ok(()),
            Some(_) => Err(StripeCopyError::stripe(
                self.stripe.slice_index(),
                "stripe longer than expected",
            )),
        }
    }

    /// Close after a failed transfer, terminating the remote process
    pub fn abort(mut self) {
        self.release();
    }

    /// Terminate the process if still running and remove the scratch directory
    fn release(&mut self) {
        let index = self.stripe.slice_index();

        // Unblocks a producer waiting on a full queue.
        self.receiver.take();

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    tracing::debug!("terminating stripe {} process {}", index, child.id());
                    kill_group(&mut child);
                }
            }
            let _ = child.wait();
        }

        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
        if let Some(relay) = self.stderr_relay.take() {
            let _ = relay.join();
        }

        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                tracing::warn!("failed to remove scratch directory {:?}: {}", path, e);
            }
        }
    }
}

impl StripeSource for RemoteChannel {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        self.recv()
    }
}

impl Drop for RemoteChannel {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open both ends of a fifo without blocking on the other side
///
/// The read end is opened non-blocking first (which succeeds with no writer),
/// which lets the write end open immediately; the read end is then switched
/// back to blocking mode for the producer.
fn open_fifo_pair(fifo: &Path) -> Result<(File, File)> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};

    let reader = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(fifo)
        .with_path(fifo)?;

    let writer = OpenOptions::new().write(true).open(fifo).with_path(fifo)?;

    fcntl(reader.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty()))
        .map_err(|e| StripeCopyError::io(fifo, e.into()))?;

    Ok((reader, writer))
}

fn produce(mut reader: File, chunk_bytes: usize, sender: Sender<StripeMessage>) {
    loop {
        let mut buf = vec![0u8; chunk_bytes];
        match read_full(&mut reader, &mut buf) {
            Ok(0) => {
                let _ = sender.send(StripeMessage::End);
                return;
            }
            Ok(n) => {
                buf.truncate(n);
                if sender.send(StripeMessage::Chunk(buf)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = sender.send(StripeMessage::Failed(e.to_string()));
                return;
            }
        }
    }
}

fn relay_stderr(index: usize, stderr: std::process::ChildStderr) {
    for line in BufReader::new(stderr).lines() {
        match line {
            Ok(line) if !line.trim().is_empty() => tracing::warn!("stripe {}: {}", index, line.trim_end()),
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn kill_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
}
