//! Striped transfer of a single remote file
//!
//! One [`RemoteChannel`] per stripe feeds a bounded queue; the calling
//! thread visits the channels in fixed cyclic order and appends one chunk
//! from each to the destination. The first channel found at end of stream
//! completes the file.

use crate::config::TransferConfig;
use crate::core::manifest::ManifestEntry;
use crate::core::stripe::{StripeDescriptor, StripeIter};
use crate::error::{IoResultExt, Result, StripeCopyError};
use crate::network::{ChannelOptions, RemoteChannel, RemoteShell, Session};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// A source of one stripe's chunks, in order
pub trait StripeSource {
    /// Next chunk, or `None` once the stripe is exhausted
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

impl<R: Read + Seek> StripeSource for StripeIter<R> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.next().transpose()?)
    }
}

/// Interleave `sources` round-robin into `out` until one of them ends
///
/// Each pull blocks on its own source, so a slow stripe holds back the
/// others. Returns the number of bytes written.
pub fn reassemble<S, W, F>(sources: &mut [S], out: &mut W, mut on_chunk: F) -> Result<u64>
where
    S: StripeSource,
    W: Write,
    F: FnMut(u64),
{
    if sources.is_empty() {
        return Err(StripeCopyError::InvalidStripe(
            "no stripes to reassemble".to_string(),
        ));
    }

    let mut written = 0u64;

    loop {
        for source in sources.iter_mut() {
            let Some(chunk) = source.next_chunk()? else {
                return Ok(written);
            };

            out.write_all(&chunk)?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }
    }
}

/// How a file is split across channels
#[derive(Debug, Clone)]
pub struct StripeOptions {
    /// Number of parallel stripes
    pub slices: usize,
    /// Bytes per chunk
    pub chunk_bytes: usize,
    /// Pause between starting consecutive channels
    pub stagger: Duration,
    /// Parent for per-channel scratch directories
    pub scratch_root: Option<PathBuf>,
}

impl Default for StripeOptions {
    fn default() -> Self {
        Self {
            slices: 10,
            chunk_bytes: 10_000,
            stagger: Duration::from_millis(100),
            scratch_root: None,
        }
    }
}

impl StripeOptions {
    /// Take the stripe layout from the transfer configuration
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            slices: config.slices,
            chunk_bytes: config.chunk_bytes,
            stagger: Duration::from_millis(config.stagger_ms),
            scratch_root: config.scratch_root.clone(),
        }
    }
}

/// Downloads files of one session through striped channels
pub struct TransferOrchestrator<'a> {
    shell: &'a dyn RemoteShell,
    session: &'a Session,
    options: StripeOptions,
}

impl<'a> TransferOrchestrator<'a> {
    /// Create an orchestrator for `session`
    pub fn new(shell: &'a dyn RemoteShell, session: &'a Session, options: StripeOptions) -> Self {
        Self {
            shell,
            session,
            options,
        }
    }

    /// Copy `remote_path` to `destination`, returning the bytes written
    ///
    /// Every channel is closed before this returns. On failure the remote
    /// processes are killed and the destination is left as far as it got.
    pub fn transfer_file<F: FnMut(u64)>(
        &self,
        remote_path: &str,
        destination: &Path,
        on_chunk: F,
    ) -> Result<u64> {
        let stripes = StripeDescriptor::all(self.options.slices, self.options.chunk_bytes)?;
        let channel_options = ChannelOptions {
            scratch_root: self.options.scratch_root.clone(),
        };

        tracing::info!(
            "downloading {} to {} over {} stripes of {} byte chunks",
            remote_path,
            destination.display(),
            self.options.slices,
            self.options.chunk_bytes
        );

        let mut channels = Vec::with_capacity(stripes.len());
        for stripe in stripes {
            if !channels.is_empty() && !self.options.stagger.is_zero() {
                thread::sleep(self.options.stagger);
            }

            match RemoteChannel::open(self.shell, self.session, remote_path, stripe, &channel_options) {
                Ok(channel) => channels.push(channel),
                Err(e) => {
                    abort_all(channels);
                    return Err(e);
                }
            }
        }

        match write_destination(&mut channels, destination, on_chunk) {
            Ok(written) => {
                finish_all(channels)?;
                tracing::debug!("{}: {} bytes reassembled", destination.display(), written);
                Ok(written)
            }
            Err(e) => {
                tracing::debug!("aborting {} channels for {}: {}", channels.len(), remote_path, e);
                abort_all(channels);
                Err(e)
            }
        }
    }
}

fn write_destination<F: FnMut(u64)>(
    channels: &mut [RemoteChannel],
    destination: &Path,
    on_chunk: F,
) -> Result<u64> {
    let file = File::create(destination).with_path(destination)?;
    let mut out = BufWriter::new(file);

    let written = reassemble(channels, &mut out, on_chunk).map_err(|e| match e {
        StripeCopyError::Io { path, source } if path.as_os_str().is_empty() => {
            StripeCopyError::io(destination, source)
        }
        other => other,
    })?;

    out.flush().with_path(destination)?;
    Ok(written)
}

/// Close every channel, reporting the first remote failure
fn finish_all(channels: Vec<RemoteChannel>) -> Result<()> {
    let mut first_error = None;

    for channel in channels {
        if let Err(e) = channel.finish() {
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn abort_all(channels: Vec<RemoteChannel>) {
    for channel in channels {
        channel.abort();
    }
}

/// Pair each remote file with the local path it is written to
///
/// Without a destination files land in the current directory under their
/// own names. A destination that is an existing directory receives them
/// the same way; otherwise it names the single output file.
pub fn plan_destinations(
    entries: &[ManifestEntry],
    destination: Option<&Path>,
) -> Result<Vec<(String, PathBuf)>> {
    if let Some(dest) = destination.filter(|dest| !dest.is_dir()) {
        return match entries {
            [entry] => Ok(vec![(entry.path.clone(), dest.to_path_buf())]),
            _ => Err(StripeCopyError::InvalidArgument(format!(
                "{} files matched but '{}' is not a directory",
                entries.len(),
                dest.display()
            ))),
        };
    }

    let dir = destination.unwrap_or(Path::new("."));
    entries
        .iter()
        .map(|entry| {
            let name = entry.file_name().ok_or_else(|| {
                StripeCopyError::InvalidArgument(format!("no file name in '{}'", entry.path))
            })?;
            Ok((entry.path.clone(), dir.join(name)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::EntryKind;
    use crossbeam::channel::{bounded, Receiver, Sender};
    use proptest::prelude::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn stripes_of(data: &[u8], slices: usize, chunk: usize) -> Vec<StripeIter<Cursor<Vec<u8>>>> {
        StripeDescriptor::all(slices, chunk)
            .unwrap()
            .into_iter()
            .map(|stripe| stripe.iter(Cursor::new(data.to_vec())))
            .collect()
    }

    fn roundtrip(data: &[u8], slices: usize, chunk: usize) -> Vec<u8> {
        let mut sources = stripes_of(data, slices, chunk);
        let mut out = Vec::new();
        let written = reassemble(&mut sources, &mut out, |_| {}).unwrap();
        assert_eq!(written, data.len() as u64);
        out
    }

    #[test]
    fn test_two_slices_single_bytes() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(roundtrip(&data, 2, 1), data);
        assert_eq!(roundtrip(&data, 1, 1), data);
    }

    #[test]
    fn test_reassemble_counts_chunks() {
        let data = vec![1u8; 25];
        let mut sources = stripes_of(&data, 3, 4);
        let mut sizes = Vec::new();
        reassemble(&mut sources, &mut Vec::new(), |n| sizes.push(n)).unwrap();
        assert_eq!(sizes, vec![4, 4, 4, 4, 4, 4, 1]);
    }

    #[test]
    fn test_reassemble_requires_sources() {
        let mut sources: Vec<StripeIter<Cursor<Vec<u8>>>> = Vec::new();
        assert!(matches!(
            reassemble(&mut sources, &mut Vec::new(), |_| {}),
            Err(StripeCopyError::InvalidStripe(_))
        ));
    }

    /// Stripe source backed by a bounded queue, like a remote channel
    struct QueueSource {
        rx: Receiver<Option<Vec<u8>>>,
        pulled: Arc<AtomicUsize>,
    }

    impl StripeSource for QueueSource {
        fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
            let item = self
                .rx
                .recv()
                .map_err(|_| StripeCopyError::stripe(0, "producer gone"))?;
            self.pulled.fetch_add(1, Ordering::SeqCst);
            Ok(item)
        }
    }

    fn spawn_producer(data: Vec<u8>, stripe: StripeDescriptor, tx: Sender<Option<Vec<u8>>>, delay: Duration) {
        thread::spawn(move || {
            for chunk in stripe.iter(Cursor::new(data)) {
                thread::sleep(delay);
                if tx.send(Some(chunk.unwrap())).is_err() {
                    return;
                }
            }
            let _ = tx.send(None);
        });
    }

    #[test]
    fn test_order_independent_of_producer_speed() {
        let data: Vec<u8> = (0..200u8).collect();
        let pulled = Arc::new(AtomicUsize::new(0));

        let mut sources: Vec<QueueSource> = StripeDescriptor::all(3, 7)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, stripe)| {
                let (tx, rx) = bounded(10);
                // Later stripes are faster, so they finish first
                spawn_producer(data.clone(), stripe, tx, Duration::from_millis(3 - i as u64));
                QueueSource {
                    rx,
                    pulled: Arc::clone(&pulled),
                }
            })
            .collect();

        let mut out = Vec::new();
        reassemble(&mut sources, &mut out, |_| {}).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_bounded_queue_limits_buffering() {
        let data = vec![9u8; 1000];
        let stripe = StripeDescriptor::new(1, 0, 1).unwrap();
        let (tx, rx) = bounded(10);
        spawn_producer(data, stripe, tx, Duration::ZERO);

        thread::sleep(Duration::from_millis(200));
        // The producer is parked on a full queue
        assert_eq!(rx.len(), 10);

        let pulled = Arc::new(AtomicUsize::new(0));
        let mut sources = vec![QueueSource {
            rx,
            pulled: Arc::clone(&pulled),
        }];
        let mut out = Vec::new();
        assert_eq!(reassemble(&mut sources, &mut out, |_| {}).unwrap(), 1000);
        assert_eq!(pulled.load(Ordering::SeqCst), 1001);
    }

    #[test]
    fn test_write_failure_propagates() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut sources = stripes_of(b"abcdef", 2, 1);
        let err = reassemble(&mut sources, &mut Broken, |_| {}).unwrap_err();
        assert!(matches!(err, StripeCopyError::Io { .. }));
    }

    /// Runs `sh -c` with the script for the stripe index in the agent arguments
    struct StripeScripts(Vec<String>);

    impl RemoteShell for StripeScripts {
        fn control_command(&self, _session: &Session, _args: &[String]) -> std::process::Command {
            std::process::Command::new("false")
        }

        fn data_command(&self, _session: &Session, args: &[String]) -> std::process::Command {
            let index: usize = args[3].parse().unwrap();
            let mut cmd = std::process::Command::new("sh");
            cmd.arg("-c").arg(&self.0[index]);
            cmd
        }
    }

    fn run_scripts(scripts: Vec<String>, chunk: usize, scratch: &Path, dest: PathBuf) -> Result<u64> {
        let options = StripeOptions {
            slices: scripts.len(),
            chunk_bytes: chunk,
            stagger: Duration::ZERO,
            scratch_root: Some(scratch.to_path_buf()),
        };

        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            let shell = StripeScripts(scripts);
            let session = Session::new("user", "host", 22);
            let orchestrator = TransferOrchestrator::new(&shell, &session, options);
            let _ = tx.send(orchestrator.transfer_file("file", &dest, |_| {}));
        });

        rx.recv_timeout(Duration::from_secs(15))
            .expect("transfer_file did not return")
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[test]
    fn test_overlong_sibling_stripe_fails_instead_of_hanging() {
        let dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let scripts = vec!["printf a".to_string(), "head -c 200000 /dev/zero".to_string()];

        let err = run_scripts(scripts, 1, scratch.path(), dir.path().join("out")).unwrap_err();

        assert!(matches!(err, StripeCopyError::StripeFailed { index: 1, .. }), "{:?}", err);
        assert!(is_empty_dir(scratch.path()));
    }

    #[test]
    fn test_write_failure_kills_every_stripe() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }

        let pids = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let scripts: Vec<String> = (0..2)
            .map(|i| {
                format!(
                    "echo $$ > {}/pid-{}; exec head -c 1000000 /dev/zero",
                    pids.path().display(),
                    i
                )
            })
            .collect();

        // Writes to /dev/full fail once the output buffer spills
        let err = run_scripts(scripts, 1000, scratch.path(), full.to_path_buf()).unwrap_err();
        assert!(matches!(err, StripeCopyError::Io { .. }), "{:?}", err);

        for i in 0..2 {
            let pid: i32 = std::fs::read_to_string(pids.path().join(format!("pid-{}", i)))
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
            assert!(!alive, "stripe {} process {} still running", i, pid);
        }
        assert!(is_empty_dir(scratch.path()));
    }

    #[test]
    fn test_uncreatable_destination_releases_channels() {
        let dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let scripts = vec!["head -c 100000 /dev/zero".to_string(); 3];

        let err = run_scripts(scripts, 10, scratch.path(), dir.path().join("missing/out")).unwrap_err();

        match err {
            StripeCopyError::Io { path, source } => {
                assert_eq!(path, dir.path().join("missing/out"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(is_empty_dir(scratch.path()));
    }

    fn entry(path: &str) -> ManifestEntry {
        ManifestEntry {
            kind: EntryKind::File,
            readable: true,
            writable: true,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_plan_destinations() {
        let dir = TempDir::new().unwrap();
        let entries = vec![entry("/remote/a.bin"), entry("/remote/sub/b.bin")];

        let planned = plan_destinations(&entries, None).unwrap();
        assert_eq!(planned[0], ("/remote/a.bin".to_string(), PathBuf::from("./a.bin")));

        let planned = plan_destinations(&entries, Some(dir.path())).unwrap();
        assert_eq!(planned[1].1, dir.path().join("b.bin"));

        let file = dir.path().join("out.bin");
        let planned = plan_destinations(&entries[..1], Some(&file)).unwrap();
        assert_eq!(planned, vec![("/remote/a.bin".to_string(), file.clone())]);

        assert!(matches!(
            plan_destinations(&entries, Some(&file)),
            Err(StripeCopyError::InvalidArgument(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_reassembly_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            slices in 1usize..12,
            chunk in 1usize..300,
        ) {
            prop_assert_eq!(roundtrip(&data, slices, chunk), data);
        }

        #[test]
        fn prop_stripes_partition_file(
            len in 0usize..2048,
            slices in 1usize..12,
            chunk in 1usize..300,
        ) {
            // Each byte holds its own offset, so stripes reveal which offsets they carry
            let data: Vec<u32> = (0..len as u32).collect();
            let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();

            let mut seen = vec![0u8; len];
            for stripe in StripeDescriptor::all(slices, chunk * 4).unwrap() {
                for chunk in stripe.iter(Cursor::new(bytes.clone())) {
                    for word in chunk.unwrap().chunks(4) {
                        let offset = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                        seen[offset as usize] += 1;
                    }
                }
            }

            prop_assert!(seen.iter().all(|&count| count == 1));
        }
    }
}
