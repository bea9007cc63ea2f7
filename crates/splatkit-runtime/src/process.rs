//! Child process supervision shared by the installer, the probe and the invoker.
//!
//! stdout and stderr are drained on background threads while the child runs.
//! Without this a child writing more than a pipe buffer of output blocks on
//! write and the poll loop below never sees it exit.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

/// Poll interval for exit, cancellation and deadline checks.
const POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the child was killed or terminated by a signal
    pub exit_code: i32,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }

    /// Last few non-empty stderr lines, falling back to stdout.
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let kept: Vec<&str> = source
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        kept[kept.len().saturating_sub(lines)..].join("\n")
    }
}

/// Run to completion, collecting both streams.
pub fn run_captured(
    cmd: &mut Command,
    timeout: Option<Duration>,
    cancel: Option<&CancelToken>,
) -> std::io::Result<ProcessOutput> {
    run_streaming(cmd, timeout, cancel, &mut |_, _| {})
}

/// Run to completion, handing each output line to `on_line` as it arrives.
///
/// The child is killed when `timeout` elapses or `cancel` fires; the
/// returned output then has `timed_out` / `cancelled` set and `exit_code == -1`.
pub fn run_streaming(
    cmd: &mut Command,
    timeout: Option<Duration>,
    cancel: Option<&CancelToken>,
    on_line: &mut dyn FnMut(Stream, &str),
) -> std::io::Result<ProcessOutput> {
    let start = Instant::now();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (tx, rx) = mpsc::channel::<(Stream, String)>();
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(spawn_reader(out, Stream::Stdout, tx.clone()));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(spawn_reader(err, Stream::Stderr, tx.clone()));
    }
    drop(tx);

    let mut output = ProcessOutput::default();
    let mut collect = |output: &mut ProcessOutput, stream: Stream, line: String| {
        on_line(stream, line.trim_end_matches(['\r', '\n']));
        match stream {
            Stream::Stdout => output.stdout.push_str(&line),
            Stream::Stderr => output.stderr.push_str(&line),
        }
    };

    let poll = Duration::from_millis(POLL_INTERVAL_MS);
    let status = loop {
        match rx.recv_timeout(poll) {
            Ok((stream, line)) => {
                collect(&mut output, stream, line);
                // Drain whatever else is queued before checking the child.
                while let Ok((stream, line)) = rx.try_recv() {
                    collect(&mut output, stream, line);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) | Err(mpsc::RecvTimeoutError::Disconnected) => {}
        }

        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if cancel.is_some_and(|c| c.is_cancelled()) {
            output.cancelled = true;
            break None;
        }
        if timeout.is_some_and(|t| start.elapsed() > t) {
            output.timed_out = true;
            break None;
        }
        if rx_disconnected_and_idle(&readers) {
            thread::sleep(poll);
        }
    };

    if status.is_none() {
        let _ = child.kill();
        let _ = child.wait();
        // Grandchildren may still hold the pipes open; leave those readers detached.
        for reader in readers.into_iter().filter(|r| r.is_finished()) {
            let _ = reader.join();
        }
    } else {
        for reader in readers {
            let _ = reader.join();
        }
    }
    for (stream, line) in rx.try_iter() {
        collect(&mut output, stream, line);
    }

    output.exit_code = match status {
        Some(s) => s.code().unwrap_or(-1),
        None => -1,
    };
    output.elapsed = start.elapsed();
    Ok(output)
}

/// Both readers finished (streams closed) but the child has not exited yet:
/// `recv_timeout` returns immediately, so sleep instead of spinning.
fn rx_disconnected_and_idle(readers: &[thread::JoinHandle<()>]) -> bool {
    readers.iter().all(|r| r.is_finished())
}

fn spawn_reader<R: Read + Send + 'static>(
    source: R,
    stream: Stream,
    tx: mpsc::Sender<(Stream, String)>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}
