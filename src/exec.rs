//! Supervised execution of external commands.
//!
//! Every external tool this crate touches (downloader, audio tool, STT
//! binary, transfer tool, the job-supervisor child itself) runs through
//! [`run`]: stdout and stderr are captured through pipes, merged in arrival
//! order into a combined stream, and teed to an optional log file and to the
//! operator's terminal, while the parent waits in short slices so it can
//! enforce a wall-clock timeout and react to cancellation flags.
//!
//! stdout and stderr are additionally kept separate so callers can honour
//! machine-readable stdout contracts (the job supervisor's last stdout line)
//! and classify failures from stderr content.

use std::fs::File;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::process;

/// How the child left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal exit; signal deaths are mapped to `128 + signo`.
    Exited(i32),
    /// The enforced wall-clock timeout expired and the child was terminated.
    TimedOut,
    /// A cancellation flag was raised and the child was terminated.
    Interrupted,
}

impl ExitKind {
    pub fn success(self) -> bool {
        matches!(self, ExitKind::Exited(0))
    }
}

/// Captured result of a supervised command.
#[derive(Debug)]
pub struct ExecOutcome {
    pub kind: ExitKind,
    pub pid: u32,
    pub stdout: String,
    pub stderr: String,
    pub combined: String,
}

/// Wait/stream options. The default runs to completion with no sinks beyond
/// the capture buffers.
pub struct ExecOptions {
    /// Enforced wall-clock limit, if any.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation flag, typically set by a signal handler.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Mirror combined output to our stderr as it arrives.
    pub echo: bool,
    /// Mirror combined output into this file as it arrives.
    pub log: Option<File>,
    /// Grace between TERM and KILL when we have to stop the child.
    pub term_grace: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            cancel: None,
            echo: false,
            log: None,
            term_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

fn spawn_reader<R: Read + Send + 'static>(
    kind: StreamKind,
    reader: R,
    tx: mpsc::Sender<(StreamKind, Vec<u8>)>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = io::BufReader::new(reader);
        let mut chunk = [0u8; 8192];
        loop {
            match buf.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((kind, chunk[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// TERM the child, give it `grace` to exit, then KILL. Returns the reaped
/// status either way.
fn terminate(
    child: &mut std::process::Child,
    grace: Duration,
) -> io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    process::send_term(child.id());
    #[cfg(not(unix))]
    let _ = child.kill();

    match child.wait_timeout(grace)? {
        Some(status) => Ok(status),
        None => {
            let _ = child.kill();
            child.wait()
        }
    }
}

/// Run `cmd` under supervision. See the module docs for the streaming model.
pub fn run(cmd: &mut Command, opts: ExecOptions) -> io::Result<ExecOutcome> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let pid = child.id();

    let stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("failed to capture stdout"))?;
    let stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("failed to capture stderr"))?;

    let (tx, rx) = mpsc::channel::<(StreamKind, Vec<u8>)>();
    let r1 = spawn_reader(StreamKind::Stdout, stdout_pipe, tx.clone());
    let r2 = spawn_reader(StreamKind::Stderr, stderr_pipe, tx);

    let echo = opts.echo;
    let mut log = opts.log;
    let writer = std::thread::spawn(move || -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut combined = Vec::new();
        while let Ok((kind, chunk)) = rx.recv() {
            match kind {
                StreamKind::Stdout => out.extend_from_slice(&chunk),
                StreamKind::Stderr => err.extend_from_slice(&chunk),
            }
            combined.extend_from_slice(&chunk);
            if let Some(file) = log.as_mut() {
                let _ = file.write_all(&chunk);
            }
            if echo {
                let _ = io::stderr().write_all(&chunk);
            }
        }
        (out, err, combined)
    });

    // Sliced wait so cancellation and timeout are observed promptly without
    // busy-spinning.
    let slice = Duration::from_millis(250);
    let deadline = opts.timeout.map(|t| Instant::now() + t);
    let mut kind_override = None;
    let status = loop {
        if let Some(status) = child.wait_timeout(slice)? {
            break status;
        }
        if let Some(flag) = &opts.cancel {
            if flag.load(Ordering::SeqCst) {
                kind_override = Some(ExitKind::Interrupted);
                break terminate(&mut child, opts.term_grace)?;
            }
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                kind_override = Some(ExitKind::TimedOut);
                break terminate(&mut child, opts.term_grace)?;
            }
        }
    };

    let _ = r1.join();
    let _ = r2.join();
    let (out, err, combined) = writer
        .join()
        .map_err(|_| io::Error::other("output writer thread panicked"))?;

    let mut exit_code = 1;
    match status.code() {
        Some(code) => exit_code = code,
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(sig) = status.signal() {
                    exit_code = 128 + sig;
                }
            }
        }
    }

    Ok(ExecOutcome {
        kind: kind_override.unwrap_or(ExitKind::Exited(exit_code)),
        pid,
        stdout: String::from_utf8_lossy(&out).into_owned(),
        stderr: String::from_utf8_lossy(&err).into_owned(),
        combined: String::from_utf8_lossy(&combined).into_owned(),
    })
}

/// Last non-empty line of a captured stream, used for machine-readable
/// trailing-line contracts.
pub fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().find(|line| !line.trim().is_empty())
}
