//! Child process supervision: streamed output, deadline, group kill.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::core::errors::{HarnessError, Result};

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Captured output of a finished child.
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// How long to keep draining pipes after the group has been killed.
const DRAIN_AFTER_KILL: Duration = Duration::from_millis(500);
/// Poll step while waiting for exit once both pipes have closed.
const EXIT_POLL: Duration = Duration::from_millis(10);

/// Spawn `command` in its own process group and block until it exits or
/// `timeout` elapses. `echo` mirrors each line to stderr as it arrives.
pub fn run_to_completion(
    mut command: Command,
    program: &str,
    timeout: Duration,
    echo: bool,
) -> Result<Captured> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        command.process_group(0);
    }

    let started = Instant::now();
    // A timeout too large to represent as an instant never expires.
    let deadline = started.checked_add(timeout);
    let mut child = command.spawn().map_err(|source| HarnessError::SpawnFailed {
        program: program.to_string(),
        source,
    })?;

    let (tx, rx) = unbounded();
    if let Some(out) = child.stdout.take() {
        spawn_reader(out, Stream::Stdout, tx.clone());
    }
    if let Some(err) = child.stderr.take() {
        spawn_reader(err, Stream::Stderr, tx.clone());
    }
    drop(tx);

    let mut stdout = String::new();
    let mut stderr = String::new();

    loop {
        let next = match deadline {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok((stream, line)) => collect(&mut stdout, &mut stderr, stream, &line, echo),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                terminate(&mut child);
                drain(&rx, &mut stdout, &mut stderr, echo);
                return Err(HarnessError::ExecutionTimeout {
                    timeout,
                    stdout,
                    stderr,
                });
            }
        }
    }

    // Both pipes are closed; the child is exiting or detached its output.
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                terminate(&mut child);
                return Err(HarnessError::ExecutionTimeout {
                    timeout,
                    stdout,
                    stderr,
                });
            }
            Ok(None) => thread::sleep(EXIT_POLL),
            Err(source) => {
                terminate(&mut child);
                return Err(HarnessError::Io {
                    path: program.into(),
                    source,
                });
            }
        }
    };

    Ok(Captured {
        status,
        stdout,
        stderr,
        elapsed: started.elapsed(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: R,
    stream: Stream,
    tx: Sender<(Stream, String)>,
) {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        // Read to EOF; closing the pipe early would SIGPIPE the child.
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    // The receiver is gone after a timeout; keep draining anyway.
                    let _ = tx.send((stream, line));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    });
}

fn collect(stdout: &mut String, stderr: &mut String, stream: Stream, line: &str, echo: bool) {
    let buf = match stream {
        Stream::Stdout => stdout,
        Stream::Stderr => stderr,
    };
    buf.push_str(line);
    buf.push('\n');
    if echo {
        let tag = match stream {
            Stream::Stdout => "out",
            Stream::Stderr => "err",
        };
        eprintln!("[CSH-CHILD:{tag}] {line}");
    }
}

fn drain(
    rx: &Receiver<(Stream, String)>,
    stdout: &mut String,
    stderr: &mut String,
    echo: bool,
) {
    let until = Instant::now() + DRAIN_AFTER_KILL;
    while let Ok((stream, line)) = rx.recv_deadline(until) {
        collect(stdout, stderr, stream, &line, echo);
    }
}

/// Kill the child's whole process group and reap the child.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
