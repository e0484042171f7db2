//! Blocking subprocess execution with an optional deadline.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll interval while waiting on a child with a deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for a killed child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured result of a finished process.
#[derive(Debug)]
pub(crate) struct Captured {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run `command` to completion, capturing both output streams.
///
/// Stdin is closed. With a timeout the child is killed once the deadline
/// passes and `Ok(None)` is returned.
pub(crate) fn run(mut command: Command, timeout: Option<Duration>) -> io::Result<Option<Captured>> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let Some(timeout) = timeout else {
        let output = command.output()?;
        return Ok(Some(Captured {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        }));
    };

    let mut child = command.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            kill_and_reap(&mut child);
            // A grandchild may still hold the pipes; leave the readers detached.
            drop(stdout);
            drop(stderr);
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Some(Captured {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
    }))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("Failed to kill engine process {}: {}", child.id(), e);
    }
    let deadline = Instant::now() + REAP_TIMEOUT;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Ok(Some(_)) | Err(_) => return,
        }
    }
    tracing::warn!("Engine process {} could not be reaped after kill", child.id());
}
