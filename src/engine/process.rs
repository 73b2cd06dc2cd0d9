//! Bounded child-process execution

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{EngineError, EngineOutput, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run `command` to completion, killing it once `timeout` has elapsed.
///
/// stdout and stderr are drained on their own threads so a chatty child
/// cannot block on a full pipe while we wait for it.
pub fn run_bounded(mut command: Command, timeout: Duration) -> Result<EngineOutput> {
    let program = command.get_program().to_string_lossy().into_owned();

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| EngineError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        let polled = child.try_wait().map_err(|source| EngineError::Io {
            program: program.clone(),
            source,
        })?;
        match polled {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                // Reader threads finish on their own once the pipes close.
                let _ = child.kill();
                let _ = child.wait();
                log::warn!("`{}` killed after {:?}", program, timeout);
                return Err(EngineError::Timeout { program, timeout });
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    Ok(EngineOutput {
        exit_code: status.code(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
