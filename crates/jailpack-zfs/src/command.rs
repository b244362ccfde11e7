//! Spawns the `zfs` binary. Control commands run under a timeout; send and
//! receive stream through stdout/stdin for as long as the transfer takes.

use jailpack_core::error::{JailpackError, JailpackResult};
use log::debug;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
/// Wraps a concrete binary path and timeout used to run ZFS CLI commands.
pub struct CommandRunner {
    path: PathBuf,
    timeout: Duration,
}

#[derive(Debug)]
/// Collects stdout, stderr, and exit status from a finished command.
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

type ReaderHandle = thread::JoinHandle<JailpackResult<String>>;

impl CommandRunner {
    /// Build a new runner targeting the supplied binary and timeout.
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    /// Return the binary path this runner will execute.
    pub fn binary(&self) -> &std::path::Path {
        &self.path
    }

    /// Execute the binary with arguments and capture the result, killing it
    /// once the timeout elapses.
    pub fn run(&self, args: &[&str]) -> JailpackResult<Output> {
        debug!("{} {}", self.path.display(), args.join(" "));
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe)
    }

    /// Run the binary and copy its stdout into `sink` until it exits.
    ///
    /// Returns the number of bytes copied alongside the exit status; stdout in
    /// the returned `Output` is always empty.
    pub fn stream_out(&self, args: &[&str], sink: &mut dyn Write) -> JailpackResult<(u64, Output)> {
        debug!("{} {} > stream", self.path.display(), args.join(" "));
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr_handle = Self::spawn_output_reader(child.stderr.take());
        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, sink),
            None => Ok(0),
        };

        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(err) => {
                Self::abort(&mut child);
                let _ = stderr_handle.join();
                return Err(err.into());
            }
        };

        let status = child.wait()?;
        let stderr = Self::join_reader(stderr_handle, "stderr")?;
        Ok((
            bytes,
            Output {
                stdout: String::new(),
                stderr,
                status: status.code().unwrap_or(-1),
            },
        ))
    }

    /// Run the binary with `source` copied into its stdin.
    ///
    /// A write failure after the child exited on its own is reported through
    /// the exit status, so the caller sees the command's diagnostic.
    pub fn stream_in(&self, args: &[&str], source: &mut dyn Read) -> JailpackResult<Output> {
        debug!("{} {} < stream", self.path.display(), args.join(" "));
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_handle = Self::spawn_output_reader(child.stdout.take());
        let stderr_handle = Self::spawn_output_reader(child.stderr.take());

        let copied = match child.stdin.take() {
            Some(mut stdin) => io::copy(source, &mut stdin).and_then(|_| stdin.flush()),
            None => Ok(()),
        };

        let status = child.wait()?;
        let stdout = Self::join_reader(stdout_handle, "stdout")?;
        let stderr = Self::join_reader(stderr_handle, "stderr")?;
        let status = status.code().unwrap_or(-1);

        if let Err(err) = copied {
            if status == 0 {
                return Err(err.into());
            }
            debug!("stdin copy to {} stopped early: {err}", self.path.display());
        }

        Ok(Output {
            stdout,
            stderr,
            status,
        })
    }

    /// Wait for the child process until it finishes or exceeds the configured timeout.
    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> JailpackResult<Output> {
        let start = Instant::now();
        let stdout_handle = Self::spawn_output_reader(stdout_pipe);
        let stderr_handle = Self::spawn_output_reader(stderr_pipe);
        let mut exit_status = None;

        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        let Some(exit_status) = exit_status else {
            Self::abort(&mut child);
            return Err(JailpackError::VolumeEngine(format!(
                "{} timed out after {:?}",
                self.path.display(),
                self.timeout
            )));
        };

        let stdout = Self::join_reader(stdout_handle, "stdout")?;
        let stderr = Self::join_reader(stderr_handle, "stderr")?;

        Ok(Output {
            stdout,
            stderr,
            status: exit_status.code().unwrap_or(-1),
        })
    }

    fn abort(child: &mut Child) {
        let _ = child.kill();
        let _ = child.wait();
    }

    fn join_reader(handle: ReaderHandle, pipe: &str) -> JailpackResult<String> {
        handle
            .join()
            .map_err(|_| JailpackError::VolumeEngine(format!("{pipe} reader thread panicked")))?
    }

    /// Spin up a helper thread to drain a pipe and return the collected text.
    fn spawn_output_reader<R>(pipe: Option<R>) -> ReaderHandle
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || -> JailpackResult<String> {
            if let Some(mut reader) = pipe {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(String::from_utf8_lossy(&buf).to_string())
            } else {
                Ok(String::new())
            }
        })
    }
}
