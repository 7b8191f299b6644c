//! Execution wrapper for the host tools partinject shells out to.
//!
//! Keeping process handling in one place lets the parsers and providers stay
//! testable with fake binaries and canned output.

use log::debug;
use partinject_core::error::{InjectError, InjectResult};
use std::env;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// A resolved binary plus the optional deadline applied to each run.
#[derive(Debug, Clone)]
pub(crate) struct ToolCommand {
    binary: PathBuf,
    timeout: Option<Duration>,
}

#[derive(Debug)]
pub(crate) struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Prefer stderr, fall back to stdout, never empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else if !stdout.is_empty() {
            stdout.to_string()
        } else {
            "no additional output".to_string()
        }
    }
}

impl ToolCommand {
    pub(crate) fn new(binary: PathBuf, timeout: Option<Duration>) -> Self {
        Self { binary, timeout }
    }

    pub(crate) fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run the tool to completion, capturing stdout and stderr.
    ///
    /// Spawn failures surface as `InjectError::Io`; a non-zero exit is
    /// reported through `Output::status` for the caller to classify.
    pub(crate) fn run<I, S>(&self, args: I) -> InjectResult<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        debug!("running {:?}", command);

        let mut child = command.spawn()?;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait(child, stdout_pipe, stderr_pipe)
    }

    fn wait(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> InjectResult<Output> {
        let stdout_handle = spawn_output_reader(stdout_pipe);
        let stderr_handle = spawn_output_reader(stderr_pipe);

        let exit_status = match self.timeout {
            None => child.wait()?,
            Some(timeout) => wait_with_deadline(&mut child, timeout).ok_or_else(|| {
                InjectError::Provider(format!(
                    "{} timed out after {:?}",
                    self.binary.display(),
                    timeout
                ))
            })??,
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| InjectError::Provider("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| InjectError::Provider("stderr reader thread panicked".into()))??;

        Ok(Output {
            stdout,
            stderr,
            status: exit_status.code().unwrap_or(-1),
        })
    }
}

/// Poll until the child exits; kill it and return `None` once `timeout` passes.
fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> Option<std::io::Result<ExitStatus>> {
    let start = Instant::now();
    while start.elapsed() <= timeout {
        match child.try_wait() {
            Ok(Some(status)) => return Some(Ok(status)),
            Ok(None) => thread::sleep(Duration::from_millis(25)),
            Err(err) => return Some(Err(err)),
        }
    }
    let _ = child.kill();
    let _ = child.wait();
    None
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<InjectResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> InjectResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}

/// Pick the configured binary, then the first existing well-known path, then `PATH`.
pub(crate) fn resolve_binary(
    name: &str,
    configured: Option<&str>,
    known: &[&str],
) -> InjectResult<PathBuf> {
    if let Some(path) = configured.map(str::trim).filter(|path| !path.is_empty()) {
        let candidate = Path::new(path);
        if !candidate.exists() {
            return Err(InjectError::InvalidConfig(format!(
                "{name} binary not found at {}",
                candidate.display()
            )));
        }
        return Ok(candidate.to_path_buf());
    }

    for candidate in known {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }

    find_in_path(name).ok_or_else(|| {
        InjectError::InvalidConfig(format!(
            "unable to locate {name} binary; tried {known:?} and PATH"
        ))
    })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.exists() {
            Some(candidate)
        } else {
            None
        }
    })
}
