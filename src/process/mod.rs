//! Worker process execution: spawn, capture, bound by a timeout.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    task::JoinHandle,
    time::{timeout, timeout_at, Instant},
};

use crate::error::{EngineError, EngineResult};

pub mod argv;
pub mod python;

use argv::{build_argv, Invocation, Platform};

/// Extra time given to the output readers once the process has exited.
const READER_GRACE: Duration = Duration::from_secs(2);

/// One fully described worker invocation. Built with the consuming
/// setters below and not modified afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    program: PathBuf,
    args: Vec<String>,
    work_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl ExecutionRequest {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
            env: BTreeMap::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Environment override, merged over the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    pub fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Normalized outcome of one process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionResult {
    /// A timed out run is a failure whatever its exit code says.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Run `request` to completion or until its timeout fires.
///
/// Spawn failures are reported as [`EngineError::SpawnFailed`]; anything that
/// started is returned as an [`ExecutionResult`], including non-zero exits.
pub async fn run(request: &ExecutionRequest) -> EngineResult<ExecutionResult> {
    let program = request.program.to_string_lossy().into_owned();
    let invocation = build_argv(Platform::current(), &program, &request.args);
    tracing::info!(
        program = %program,
        args = ?request.args,
        timeout_secs = request.timeout.as_secs(),
        "spawning worker"
    );

    let mut cmd = command_for(&invocation);
    if let Some(dir) = &request.work_dir {
        cmd.current_dir(dir);
    }
    cmd.envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW

    let started = Instant::now();
    let deadline = started + request.timeout;
    let mut child = cmd.spawn().map_err(|source| {
        tracing::error!(program = %program, error = %source, "failed to start worker");
        EngineError::SpawnFailed {
            program: program.clone(),
            source,
        }
    })?;
    let pid = child.id();

    let stdout_task = child.stdout.take().map(|s| tokio::spawn(capture(s, "stdout")));
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(capture(s, "stderr")));

    let (status, timed_out) = match timeout_at(deadline, child.wait()).await {
        Ok(status) => (status?, false),
        Err(_) => {
            tracing::error!(
                program = %program,
                timeout_secs = request.timeout.as_secs(),
                "worker timed out, terminating"
            );
            kill_tree(&mut child, pid);
            (child.wait().await?, true)
        }
    };

    let readers = async { tokio::join!(join_capture(stdout_task), join_capture(stderr_task)) };
    tokio::pin!(readers);
    let reader_deadline = deadline.max(Instant::now()) + READER_GRACE;
    let (stdout, stderr) = match timeout_at(reader_deadline, &mut readers).await {
        Ok(output) => output,
        Err(_) => {
            // A descendant still holds the pipes open.
            tracing::warn!(program = %program, "worker output still open after exit, killing group");
            kill_tree(&mut child, pid);
            timeout(READER_GRACE, &mut readers)
                .await
                .unwrap_or_default()
        }
    };

    let result = ExecutionResult {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
    };
    tracing::info!(
        program = %program,
        exit_code = ?result.exit_code,
        timed_out,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "worker finished"
    );
    Ok(result)
}

fn command_for(invocation: &Invocation) -> Command {
    let mut cmd = Command::new(&invocation.program);
    if invocation.via_shell {
        #[cfg(windows)]
        for arg in &invocation.args {
            cmd.raw_arg(arg);
        }
        #[cfg(not(windows))]
        cmd.args(&invocation.args);
    } else {
        cmd.args(&invocation.args);
    }
    cmd
}

async fn capture<R>(mut reader: R, stream: &'static str) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = &buf[..n];
                if stream == "stderr" {
                    tracing::debug!(stream, chunk = %String::from_utf8_lossy(chunk).trim_end(), "worker output");
                } else {
                    tracing::trace!(stream, chunk = %String::from_utf8_lossy(chunk).trim_end(), "worker output");
                }
                out.extend_from_slice(chunk);
            }
            Err(e) => {
                tracing::warn!(stream, error = %e, "worker stream read failed");
                break;
            }
        }
    }
    out
}

async fn join_capture(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Kill the child and, on Unix, every process in its group.
fn kill_tree(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::{
            sys::signal::{killpg, Signal},
            unistd::Pid,
        };
        // The child was spawned as the leader of its own process group.
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!(pid, error = %e, "process group already gone");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
    let _ = child.start_kill();
}
