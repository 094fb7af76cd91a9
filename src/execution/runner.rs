use super::invocation::{collect_credentials, container_name};
use super::output_parse::{read_capped, AgentOutput};
use super::{
    build_invocation, io_error, parse_agent_output, plan_mounts, truncate_with_marker,
    ExecutionError, ExecutionLimits, ExecutionRequest, ExecutionResult, ExecutionStatus,
    InvocationSpec, OutputCapture,
};
use crate::config::{BackendConfig, Settings};
use crate::mounts::{MountPolicy, MountRequest};
use crate::runtime::StatePaths;
use crate::shared::process;
use crate::shared::time::now_ms;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

const WAIT_POLL: Duration = Duration::from_millis(20);
const STDERR_TAIL_CHARS: usize = 500;

/// Launches one isolated execution per call. Never retries; every failure is
/// folded into an `error` [`ExecutionResult`].
#[derive(Debug, Clone)]
pub struct ExecutionRunner {
    paths: StatePaths,
    backend: BackendConfig,
    credential_env: Vec<String>,
    policy: Arc<RwLock<MountPolicy>>,
}

impl ExecutionRunner {
    pub fn new(
        paths: StatePaths,
        backend: BackendConfig,
        credential_env: Vec<String>,
        policy: Arc<RwLock<MountPolicy>>,
    ) -> Self {
        Self {
            paths,
            backend,
            credential_env,
            policy,
        }
    }

    pub fn from_settings(
        paths: StatePaths,
        settings: &Settings,
        policy: Arc<RwLock<MountPolicy>>,
    ) -> Self {
        Self::new(
            paths,
            settings.backend.clone(),
            settings.credential_env.clone(),
            policy,
        )
    }

    pub fn run(
        &self,
        request: &ExecutionRequest,
        extra_mounts: &[MountRequest],
        limits: ExecutionLimits,
    ) -> ExecutionResult {
        let started = Instant::now();
        tracing::info!(
            group = %request.group_folder,
            scheduled = request.is_scheduled,
            resumed = request.session_id.is_some(),
            "execution starting"
        );

        let result = match self.execute(request, extra_mounts, limits) {
            Ok(output) => into_result(output, limits.max_output_bytes),
            Err(err) => {
                tracing::warn!(group = %request.group_folder, error = %err, "execution failed");
                ExecutionResult::failure(&err)
            }
        };

        tracing::info!(
            group = %request.group_folder,
            status = result.status.as_str(),
            duration_ms = started.elapsed().as_millis() as u64,
            "execution finished"
        );
        result
    }

    fn execute(
        &self,
        request: &ExecutionRequest,
        extra_mounts: &[MountRequest],
        limits: ExecutionLimits,
    ) -> Result<AgentOutput, ExecutionError> {
        let identity = request.identity();
        let (extras, allowlist_path) = {
            let policy = self.policy.read().unwrap_or_else(PoisonError::into_inner);
            (
                policy.resolve_all(&identity, extra_mounts),
                policy.allowlist_path().to_path_buf(),
            )
        };
        let mounts = plan_mounts(&self.paths, &identity, &extras, &allowlist_path);
        let credentials =
            collect_credentials(&self.credential_env, |key| std::env::var(key).ok());
        let name = container_name(&identity, now_ms());
        let spec = build_invocation(
            &self.backend,
            &self.paths,
            &identity,
            &mounts,
            &credentials,
            &name,
        )?;

        let mut payload = request.clone();
        payload.prompt = request.effective_prompt();
        let stdin_body = serde_json::to_vec(&payload)?;
        run_process(&spec, stdin_body, limits)
    }
}

fn into_result(output: AgentOutput, max_output_bytes: usize) -> ExecutionResult {
    let error_message = match output.status {
        ExecutionStatus::Error => Some(
            output
                .error
                .unwrap_or_else(|| "execution reported an error".to_string()),
        ),
        ExecutionStatus::Success => None,
    };
    ExecutionResult {
        status: output.status,
        output: output
            .result
            .map(|text| truncate_with_marker(&text, max_output_bytes)),
        new_session_id: output.new_session_id,
        error_message,
    }
}

fn run_process(
    spec: &InvocationSpec,
    stdin_body: Vec<u8>,
    limits: ExecutionLimits,
) -> Result<AgentOutput, ExecutionError> {
    let mut command = Command::new(&spec.binary);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if spec.clear_env {
        command.env_clear();
    }
    command.envs(&spec.env);
    // Own group, so a timeout also reaches anything the agent left running.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|source| ExecutionError::Spawn {
        binary: spec.binary.clone(),
        source,
    })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io_error(&spec.cwd, std::io::Error::other("missing stdin pipe")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_error(&spec.cwd, std::io::Error::other("missing stdout pipe")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_error(&spec.cwd, std::io::Error::other("missing stderr pipe")))?;

    // Dropping the handle at the end of the thread closes stdin.
    thread::spawn(move || {
        if let Err(err) = stdin.write_all(&stdin_body) {
            tracing::debug!(error = %err, "execution did not read the whole request");
        }
    });
    let limit = limits.max_output_bytes;
    let (stdout_tx, stdout_rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = stdout_tx.send(OutputCapture::new(limit).read_from(stdout));
    });
    let (stderr_tx, stderr_rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = stderr_tx.send(read_capped(stderr, limit));
    });

    let deadline = Instant::now() + limits.timeout;
    let timed_out = |child: &mut Child| {
        abort_execution(spec, child);
        ExecutionError::Timeout {
            timeout_ms: limits.timeout.as_millis() as u64,
        }
    };

    let exit_status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => return Err(timed_out(&mut child)),
            Ok(None) => thread::sleep(WAIT_POLL),
            Err(err) => return Err(io_error(&spec.cwd, err)),
        }
    };

    // Background processes inherit the pipes, so the readers only finish
    // once every holder is gone. They share the execution's deadline.
    let captured = match stdout_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(captured) => captured,
        Err(RecvTimeoutError::Timeout) => return Err(timed_out(&mut child)),
        Err(RecvTimeoutError::Disconnected) => {
            return Err(ExecutionError::MalformedFrame {
                reason: "stdout reader panicked".to_string(),
            })
        }
    };
    let stderr = match stderr_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(stderr) => stderr,
        Err(RecvTimeoutError::Timeout) => return Err(timed_out(&mut child)),
        Err(RecvTimeoutError::Disconnected) => String::new(),
    };
    tracing::debug!(
        diagnostics = %captured.diagnostics(),
        stderr = %stderr,
        "execution diagnostics"
    );

    if !exit_status.success() {
        return Err(ExecutionError::NonZeroExit {
            exit_code: exit_status.code().unwrap_or(-1),
            stderr: tail(&stderr, STDERR_TAIL_CHARS),
        });
    }

    parse_agent_output(captured.frame()?)
}

/// Stops a timed-out execution: the backend's own stop command first, then
/// the whole process group. Reader threads still blocked on the pipes are
/// abandoned and exit once the pipes close.
fn abort_execution(spec: &InvocationSpec, child: &mut Child) {
    if let Some(stop_args) = &spec.stop_args {
        match Command::new(&spec.binary)
            .args(stop_args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::debug!(
                binary = %spec.binary,
                code = status.code().unwrap_or(-1),
                "stop command failed; the execution may still be running"
            ),
            Err(err) => tracing::debug!(
                binary = %spec.binary,
                error = %err,
                "stop command could not be run; the execution may still be running"
            ),
        }
    }
    if !process::kill_process_group(child.id()) {
        let _ = child.kill();
    }
    let _ = child.wait();
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.trim().to_string();
    }
    text.chars()
        .skip(count - max_chars)
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_without_message_gets_generic_text() {
        let result = into_result(
            AgentOutput {
                status: ExecutionStatus::Error,
                result: None,
                new_session_id: None,
                error: None,
            },
            100,
        );
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(
            result.error_message.as_deref(),
            Some("execution reported an error")
        );
    }

    #[test]
    fn tail_keeps_the_end_of_long_stderr() {
        assert_eq!(tail("  short  ", 10), "short");
        assert_eq!(tail("abcdefghij", 3), "hij");
    }
}
