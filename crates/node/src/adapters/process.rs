//! SYNC_PROCESS: run a subprocess to completion with a kill timeout.

use std::process::Stdio;
use std::time::Duration;

use meshwork_core::form::{ProcessCommand, SyncProcess};
use meshwork_core::Clock;
use tokio::process::Command;
use tracing::debug;

/// Execute the form's command, filling `stdout`/`stderr`/`status` on
/// completion or `error` on spawn failure and timeout. The child is
/// killed when the timeout elapses.
pub async fn run(clock: &Clock, mut form: SyncProcess) -> SyncProcess {
    let started = clock.now();
    form.start_time = Some(started);

    let mut command = match &form.command {
        ProcessCommand::Shell(line) => {
            let mut command = Command::new("sh");
            command.arg("-c").arg(line);
            command
        }
        ProcessCommand::Argv(argv) => match argv.split_first() {
            Some((program, args)) => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
            None => {
                form.error = Some("empty argv".to_string());
                form.elapsed_time = Some(clock.now() - started);
                return form;
            }
        },
    };
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(timeout = form.timeout, "running process");
    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            form.error = Some(format!("spawn failed: {err}"));
            form.elapsed_time = Some(clock.now() - started);
            return form;
        }
    };

    let budget = Duration::from_secs_f64(form.timeout.max(0.0));
    match tokio::time::timeout(budget, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            form.stdout = Some(String::from_utf8_lossy(&output.stdout).into_owned());
            form.stderr = Some(String::from_utf8_lossy(&output.stderr).into_owned());
            form.status = output.status.code();
            form.error = None;
        }
        Ok(Err(err)) => {
            form.error = Some(format!("process wait failed: {err}"));
        }
        Err(_) => {
            // Dropping the wait future kills the child (kill_on_drop).
            form.error = Some(format!("process killed after {}s", form.timeout));
        }
    }

    form.elapsed_time = Some(clock.now() - started);
    form
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(command: ProcessCommand, timeout: f64) -> SyncProcess {
        SyncProcess {
            command,
            timeout,
            start_time: None,
            elapsed_time: None,
            stdout: None,
            stderr: None,
            status: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn shell_command_captures_stdout() {
        let clock = Clock::system();
        let result = run(&clock, form(ProcessCommand::Shell("echo hello".into()), 10.0)).await;
        assert_eq!(result.status, Some(0));
        assert_eq!(result.stdout.as_deref().map(str::trim), Some("hello"));
        assert!(result.error.is_none());
        assert!(result.start_time.is_some());
    }

    #[tokio::test]
    async fn argv_command_runs_without_a_shell() {
        let clock = Clock::system();
        let result = run(
            &clock,
            form(ProcessCommand::Argv(vec!["echo".into(), "$HOME".into()]), 10.0),
        )
        .await;
        // No shell expansion in argv mode
        assert_eq!(result.stdout.as_deref().map(str::trim), Some("$HOME"));
    }

    #[tokio::test]
    async fn failing_command_reports_status_and_stderr() {
        let clock = Clock::system();
        let result = run(
            &clock,
            form(ProcessCommand::Shell("echo oops >&2; exit 3".into()), 10.0),
        )
        .await;
        assert_eq!(result.status, Some(3));
        assert_eq!(result.stderr.as_deref().map(str::trim), Some("oops"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn missing_binary_sets_error() {
        let clock = Clock::system();
        let result = run(
            &clock,
            form(ProcessCommand::Argv(vec!["definitely-not-a-binary-xyz".into()]), 10.0),
        )
        .await;
        assert!(result.error.as_deref().unwrap_or_default().contains("spawn failed"));
        assert!(result.status.is_none());
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let clock = Clock::system();
        let result = run(&clock, form(ProcessCommand::Shell("sleep 30".into()), 0.2)).await;
        assert!(result.error.as_deref().unwrap_or_default().contains("killed"));
        assert!(result.status.is_none());
    }

    #[tokio::test]
    async fn empty_argv_is_an_error() {
        let clock = Clock::system();
        let result = run(&clock, form(ProcessCommand::Argv(vec![]), 1.0)).await;
        assert_eq!(result.error.as_deref(), Some("empty argv"));
    }
}
