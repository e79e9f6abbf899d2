use std::process::Command;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Command '{command}' failed: {stderr}")]
    Failed { command: String, stderr: String },
}

/// Runs an external program and returns its stdout.
///
/// Everything the agent does to the host's network stack goes through this
/// trait, so a test (or a different backend) can stand in for the real tools.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
        let command = render_command(program, args);
        debug!(%command, "Running external command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                stderr = format!("exit status {}", output.status);
            }
            return Err(CommandError::Failed { command, stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub(crate) fn render_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_command_joins_arguments() {
        assert_eq!(render_command("wg", &[]), "wg");
        assert_eq!(render_command("wg", &["show", "wg0", "dump"]), "wg show wg0 dump");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_reports_failures() {
        let runner = SystemCommandRunner;
        assert_eq!(runner.run("echo", &["hello"]).unwrap().trim(), "hello");
        assert!(matches!(
            runner.run("false", &[]),
            Err(CommandError::Failed { .. })
        ));
        assert!(matches!(
            runner.run("/nonexistent/tridot-binary", &[]),
            Err(CommandError::Spawn { .. })
        ));
    }
}
