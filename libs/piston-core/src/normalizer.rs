/// Result Normalizer
///
/// **Core Responsibility:**
/// Map a sandbox `LaunchOutcome` into the uniform `ExecutionResult`.
///
/// **Critical Properties:**
/// - Knows nothing about Docker
/// - Knows nothing about language runtimes
/// - Total: every outcome yields exactly one result
///
/// **Mapping Rules:**
/// - Completed: exit status 0 only for exit code 0, otherwise 1
/// - TimedOut: exit status 1, `timed_out` set, stderr names the timeout when empty
/// - LaunchFailed: exit status 1, the reason becomes stderr

use crate::sandbox::LaunchOutcome;
use piston_common::types::ExecutionResult;

pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

pub fn normalize(outcome: LaunchOutcome) -> ExecutionResult {
    match outcome {
        LaunchOutcome::Completed {
            exit_code,
            stdout,
            stderr,
        } => ExecutionResult {
            combined_output: format!("{}{}", stdout, stderr),
            stdout,
            stderr,
            exit_status: if exit_code == 0 { 0 } else { 1 },
            timed_out: false,
        },
        LaunchOutcome::TimedOut { stdout, stderr } => {
            let stderr = if stderr.trim().is_empty() {
                TIMEOUT_MESSAGE.to_string()
            } else {
                stderr
            };
            ExecutionResult {
                combined_output: format!("{}{}", stdout, stderr),
                stdout,
                stderr,
                exit_status: 1,
                timed_out: true,
            }
        }
        LaunchOutcome::LaunchFailed { reason } => ExecutionResult {
            stdout: String::new(),
            stderr: reason.clone(),
            combined_output: reason,
            exit_status: 1,
            timed_out: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(code: i64, stdout: &str, stderr: &str) -> LaunchOutcome {
        LaunchOutcome::Completed {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_success() {
        let result = normalize(completed(0, "hi\n", ""));
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.combined_output, "hi\n");
        assert_eq!(result.exit_status, 0);
        assert!(!result.timed_out);
        assert!(result.is_success());
    }

    #[test]
    fn test_nonzero_exit_collapses_to_one() {
        for code in [1, 2, 137, 139, 255, -1] {
            let result = normalize(completed(code, "partial", "Traceback"));
            assert_eq!(result.exit_status, 1, "exit code {}", code);
            assert_eq!(result.combined_output, "partialTraceback");
            assert!(!result.timed_out);
        }
    }

    #[test]
    fn test_timeout_without_diagnostic() {
        let result = normalize(LaunchOutcome::TimedOut {
            stdout: "tick\n".to_string(),
            stderr: String::new(),
        });
        assert!(result.timed_out);
        assert_eq!(result.exit_status, 1);
        assert_eq!(result.stdout, "tick\n");
        assert_eq!(result.stderr, TIMEOUT_MESSAGE);
        assert_eq!(result.combined_output, format!("tick\n{}", TIMEOUT_MESSAGE));
    }

    #[test]
    fn test_timeout_keeps_sandbox_stderr() {
        let result = normalize(LaunchOutcome::TimedOut {
            stdout: String::new(),
            stderr: "warning: slow\n".to_string(),
        });
        assert_eq!(result.stderr, "warning: slow\n");
        assert!(result.timed_out);
    }

    #[test]
    fn test_launch_failed() {
        let result = normalize(LaunchOutcome::LaunchFailed {
            reason: "image not found".to_string(),
        });
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "image not found");
        assert_eq!(result.combined_output, "image not found");
        assert_eq!(result.exit_status, 1);
        assert!(!result.timed_out);
    }
}
