use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// A single submission, owned by the request that created it
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub language: String,
    pub source_code: String,
    pub workspace_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Uniform record produced once per job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub combined_output: String,
    /// 0 on success, 1 on any failure
    pub exit_status: u8,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.exit_status == 0 && !self.timed_out
    }
}

/// Incoming request body. Accepts both the simple `{language, code}` shape
/// and the Piston-style `{language, version, files: [{content}]}` shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub language: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<SourceFile>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceFile {
    #[serde(default)]
    pub name: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestShapeError {
    #[error("files array must contain at least one file")]
    EmptyFiles,
    #[error("request must contain either code or files")]
    MissingCode,
}

impl ExecuteRequest {
    /// Collapse either request shape into the `(language, code)` pair the core expects.
    /// `files` wins when both are present.
    pub fn into_submission(self) -> Result<(String, String), RequestShapeError> {
        let code = match (self.files, self.code) {
            (Some(files), _) => files
                .into_iter()
                .next()
                .map(|f| f.content)
                .ok_or(RequestShapeError::EmptyFiles)?,
            (None, Some(code)) => code,
            (None, None) => return Err(RequestShapeError::MissingCode),
        };
        Ok((self.language, code))
    }
}

/// Response body returned to the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub language: String,
    pub run: RunOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub output: String,
    pub code: u8,
    /// Always null; kept for Piston client compatibility
    pub signal: Option<String>,
}

impl ExecuteResponse {
    pub fn new(language: impl Into<String>, result: ExecutionResult) -> Self {
        Self {
            language: language.into(),
            run: RunOutput {
                stdout: result.stdout,
                stderr: result.stderr,
                output: result.combined_output,
                code: result.exit_status,
                signal: None,
            },
        }
    }
}

/// Entry in the `/runtimes` listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub language: String,
    pub version: String,
    pub image: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_shape() {
        let req: ExecuteRequest =
            serde_json::from_str(r#"{"language":"python","code":"print('hi')"}"#).unwrap();
        let (language, code) = req.into_submission().unwrap();
        assert_eq!(language, "python");
        assert_eq!(code, "print('hi')");
    }

    #[test]
    fn test_files_shape_takes_first_file() {
        let req: ExecuteRequest = serde_json::from_str(
            r#"{"language":"go","version":"*","files":[{"name":"a.go","content":"A"},{"content":"B"}]}"#,
        )
        .unwrap();
        assert_eq!(req.into_submission().unwrap().1, "A");
    }

    #[test]
    fn test_files_win_over_code() {
        let req: ExecuteRequest = serde_json::from_str(
            r#"{"language":"c","code":"ignored","files":[{"content":"used"}]}"#,
        )
        .unwrap();
        assert_eq!(req.into_submission().unwrap().1, "used");
    }

    #[test]
    fn test_shape_errors() {
        let empty: ExecuteRequest =
            serde_json::from_str(r#"{"language":"c","files":[]}"#).unwrap();
        assert_eq!(empty.into_submission(), Err(RequestShapeError::EmptyFiles));

        let missing: ExecuteRequest = serde_json::from_str(r#"{"language":"c"}"#).unwrap();
        assert_eq!(missing.into_submission(), Err(RequestShapeError::MissingCode));
    }

    #[test]
    fn test_response_wire_format() {
        let result = ExecutionResult {
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            combined_output: "hi\n".to_string(),
            exit_status: 0,
            timed_out: false,
        };
        let json = serde_json::to_value(ExecuteResponse::new("python", result)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "language": "python",
                "run": {
                    "stdout": "hi\n",
                    "stderr": "",
                    "output": "hi\n",
                    "code": 0,
                    "signal": null
                }
            })
        );
    }
}
