// ABOUTME: Request and result types exposed to callers of the execution engine
// ABOUTME: Defines the {language, code} request and the {status, output} result wire shapes

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ErrorKind, ExecutionError};
use crate::providers::CapturedOutput;

/// Marker appended to output cut at the configured limit
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// A single source submission. Never carries host paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Outcome returned for every request, including failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

impl ExecutionResult {
    pub fn success(output: String) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output,
            diagnostic: None,
            error_kind: None,
            exit_code: Some(0),
        }
    }

    /// Failure with no program output: the diagnostic doubles as the output
    pub fn failure(kind: ErrorKind, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        Self {
            status: ExecutionStatus::Error,
            output: diagnostic.clone(),
            diagnostic: Some(diagnostic),
            error_kind: Some(kind),
            exit_code: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

impl From<ExecutionError> for ExecutionResult {
    fn from(err: ExecutionError) -> Self {
        ExecutionResult::failure(err.kind(), err.to_string())
    }
}

/// Decode captured bytes, dropping a multi-byte character split by truncation
pub fn render_output(captured: &CapturedOutput) -> String {
    let mut bytes = captured.data.as_slice();

    if captured.truncated {
        if let Err(e) = std::str::from_utf8(bytes) {
            if e.error_len().is_none() {
                bytes = &bytes[..e.valid_up_to()];
            }
        }
    }

    let mut output = String::from_utf8_lossy(bytes).into_owned();
    if captured.truncated {
        output.push_str(TRUNCATION_MARKER);
    }
    output
}

pub(crate) fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_success_wire_shape() {
        let result = ExecutionResult::success("hi\n".to_string());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"status": "success", "output": "hi\n", "exit_code": 0}));
    }

    #[test]
    fn test_failure_wire_shape() {
        let result: ExecutionResult =
            ExecutionError::UnsupportedLanguage("ruby".to_string()).into();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "error",
                "output": "unsupported language: ruby",
                "diagnostic": "unsupported language: ruby",
                "error_kind": "unsupported_language"
            })
        );
    }

    #[test]
    fn test_request_deserializes_from_wire() {
        let request: ExecutionRequest =
            serde_json::from_str(r#"{"language": "python", "code": "print(1)"}"#).unwrap();
        assert_eq!(request, ExecutionRequest::new("python", "print(1)"));
    }

    #[test]
    fn test_render_output_untruncated_is_lossy() {
        let captured = CapturedOutput {
            data: vec![b'o', b'k', 0xff],
            truncated: false,
        };
        assert_eq!(render_output(&captured), "ok\u{fffd}");
    }

    #[test]
    fn test_render_output_drops_split_character() {
        // "é" is two bytes; keep only the first
        let mut data = b"caf".to_vec();
        data.push(0xc3);
        let captured = CapturedOutput {
            data,
            truncated: true,
        };
        assert_eq!(render_output(&captured), format!("caf{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(20)), "20s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    }
}
