// ABOUTME: Tests for execution engine behavior when the Docker daemon cannot be reached
// ABOUTME: Verifies requests come back as error results instead of panics or hangs

use bollard::{Docker, API_DEFAULT_VERSION};
use hacklens_sandbox::{
    CodeExecutor, DockerProvider, ErrorKind, ExecutionRequest, ExecutionStatus, ExecutorSettings,
    LanguageRegistry, Provider,
};
use std::sync::Arc;

/// Nothing listens on port 1, so every request is refused
const DEAD_ENGINE: &str = "http://127.0.0.1:1";

fn unreachable_provider() -> DockerProvider {
    let client = Docker::connect_with_http(DEAD_ENGINE, 2, API_DEFAULT_VERSION)
        .expect("http client construction performs no I/O");
    DockerProvider::with_client(client)
}

fn unreachable_executor() -> CodeExecutor {
    CodeExecutor::new(
        Arc::new(unreachable_provider()),
        Arc::new(LanguageRegistry::default()),
        ExecutorSettings {
            teardown_timeout_secs: 2,
            ..Default::default()
        },
    )
}

/// Test that a ping against a missing daemon reports unavailability
#[tokio::test]
async fn test_unreachable_engine_is_not_available() {
    let provider = unreachable_provider();
    assert!(!provider.is_available().await.unwrap());
}

/// Test that execution against a missing daemon yields a retryable error result
#[tokio::test]
async fn test_execute_without_engine_returns_error_result() {
    let executor = unreachable_executor();

    let result = executor
        .execute(ExecutionRequest::new("python", "print('hi')"))
        .await;

    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.error_kind, Some(ErrorKind::EngineUnavailable));
    assert!(ErrorKind::EngineUnavailable.is_retryable());
    assert!(!result.output.is_empty());
}

/// Test that validation failures never reach the engine
#[tokio::test]
async fn test_unsupported_language_without_engine() {
    let executor = unreachable_executor();

    let result = executor
        .execute(ExecutionRequest::new("brainfuck", "+++"))
        .await;

    assert_eq!(result.output, "unsupported language: brainfuck");
}

/// Test that health degrades rather than failing
#[tokio::test]
async fn test_health_without_engine() {
    let executor = unreachable_executor();

    let report = executor.health().await;

    assert!(!report.engine_available);
    assert!(report.images.iter().all(|image| !image.present));
    assert_eq!(report.images.len(), executor.languages().len());
}

/// Test that startup connection surfaces an informative error when Docker is down
#[tokio::test]
async fn test_connect_error_is_informative() {
    match CodeExecutor::connect(ExecutorSettings::default()).await {
        Ok(_) => {
            println!("Note: Docker is available. This test verifies behavior when Docker is unavailable.");
        }
        Err(e) => {
            let error_msg = e.to_string();
            assert!(
                error_msg.contains("engine unavailable"),
                "Error message should explain the engine is unreachable: {}",
                error_msg
            );
        }
    }
}
