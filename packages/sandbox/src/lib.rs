// ABOUTME: Sandboxed execution engine for untrusted multi-language source code
// ABOUTME: Runs each submission in a throwaway, network-isolated container and always removes it

pub mod archive;
pub mod error;
pub mod executor;
pub mod languages;
pub mod lifecycle;
pub mod providers;
pub mod settings;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use error::{ErrorKind, ExecutionError};
pub use executor::{CodeExecutor, HealthReport, ImageStatus, PrefetchOutcome, ReapReport};
pub use languages::{LanguageProfile, LanguageRegistry, RegistryError, REGISTRY};
pub use lifecycle::{RunReport, SandboxLifecycle, SandboxState, SANDBOX_NAME_PREFIX};
pub use providers::{DockerProvider, Provider, ProviderError};
pub use settings::{ExecutorSettings, PullPolicy, SettingsError};
pub use types::{ExecutionRequest, ExecutionResult, ExecutionStatus};
