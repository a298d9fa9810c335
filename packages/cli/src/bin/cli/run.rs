// ABOUTME: `run` subcommand executing one source file through the sandboxed engine
// ABOUTME: Prints program output, or the full result as JSON, and reports failure via exit status

use anyhow::{bail, Context, Result};
use colored::*;
use hacklens_sandbox::{CodeExecutor, ExecutionRequest, ExecutionResult};
use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::{infer_language, SettingsArgs};

fn read_source(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read source from stdin")?;
        return Ok(source);
    }

    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

pub async fn run_command(
    file: &Path,
    language: Option<String>,
    settings: &SettingsArgs,
    json: bool,
) -> Result<bool> {
    let language = match language {
        Some(language) => language,
        None => match infer_language(file) {
            Some(language) => language.to_string(),
            None => bail!(
                "Cannot infer a language for {}; pass --language",
                file.display()
            ),
        },
    };

    debug!("Running {} as {}", file.display(), language);
    let source = read_source(file)?;
    let settings = settings.load()?;
    let executor = CodeExecutor::connect(settings)
        .await
        .context("Cannot reach the Docker engine")?;

    let result = executor
        .execute(ExecutionRequest::new(language, source))
        .await;

    print_result(&result, json)?;
    Ok(result.is_success())
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    print!("{}", result.output);
    if !result.output.ends_with('\n') && !result.output.is_empty() {
        println!();
    }

    if !result.is_success() {
        let kind = result
            .error_kind
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "error".to_string());
        match &result.diagnostic {
            Some(diagnostic) if diagnostic != &result.output => {
                eprintln!("{} {} ({})", "✗".red().bold(), diagnostic, kind);
            }
            _ => eprintln!("{} {}", "✗".red().bold(), kind),
        }
    }

    Ok(())
}
