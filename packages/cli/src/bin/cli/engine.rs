// ABOUTME: Engine maintenance subcommands: languages, check, prefetch, and cleanup
// ABOUTME: Renders registry and engine state as tables or JSON for operators

use anyhow::{Context, Result};
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use hacklens_config as env_keys;
use hacklens_sandbox::{CodeExecutor, DockerProvider, LanguageRegistry, REGISTRY};
use std::sync::Arc;
use std::time::Duration;

use super::SettingsArgs;

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn languages_command(json: bool) -> Result<bool> {
    let profiles = REGISTRY.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(true);
    }

    let mut table = table();
    table.set_header(vec!["Language", "Name", "Aliases", "Image", "Source file"]);

    for profile in profiles {
        let source = match &profile.entry_point {
            Some(entry_point) => format!("{}.{}", entry_point, profile.extension),
            None => format!("<generated>.{}", profile.extension),
        };
        table.add_row(vec![
            profile.id.clone(),
            profile.display_name.clone(),
            profile.aliases.join(", "),
            profile.image.clone(),
            source,
        ]);
    }

    println!("{table}");
    Ok(true)
}

/// Build an executor without failing on an unreachable engine, so `check` can report it
fn unchecked_executor(settings: &SettingsArgs) -> Result<CodeExecutor> {
    let settings = settings.load()?;
    let provider = DockerProvider::with_pull_timeout(settings.pull_timeout())
        .context("Failed to configure Docker client")?;

    Ok(CodeExecutor::new(
        Arc::new(provider),
        Arc::new(LanguageRegistry::default()),
        settings,
    ))
}

pub async fn check_command(settings: &SettingsArgs, json: bool) -> Result<bool> {
    let executor = unchecked_executor(settings)?;
    let report = executor.health().await;

    if json {
        let value = serde_json::json!({
            "health": report,
            "settings": executor.settings(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(report.engine_available);
    }

    if report.engine_available {
        println!("{} Docker engine reachable", "✓".green().bold());
    } else {
        println!("{} Docker engine unreachable", "✗".red().bold());
    }
    println!("  Live sandboxes: {}", report.live_sandboxes);
    println!();

    let mut images = table();
    images.set_header(vec!["Language", "Image", "Local"]);
    for image in &report.images {
        let present = if image.present {
            "yes".green().to_string()
        } else {
            "no".yellow().to_string()
        };
        images.add_row(vec![image.language.clone(), image.image.clone(), present]);
    }
    println!("{images}");

    let mut variables = table();
    variables.set_header(vec!["Variable", "Value"]);
    for name in env_keys::ALL_EXEC_VARS {
        let value = std::env::var(name).unwrap_or_else(|_| "(default)".dimmed().to_string());
        variables.add_row(vec![name.to_string(), value]);
    }
    println!("{variables}");

    Ok(report.engine_available)
}

pub async fn prefetch_command(settings: &SettingsArgs, json: bool) -> Result<bool> {
    let executor = CodeExecutor::connect(settings.load()?)
        .await
        .context("Cannot reach the Docker engine")?;

    let outcomes = executor.prefetch_images().await;
    let ok = outcomes.iter().all(|outcome| outcome.error.is_none());

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(ok);
    }

    for outcome in &outcomes {
        match &outcome.error {
            None => println!("{} {}", "✓".green().bold(), outcome.image),
            Some(error) => println!("{} {}: {}", "✗".red().bold(), outcome.image, error),
        }
    }

    Ok(ok)
}

pub async fn cleanup_command(
    min_age_secs: u64,
    dry_run: bool,
    settings: &SettingsArgs,
    json: bool,
) -> Result<bool> {
    let executor = CodeExecutor::connect(settings.load()?)
        .await
        .context("Cannot reach the Docker engine")?;

    let report = executor
        .reap_orphans(Duration::from_secs(min_age_secs), dry_run)
        .await
        .context("Failed to enumerate sandboxes")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report.errors.is_empty());
    }

    if dry_run {
        println!(
            "Found {} orphaned sandboxes {}",
            report.found,
            "(dry run, none removed)".dimmed()
        );
    } else {
        println!(
            "Found {} orphaned sandboxes, removed {}",
            report.found, report.removed
        );
    }
    for error in &report.errors {
        println!("  {} {}", "✗".red(), error);
    }

    Ok(report.errors.is_empty())
}
