// ABOUTME: Language profile registry describing how to build and run each supported language
// ABOUTME: Loads profile definitions from config/languages.json once and serves read-only lookups

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Failed to load language registry: {0}")]
    LoadError(String),

    #[error("unsupported language: {0}")]
    NotFound(String),

    #[error("Invalid language profile '{id}': {reason}")]
    InvalidProfile { id: String, reason: String },

    #[error("Duplicate language identifier: {0}")]
    Duplicate(String),
}

type Result<T> = std::result::Result<T, RegistryError>;

/// Placeholders a command template may reference
pub const PLACEHOLDERS: &[&str] = &["{file}", "{stem}", "{workdir}"];

lazy_static! {
    /// Process-wide registry built from the embedded language table
    pub static ref REGISTRY: LanguageRegistry =
        LanguageRegistry::new().expect("embedded config/languages.json must be a valid registry");
}

/// How one language is built and run inside a sandbox
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LanguageProfile {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub image: String,
    pub extension: String,
    /// Mandatory entry-point name (e.g. `Main` for Java). Generated per request when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    pub command: Vec<String>,
}

/// Source filename chosen for one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub filename: String,
    pub stem: String,
}

impl LanguageProfile {
    pub fn has_fixed_entry_point(&self) -> bool {
        self.entry_point.is_some()
    }

    /// Pick the source filename: the fixed entry point, or a fresh unique name
    pub fn source_file(&self) -> SourceFile {
        let stem = match &self.entry_point {
            Some(entry_point) => entry_point.clone(),
            None => Uuid::new_v4().simple().to_string(),
        };

        SourceFile {
            filename: format!("{}.{}", stem, self.extension),
            stem,
        }
    }

    /// Render the command template for a source file. Output depends only on its inputs.
    pub fn render_command(&self, source: &SourceFile, workdir: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|part| {
                part.replace("{workdir}", workdir)
                    .replace("{file}", &source.filename)
                    .replace("{stem}", &source.stem)
            })
            .collect()
    }

    fn invalid(&self, reason: impl Into<String>) -> RegistryError {
        RegistryError::InvalidProfile {
            id: self.id.clone(),
            reason: reason.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(self.invalid("identifier is empty"));
        }
        if self.id != normalize_language(&self.id) {
            return Err(self.invalid("identifier must be lowercase without surrounding whitespace"));
        }
        if self.image.trim().is_empty() {
            return Err(self.invalid("image is empty"));
        }
        if self.extension.is_empty() || !self.extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(self.invalid(format!("invalid extension '{}'", self.extension)));
        }

        if let Some(entry_point) = &self.entry_point {
            let valid = !entry_point.is_empty()
                && entry_point
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(self.invalid(format!("invalid entry point '{}'", entry_point)));
            }
        }

        if self.command.is_empty() {
            return Err(self.invalid("command is empty"));
        }
        if !self.command.iter().any(|part| part.contains("{file}")) {
            return Err(self.invalid("command never references {file}"));
        }

        for part in &self.command {
            for placeholder in placeholders_in(part) {
                if !PLACEHOLDERS.contains(&placeholder) {
                    return Err(self.invalid(format!("unknown placeholder {}", placeholder)));
                }
            }

            // Absolute paths must live under the sandbox working directory
            for word in part.split_whitespace() {
                let word = word.trim_start_matches(['\'', '"', '(']);
                if word.starts_with('/') {
                    return Err(self.invalid(format!(
                        "command references path '{}' outside {{workdir}}",
                        word
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Extract `{...}` tokens from a template fragment
fn placeholders_in(part: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = part;
    while let Some(start) = rest.find('{') {
        match rest[start..].find('}') {
            Some(len) => {
                found.push(&rest[start..start + len + 1]);
                rest = &rest[start + len + 1..];
            }
            None => {
                found.push(&rest[start..]);
                break;
            }
        }
    }
    found
}

/// Canonical form of a language identifier used for lookups
pub fn normalize_language(language: &str) -> String {
    language.trim().to_lowercase()
}

#[derive(Debug, Deserialize)]
struct LanguagesConfig {
    version: String,
    languages: Vec<LanguageProfile>,
}

/// Immutable table of language profiles keyed by identifier and alias
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: Vec<LanguageProfile>,
    index: HashMap<String, usize>,
}

impl LanguageRegistry {
    /// Create a registry from the embedded config/languages.json
    pub fn new() -> Result<Self> {
        Self::from_json(include_str!("../config/languages.json"))
    }

    /// Create a registry from a JSON document with the same shape as the embedded table
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LanguagesConfig =
            serde_json::from_str(json).map_err(|e| RegistryError::LoadError(e.to_string()))?;

        debug!(
            "Loaded language table v{} with {} profiles",
            config.version,
            config.languages.len()
        );

        Self::from_profiles(config.languages)
    }

    pub fn from_profiles(profiles: Vec<LanguageProfile>) -> Result<Self> {
        let mut index = HashMap::new();

        for (position, profile) in profiles.iter().enumerate() {
            profile.validate()?;

            let keys = std::iter::once(profile.id.clone())
                .chain(profile.aliases.iter().map(|alias| normalize_language(alias)));
            for key in keys {
                if key.is_empty() {
                    return Err(profile.invalid("alias is empty"));
                }
                if index.insert(key.clone(), position).is_some() {
                    return Err(RegistryError::Duplicate(key));
                }
            }
        }

        Ok(Self { profiles, index })
    }

    /// Resolve an identifier or alias, case-insensitively
    pub fn resolve(&self, language: &str) -> Result<&LanguageProfile> {
        let key = normalize_language(language);
        self.index
            .get(&key)
            .map(|&position| &self.profiles[position])
            .ok_or(RegistryError::NotFound(key))
    }

    /// Profile for a source file extension: the first profile using it, else an alias match
    pub fn for_extension(&self, extension: &str) -> Option<&LanguageProfile> {
        let extension = normalize_language(extension);
        self.profiles
            .iter()
            .find(|profile| profile.extension.eq_ignore_ascii_case(&extension))
            .or_else(|| self.resolve(&extension).ok())
    }

    /// Profiles in table order
    pub fn list(&self) -> Vec<&LanguageProfile> {
        self.profiles.iter().collect()
    }

    /// Distinct images referenced by the table, in table order
    pub fn images(&self) -> Vec<&str> {
        let mut images: Vec<&str> = Vec::new();
        for profile in &self.profiles {
            if !images.contains(&profile.image.as_str()) {
                images.push(&profile.image);
            }
        }
        images
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        REGISTRY.clone()
    }
}
