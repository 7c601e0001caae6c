use crate::error::EvalError;
use crate::models::{Locale, OptionSet};
use serde::Deserialize;
use std::path::Path;

/// System/human template pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub human: String,
}

impl PromptTemplate {
    pub fn new(system: impl Into<String>, human: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            human: human.into(),
        }
    }

    /// Fill `{question}` and `{options}`
    pub fn render_question(&self, question: &str, options: &OptionSet) -> String {
        fill_placeholders(&self.human, &[("question", question), ("options", &options.render())])
    }

    /// Fill `{query}` and `{answer}` for the label-checking judge
    pub fn render_check(&self, query: &str, answer: &str) -> String {
        fill_placeholders(&self.human, &[("query", query), ("answer", answer)])
    }
}

/// Substitute `{name}` placeholders in one pass over the template, so braces
/// inside substituted values are left alone. Unknown names stay literal.
fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail.find('}').and_then(|close| {
            let name = &tail[1..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Resolved prompt release
#[derive(Debug, Clone)]
pub struct PromptManager {
    pub name: String,
    pub locale: Locale,
    pub version: String,
    pub releases: Vec<String>,
    pub template: PromptTemplate,
}

impl PromptManager {
    /// Resolve `<root>/<locale>/<name>/<version>.yaml`
    pub fn load(root: &Path, name: &str, locale: Locale, version: &str) -> Result<Self, EvalError> {
        if !(version == "latest" || version.matches('-').count() == 2) {
            return Err(EvalError::Configuration(
                "prompt version must be 'latest' or in the format 'YYYY-MM-DD'".to_string(),
            ));
        }

        let prompt_dir = root.join(locale.as_str()).join(name);
        let releases = list_releases(&prompt_dir)?;

        let version = if version == "latest" {
            releases
                .last()
                .cloned()
                .ok_or_else(|| EvalError::Configuration(format!(
                    "no .yaml prompt files found in '{}'",
                    prompt_dir.display()
                )))?
        } else if releases.iter().any(|r| r == version) {
            version.to_string()
        } else {
            return Err(EvalError::Configuration(format!(
                "prompt version '{}' not in releases: {:?}",
                version, releases
            )));
        };

        let path = prompt_dir.join(format!("{}.yaml", version));
        let content = std::fs::read_to_string(&path).map_err(|source| EvalError::Read {
            path: path.clone(),
            source,
        })?;
        let template: PromptTemplate = if content.trim().is_empty() {
            PromptTemplate::default()
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                EvalError::Configuration(format!("invalid prompt file {}: {}", path.display(), e))
            })?
        };

        tracing::debug!(prompt = name, %locale, %version, "prompt template resolved");

        Ok(Self {
            name: name.to_string(),
            locale,
            version,
            releases,
            template,
        })
    }
}

fn list_releases(prompt_dir: &Path) -> Result<Vec<String>, EvalError> {
    if !prompt_dir.is_dir() {
        return Err(EvalError::Configuration(format!(
            "prompt directory '{}' does not exist",
            prompt_dir.display()
        )));
    }
    let entries = std::fs::read_dir(prompt_dir).map_err(|source| EvalError::Read {
        path: prompt_dir.to_path_buf(),
        source,
    })?;

    let mut releases: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|file| file.to_lowercase().ends_with(".yaml"))
        .filter_map(|file| file.rsplit_once('.').map(|(stem, _)| stem.to_string()))
        .collect();
    releases.sort();
    Ok(releases)
}
