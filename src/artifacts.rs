//! On-disk layout of evaluation artifacts

use crate::error::EvalError;
use crate::models::{Locale, Split};
use crate::registry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const OUTPUT_FILE: &str = "output.json";
pub const EVALUATION_FILE: &str = "evaluation.json";
pub const RESULT_FILE: &str = "result.json";

/// Directory segment for a model id (`org/name` keeps only `name`)
pub fn model_dir_name(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}

/// Catalog stable id for known models, the id as given otherwise
pub fn output_model_id(model: &str) -> String {
    registry::capability(model)
        .map(|c| c.tag)
        .unwrap_or_else(|_| model.to_string())
}

/// `<root>/<prompt>/<locale>/<model>/<split>`
pub fn split_dir(root: &Path, prompt: &str, locale: Locale, model_id: &str, split: Split) -> PathBuf {
    root.join(prompt)
        .join(locale.as_str())
        .join(model_dir_name(model_id))
        .join(split.as_str())
}

/// Artifact paths of one (prompt, locale, model, split, subject) unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPaths {
    #[serde(skip)]
    pub dir: PathBuf,
    pub evaluation: PathBuf,
    pub output: PathBuf,
    pub result: PathBuf,
}

impl UnitPaths {
    pub fn new(
        root: &Path,
        prompt: &str,
        locale: Locale,
        model_id: &str,
        split: Split,
        subject: &str,
    ) -> Self {
        Self::in_dir(split_dir(root, prompt, locale, model_id, split).join(subject))
    }

    pub fn in_dir(dir: PathBuf) -> Self {
        Self {
            evaluation: dir.join(EVALUATION_FILE),
            output: dir.join(OUTPUT_FILE),
            result: dir.join(RESULT_FILE),
            dir,
        }
    }

    /// Both the result and the evaluation have been written
    pub fn is_complete(&self) -> bool {
        self.result.is_file() && self.evaluation.is_file()
    }

    /// Drop a previous evaluation and result so an aborted recompute is not
    /// mistaken for a finished unit
    pub fn invalidate(&self) -> Result<(), EvalError> {
        for path in [&self.evaluation, &self.result] {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "stale artifact removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(EvalError::Persistence {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

fn ensure_directory_exists(path: &Path) -> Result<(), EvalError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| EvalError::Persistence {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Pretty-printed UTF-8 JSON, creating parent directories as needed
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), EvalError> {
    let content = serde_json::to_string_pretty(value)?;
    ensure_directory_exists(path)?;
    std::fs::write(path, content).map_err(|source| EvalError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "artifact written");
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EvalError> {
    let content = std::fs::read_to_string(path).map_err(|source| EvalError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    #[test]
    fn test_unit_paths_layout() {
        let paths = UnitPaths::new(
            Path::new("output"),
            "mcqa",
            Locale::Ko,
            "LGAI-EXAONE/EXAONE-4.0-32B",
            Split::Test,
            "Materials",
        );
        assert_eq!(paths.dir, PathBuf::from("output/mcqa/ko/EXAONE-4.0-32B/test/Materials"));
        assert_eq!(paths.result, paths.dir.join("result.json"));
        assert_eq!(paths.evaluation, paths.dir.join("evaluation.json"));
        assert_eq!(paths.output, paths.dir.join("output.json"));
    }

    #[test]
    fn test_output_model_id() {
        assert_eq!(output_model_id("GPT-4.1"), "gpt-4.1");
        assert_eq!(model_dir_name(&output_model_id("exaone-4.0-32b")), "EXAONE-4.0-32B");
        assert_eq!(output_model_id("my-local-model"), "my-local-model");
    }

    #[test]
    fn test_unit_paths_serialize_without_dir() {
        let paths = UnitPaths::in_dir(PathBuf::from("out/x"));
        let value = serde_json::to_value(&paths).unwrap();
        assert!(value.get("dir").is_none());
        assert_eq!(value["result"], "out/x/result.json");
    }

    #[test]
    fn test_write_then_read_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/result.json");

        write_json(&path, &json!({"acc": 0.5, "label": "콘크리트"})).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("콘크리트"));
        assert!(content.contains('\n'));

        let value: Value = read_json(&path).unwrap();
        assert_eq!(value["acc"], 0.5);
    }

    #[test]
    fn test_completeness_requires_both_files() {
        let dir = tempdir().unwrap();
        let paths = UnitPaths::in_dir(dir.path().to_path_buf());
        assert!(!paths.is_complete());
        write_json(&paths.result, &json!({})).unwrap();
        assert!(!paths.is_complete());
        write_json(&paths.evaluation, &json!({})).unwrap();
        assert!(paths.is_complete());
    }

    #[test]
    fn test_invalidate_removes_results_only() {
        let dir = tempdir().unwrap();
        let paths = UnitPaths::in_dir(dir.path().to_path_buf());
        paths.invalidate().unwrap();

        write_json(&paths.result, &json!({})).unwrap();
        write_json(&paths.evaluation, &json!({})).unwrap();
        write_json(&paths.output, &json!([])).unwrap();
        paths.invalidate().unwrap();

        assert!(!paths.result.exists());
        assert!(!paths.evaluation.exists());
        assert!(paths.output.exists());
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_json::<Value>(Path::new("/nonexistent/result.json")).unwrap_err();
        assert!(matches!(err, EvalError::Read { .. }));
    }
}
