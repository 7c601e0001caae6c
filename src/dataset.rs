//! Dataset access and record-to-sample conversion

use crate::error::EvalError;
use crate::models::{GroundTruth, ImagePayload, Locale, OptionSet, QuestionType, Sample, Split};
use crate::subjects::UNLOCALIZED_SUBJECT;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Yields raw records for a (subset, split)
pub trait DatasetSource: Send + Sync {
    fn load(&self, subset: &str, split: Split) -> Result<Vec<Value>, EvalError>;
}

/// Reads `<root>/<subset>/<split>.jsonl`, falling back to a `<split>.json` array
#[derive(Debug, Clone)]
pub struct LocalDataset {
    root: PathBuf,
}

impl LocalDataset {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read(path: &Path) -> Result<String, EvalError> {
        std::fs::read_to_string(path).map_err(|source| EvalError::Read {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl DatasetSource for LocalDataset {
    fn load(&self, subset: &str, split: Split) -> Result<Vec<Value>, EvalError> {
        let dir = self.root.join(subset);
        let jsonl = dir.join(format!("{}.jsonl", split));
        let json = dir.join(format!("{}.json", split));

        if jsonl.is_file() {
            let content = Self::read(&jsonl)?;
            return content
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(n, line)| {
                    serde_json::from_str(line).map_err(|e| {
                        EvalError::Dataset(format!("{}:{}: {}", jsonl.display(), n + 1, e))
                    })
                })
                .collect();
        }

        if json.is_file() {
            let content = Self::read(&json)?;
            return match serde_json::from_str::<Value>(&content)? {
                Value::Array(records) => Ok(records),
                _ => Err(EvalError::Dataset(format!(
                    "{} must contain a JSON array",
                    json.display()
                ))),
            };
        }

        Err(EvalError::Dataset(format!(
            "no {} split for subset {} under {}",
            split,
            subset,
            self.root.display()
        )))
    }
}

fn text_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn required(record: &Value, key: &str) -> Result<String, EvalError> {
    text_field(record, key).ok_or_else(|| EvalError::Dataset(format!("record missing '{}'", key)))
}

/// Options arrive as a list or as a JSON-encoded list
fn parse_options(raw: Option<&Value>) -> Result<OptionSet, EvalError> {
    let list = match raw {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(s)) if s.trim().is_empty() => Vec::new(),
        Some(Value::String(s)) => serde_json::from_str::<Vec<Value>>(s)
            .map_err(|e| EvalError::Dataset(format!("options are not a JSON list: {}", e)))?,
        Some(other) => {
            return Err(EvalError::Dataset(format!("unsupported options value: {}", other)));
        }
    };

    let texts = list
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect();
    OptionSet::new(texts).map_err(EvalError::Dataset)
}

fn image_bytes(raw: &Value) -> Result<Vec<u8>, EvalError> {
    match raw {
        Value::String(encoded) => STANDARD
            .decode(encoded.trim())
            .map_err(|e| EvalError::Dataset(format!("image bytes are not base64: {}", e))),
        Value::Array(items) => items
            .iter()
            .map(|b| {
                b.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| EvalError::Dataset("image byte out of range".to_string()))
            })
            .collect(),
        _ => Ok(Vec::new()),
    }
}

/// `{path, bytes}` object, possibly JSON-encoded; absent or empty means no image
fn parse_image(raw: Option<&Value>) -> Result<Option<ImagePayload>, EvalError> {
    let object = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() || s == "null" => return Ok(None),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .map_err(|e| EvalError::Dataset(format!("image is not JSON: {}", e)))?,
        Some(other) => other.clone(),
    };

    let bytes = match object.get("bytes") {
        Some(raw) => image_bytes(raw)?,
        None => Vec::new(),
    };
    if bytes.is_empty() {
        return Ok(None);
    }

    Ok(Some(ImagePayload {
        path: object.get("path").and_then(Value::as_str).map(str::to_string),
        bytes,
    }))
}

fn parse_human_acc(raw: Option<&Value>) -> Option<f64> {
    match raw? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Sample {
    /// Build a sample from a dataset record in the requested locale
    pub fn from_record(record: &Value, subset: &str, locale: Locale) -> Result<Self, EvalError> {
        let localized = subset != UNLOCALIZED_SUBJECT;
        let field = |name: &str| {
            if localized {
                format!("{}_{}", locale, name)
            } else {
                name.to_string()
            }
        };

        let id = required(record, "id")?;
        let question_type = text_field(record, "question_type")
            .map(|raw| QuestionType::parse(&raw))
            .unwrap_or(QuestionType::MultipleChoice);

        let options_key = field("options");
        let options = parse_options(record.get(options_key.as_str()))?;

        let ground_truth = GroundTruth {
            label: text_field(record, "answer_key").unwrap_or_default().trim().to_string(),
            text: text_field(record, &field("answer")).unwrap_or_default(),
            explanation: text_field(record, &field("explanation")).filter(|e| !e.is_empty()),
        };

        Ok(Sample {
            id,
            question_type,
            question: required(record, &field("question"))?,
            options,
            ground_truth,
            image: parse_image(record.get("image"))?,
            difficulty: text_field(record, "difficulty").filter(|d| !d.trim().is_empty()),
            human_acc: parse_human_acc(record.get("human_acc")),
        })
    }
}
