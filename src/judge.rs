use crate::error::InvocationError;
use crate::invoker::Invoker;
use crate::models::{ParsedAnswer, QuestionType, Sample, Verdict};
use crate::parser::TRIVIAL_PATTERNS;
use crate::prompt::PromptTemplate;
use crate::providers::{ChatMessage, ChatModel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// When the secondary LLM judge is consulted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeMode {
    /// Unparseable answers are simply incorrect
    #[default]
    Never,
    /// Ask the judge model to read a label out of unparseable answers
    OnUnparseable,
}

/// Structured verdict returned by the judge model
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JudgeResponse {
    pub label: String,
    #[serde(default)]
    pub reason: String,
}

/// Outcome of judging one sample
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub verdict: Verdict,
    /// Label or text the verdict was based on
    pub pred: String,
    pub rationale: Option<String>,
    pub judge_error: Option<String>,
}

impl Judgement {
    fn plain(verdict: Verdict, pred: impl Into<String>) -> Self {
        Self {
            verdict,
            pred: pred.into(),
            rationale: None,
            judge_error: None,
        }
    }
}

/// Case-insensitive label comparison
pub fn judge_label(pred: &str, answer: &str) -> Verdict {
    let pred = pred.trim().trim_matches(|c| TRIVIAL_PATTERNS.contains(&c));
    let answer = answer.trim();
    if !pred.is_empty() && pred.eq_ignore_ascii_case(answer) {
        Verdict::Correct
    } else {
        Verdict::Incorrect
    }
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !TRIVIAL_PATTERNS.contains(c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized equality, or the prediction containing the ground truth
pub fn judge_open(pred: &str, answer: &str) -> Verdict {
    let pred = normalize_text(pred);
    let answer = normalize_text(answer);
    if answer.is_empty() || pred.is_empty() {
        return Verdict::Incorrect;
    }
    if pred == answer || pred.contains(&answer) {
        Verdict::Correct
    } else {
        Verdict::Incorrect
    }
}

/// Parse JSON from the response, handling embedded JSON
fn parse_json_response(response: &str) -> Result<Value, String> {
    match serde_json::from_str(response) {
        Ok(parsed) => Ok(parsed),
        Err(_) => try_extract_embedded_json(response),
    }
}

/// Try to extract JSON that might be embedded in text
fn try_extract_embedded_json(response: &str) -> Result<Value, String> {
    match response.find('{') {
        Some(start) => match response.rfind('}') {
            Some(end) if end > start => serde_json::from_str(&response[start..=end])
                .map_err(|e| format!("Failed to parse extracted JSON: {}", e)),
            _ => Err("Found opening brace but no closing brace in response".to_string()),
        },
        None => Err("No JSON found in response".to_string()),
    }
}

pub fn parse_judge_response(response: &str) -> Result<JudgeResponse, String> {
    let parsed = parse_json_response(response)?;
    serde_json::from_value(parsed).map_err(|e| format!("judge reply missing fields: {}", e))
}

/// Model-backed label checker, driven through the shared retry policy
pub struct SecondaryJudge {
    pub model: Arc<dyn ChatModel>,
    pub template: PromptTemplate,
    pub invoker: Invoker,
    pub max_retries: u32,
    pub max_timeout: Option<Duration>,
}

impl SecondaryJudge {
    /// Question with its option list, as shown to the judge
    fn query(sample: &Sample) -> String {
        if sample.options.is_empty() {
            sample.question.clone()
        } else {
            format!("{}\n{}", sample.question, sample.options.render())
        }
    }

    pub async fn check_label(&self, sample: &Sample, answer: &str) -> Result<JudgeResponse, InvocationError> {
        let messages = vec![
            ChatMessage::system(self.template.system.clone()),
            ChatMessage::user(self.template.render_check(&Self::query(sample), answer)),
        ];
        tracing::debug!(id = %sample.id, "asking judge model for a label");

        let response = self
            .invoker
            .invoke(Arc::clone(&self.model), &messages, self.max_retries, self.max_timeout)
            .await?;

        parse_judge_response(&response.content).map_err(InvocationError::InvalidResponse)
    }
}

/// Assigns verdicts; the secondary judge is only consulted per [`JudgeMode`]
pub struct Judge {
    mode: JudgeMode,
    secondary: Option<SecondaryJudge>,
}

impl Judge {
    pub fn new(mode: JudgeMode) -> Self {
        Self { mode, secondary: None }
    }

    pub fn with_secondary(mut self, secondary: SecondaryJudge) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub async fn judge(&self, sample: &Sample, parsed: &ParsedAnswer, raw_answer: &str) -> Judgement {
        match sample.question_type {
            QuestionType::Open => {
                let pred = match parsed {
                    ParsedAnswer::Unparseable => raw_answer,
                    other => other.as_str(),
                };
                Judgement::plain(judge_open(pred, &sample.ground_truth.text), pred)
            }
            QuestionType::MultipleChoice => match parsed {
                ParsedAnswer::Label(label) => {
                    Judgement::plain(judge_label(label, &sample.ground_truth.label), label.as_str())
                }
                _ => self.resolve_unparseable(sample, raw_answer).await,
            },
        }
    }

    async fn resolve_unparseable(&self, sample: &Sample, raw_answer: &str) -> Judgement {
        let secondary = match (self.mode, &self.secondary) {
            (JudgeMode::OnUnparseable, Some(secondary)) => secondary,
            _ => return Judgement::plain(Verdict::Incorrect, ""),
        };

        match secondary.check_label(sample, raw_answer).await {
            Ok(response) => {
                let label = response
                    .label
                    .trim()
                    .trim_matches(|c: char| TRIVIAL_PATTERNS.contains(&c) || c == '(' || c == ')')
                    .to_ascii_uppercase();
                if sample.options.text_for(&label).is_some() {
                    Judgement {
                        verdict: judge_label(&label, &sample.ground_truth.label),
                        pred: label,
                        rationale: Some(response.reason),
                        judge_error: None,
                    }
                } else {
                    tracing::warn!(id = %sample.id, label = %response.label, "judge returned an unusable label");
                    Judgement {
                        verdict: Verdict::Incorrect,
                        pred: String::new(),
                        rationale: Some(response.reason),
                        judge_error: Some(format!("unusable judge label '{}'", response.label)),
                    }
                }
            }
            Err(e) => {
                tracing::warn!(id = %sample.id, error = %e, "judge model failed");
                Judgement {
                    verdict: Verdict::Incorrect,
                    pred: String::new(),
                    rationale: None,
                    judge_error: Some(e.to_string()),
                }
            }
        }
    }
}
