use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Dataset locale; selects the `<locale>_question` family of fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    Ko,
    Zh,
    Ja,
    Es,
    Fr,
    De,
    It,
    Pt,
    Ru,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Ko => "ko",
            Locale::Zh => "zh",
            Locale::Ja => "ja",
            Locale::Es => "es",
            Locale::Fr => "fr",
            Locale::De => "de",
            Locale::It => "it",
            Locale::Pt => "pt",
            Locale::Ru => "ru",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named partition of the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Dev,
    Val,
    Test,
    Extra,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Dev => "dev",
            Split::Val => "val",
            Split::Test => "test",
            Split::Extra => "extra",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Mcqa,
    OpenResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "multiple-choice")]
    MultipleChoice,
    #[serde(rename = "open")]
    Open,
}

impl QuestionType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "multiple-choice" | "multiple_choice" | "mcqa" => QuestionType::MultipleChoice,
            _ => QuestionType::Open,
        }
    }
}

/// Label for the option at `index` (0 -> 'A')
pub fn option_label(index: usize) -> Option<char> {
    if index < 26 {
        Some((b'A' + index as u8) as char)
    } else {
        None
    }
}

/// Ordered option texts; labels are always `A`, `B`, ... with no gaps
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OptionSet {
    texts: Vec<String>,
}

impl OptionSet {
    pub fn new(texts: Vec<String>) -> Result<Self, String> {
        if texts.len() > 26 {
            return Err(format!("{} options exceed the 26 available labels", texts.len()));
        }
        Ok(Self { texts })
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        (0..self.texts.len())
            .filter_map(option_label)
            .map(String::from)
            .collect()
    }

    /// (label, text) pairs in label order
    pub fn iter(&self) -> impl Iterator<Item = (String, &str)> {
        self.texts
            .iter()
            .enumerate()
            .filter_map(|(i, text)| option_label(i).map(|l| (l.to_string(), text.as_str())))
    }

    pub fn text_for(&self, label: &str) -> Option<&str> {
        let mut chars = label.trim().chars();
        let c = chars.next()?.to_ascii_uppercase();
        if chars.next().is_some() || !c.is_ascii_uppercase() {
            return None;
        }
        self.texts.get((c as u8 - b'A') as usize).map(String::as_str)
    }

    /// `(A) text` lines for prompt rendering
    pub fn render(&self) -> String {
        self.iter()
            .map(|(label, text)| format!("({}) {}", label, text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Serialize for OptionSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<String, &str> = self.iter().collect();
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OptionSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, String>::deserialize(deserializer)?;
        for (i, label) in map.keys().enumerate() {
            if option_label(i).map(String::from).as_deref() != Some(label.as_str()) {
                return Err(serde::de::Error::custom(format!(
                    "option labels must be contiguous from 'A', found '{}'",
                    label
                )));
            }
        }
        OptionSet::new(map.into_values().collect()).map_err(serde::de::Error::custom)
    }
}

/// Raw image attached to a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub path: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    /// Option label for multiple-choice, empty for open questions
    pub label: String,
    pub text: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// One exam question as loaded from the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: String,
    pub question_type: QuestionType,
    pub question: String,
    pub options: OptionSet,
    pub ground_truth: GroundTruth,
    pub image: Option<ImagePayload>,
    pub difficulty: Option<String>,
    pub human_acc: Option<f64>,
}

/// Normalized provider reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated text response
    pub content: String,
    /// Token usage and similar bookkeeping
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Provider payload as received
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Answer extracted from a completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParsedAnswer {
    Label(String),
    Text(String),
    Unparseable,
}

impl ParsedAnswer {
    pub fn as_str(&self) -> &str {
        match self {
            ParsedAnswer::Label(s) | ParsedAnswer::Text(s) => s,
            ParsedAnswer::Unparseable => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Correct,
    Incorrect,
}

impl Verdict {
    pub fn is_correct(&self) -> bool {
        matches!(self, Verdict::Correct)
    }
}

/// Per-sample record written to `output.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub human_acc: Option<f64>,
    pub question: String,
    pub options: OptionSet,
    pub ground_truth: GroundTruth,
    #[serde(default)]
    pub image_path: Option<String>,
    pub model_answer: String,
    pub parsed_pred: ParsedAnswer,
    #[serde(default)]
    pub full_response: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge: Option<Verdict>,
}

/// Verdict for one sample, written to `evaluation.json` keyed by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgedResult {
    pub id: String,
    pub judge: Verdict,
    pub pred: String,
    pub answer: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_error: Option<String>,
}

/// Accuracy statistics over a 0/1 correctness vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetric {
    pub acc: f64,
    pub std_dev: f64,
    pub num_example: usize,
}

/// Contents of a unit's `result.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    #[serde(flatten)]
    pub metric: AggregateMetric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulties: Option<BTreeMap<String, AggregateMetric>>,
}

/// Split-wide rollup written to `result_<model>_<split>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalResult {
    pub model: String,
    pub split: Split,
    #[serde(flatten)]
    pub metric: AggregateMetric,
    pub by_subject: BTreeMap<String, AggregateMetric>,
    pub by_dimension: BTreeMap<String, AggregateMetric>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("option {}", i)).collect()
    }

    #[test]
    fn test_labels_are_contiguous_letters() {
        for n in 1..=26 {
            let options = OptionSet::new(texts(n)).unwrap();
            let labels = options.labels();
            assert_eq!(labels.len(), n);
            for (i, label) in labels.iter().enumerate() {
                assert_eq!(label, &((b'A' + i as u8) as char).to_string());
            }
        }
    }

    #[test]
    fn test_too_many_options_rejected() {
        assert!(OptionSet::new(texts(27)).is_err());
    }

    #[test]
    fn test_text_for_label() {
        let options = OptionSet::new(vec!["steel".into(), "concrete".into()]).unwrap();
        assert_eq!(options.text_for("B"), Some("concrete"));
        assert_eq!(options.text_for("b"), Some("concrete"));
        assert_eq!(options.text_for("C"), None);
        assert_eq!(options.text_for("AB"), None);
    }

    #[test]
    fn test_render_options() {
        let options = OptionSet::new(vec!["steel".into(), "wood".into()]).unwrap();
        assert_eq!(options.render(), "(A) steel\n(B) wood");
    }

    #[test]
    fn test_option_set_rejects_gapped_labels() {
        let ok: OptionSet = serde_json::from_str(r#"{"A": "x", "B": "y"}"#).unwrap();
        assert_eq!(ok.len(), 2);
        let gapped = serde_json::from_str::<OptionSet>(r#"{"A": "x", "C": "y"}"#);
        assert!(gapped.is_err());
    }

    #[test]
    fn test_unit_result_flattens_metric() {
        let result = UnitResult {
            metric: AggregateMetric { acc: 0.5, std_dev: 0.7071067811865476, num_example: 2 },
            difficulties: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["acc"], 0.5);
        assert_eq!(json["num_example"], 2);
        assert!(json.get("difficulties").is_none());
    }

    #[test]
    fn test_parsed_answer_serialization() {
        let json = serde_json::to_string(&ParsedAnswer::Label("B".into())).unwrap();
        assert_eq!(json, r#"{"kind":"label","value":"B"}"#);
        let json = serde_json::to_string(&ParsedAnswer::Unparseable).unwrap();
        assert_eq!(json, r#"{"kind":"unparseable"}"#);
    }
}
