//! Accuracy statistics and post-run rollups

use crate::artifacts::{self, EVALUATION_FILE, UnitPaths};
use crate::error::EvalError;
use crate::models::{AggregateMetric, JudgedResult, Locale, Split, TotalResult, UnitResult};
use crate::subjects;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Bucket for samples without a difficulty tag
pub const UNKNOWN_DIFFICULTY: &str = "unknown";

/// `evaluation.json` contents: sample id -> verdict
pub type EvaluationMap = BTreeMap<String, JudgedResult>;

/// Accuracy, sample standard deviation and count of a 0/1 vector
pub fn evaluate(correct: &[bool]) -> AggregateMetric {
    let n = correct.len();
    if n == 0 {
        return AggregateMetric {
            acc: 0.0,
            std_dev: 0.0,
            num_example: 0,
        };
    }

    let values: Vec<f64> = correct.iter().map(|&c| if c { 1.0 } else { 0.0 }).collect();
    let acc = values.iter().sum::<f64>() / n as f64;
    let std_dev = if n < 2 {
        0.0
    } else {
        let squares: f64 = values.iter().map(|v| (v - acc).powi(2)).sum();
        (squares / (n - 1) as f64).sqrt()
    };

    AggregateMetric {
        acc,
        std_dev,
        num_example: n,
    }
}

pub fn evaluate_results<'a, I>(results: I) -> AggregateMetric
where
    I: IntoIterator<Item = &'a JudgedResult>,
{
    let correct: Vec<bool> = results.into_iter().map(|r| r.judge.is_correct()).collect();
    evaluate(&correct)
}

/// Metrics per difficulty level
pub fn evaluate_difficulties<'a, I>(results: I) -> BTreeMap<String, AggregateMetric>
where
    I: IntoIterator<Item = &'a JudgedResult>,
{
    let mut groups: BTreeMap<String, Vec<bool>> = BTreeMap::new();
    for result in results {
        let level = result
            .difficulty
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(UNKNOWN_DIFFICULTY);
        groups
            .entry(level.to_string())
            .or_default()
            .push(result.judge.is_correct());
    }
    groups
        .into_iter()
        .map(|(level, correct)| (level, evaluate(&correct)))
        .collect()
}

/// Split-wide rollup over subject -> evaluation map
///
/// Subjects without a registered dimension count toward the overall and
/// per-subject figures only.
pub fn rollup(model: &str, split: Split, units: &BTreeMap<String, EvaluationMap>) -> TotalResult {
    let mut overall = Vec::new();
    let mut by_subject = BTreeMap::new();
    let mut dimensions: BTreeMap<String, Vec<bool>> = BTreeMap::new();

    for (subject, evaluation) in units {
        let correct: Vec<bool> = evaluation.values().map(|r| r.judge.is_correct()).collect();
        by_subject.insert(subject.clone(), evaluate(&correct));

        if let Some(dimension) = subjects::dimension_of(subject) {
            dimensions
                .entry(dimension.as_str().to_string())
                .or_default()
                .extend(&correct);
        }
        overall.extend(correct);
    }

    TotalResult {
        model: model.to_string(),
        split,
        metric: evaluate(&overall),
        by_subject,
        by_dimension: dimensions
            .into_iter()
            .map(|(dimension, correct)| (dimension, evaluate(&correct)))
            .collect(),
    }
}

/// Roll up every subject under `<root>/<prompt>/<locale>/<model>/<split>` into
/// `result_<model>_<split>.json` next to the subject folders
pub fn evaluate_total(
    root: &Path,
    prompt: &str,
    locale: Locale,
    model_id: &str,
    split: Split,
) -> Result<(TotalResult, PathBuf), EvalError> {
    let model = artifacts::model_dir_name(model_id);
    let split_dir = artifacts::split_dir(root, prompt, locale, model_id, split);
    let entries = std::fs::read_dir(&split_dir).map_err(|source| EvalError::Read {
        path: split_dir.clone(),
        source,
    })?;

    let mut units = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|source| EvalError::Read {
            path: split_dir.clone(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let evaluation_path = path.join(EVALUATION_FILE);
        if !evaluation_path.is_file() {
            tracing::warn!(dir = %path.display(), "no evaluation.json; subject left out of rollup");
            continue;
        }
        let subject = entry.file_name().to_string_lossy().into_owned();
        let evaluation: EvaluationMap = artifacts::read_json(&evaluation_path)?;
        units.insert(subject, evaluation);
    }

    let total = rollup(model, split, &units);
    let path = split_dir.join(format!("result_{}_{}.json", model, split));
    artifacts::write_json(&path, &total)?;
    tracing::info!(
        model,
        %split,
        acc = total.metric.acc,
        num_example = total.metric.num_example,
        "split rollup written"
    );
    Ok((total, path))
}

/// Recompute the difficulty breakdown of finished units and merge it into
/// their `result.json`
pub fn recompute_difficulties(
    root: &Path,
    prompt: &str,
    locale: Locale,
    model_id: &str,
    subject_names: &[String],
    splits: &[Split],
) -> Result<Vec<PathBuf>, EvalError> {
    let mut updated = Vec::new();

    for name in subject_names {
        match subjects::find(name) {
            Some(subject) if subject.has_difficulty => {}
            Some(_) => {
                tracing::info!(subject = %name, "no difficulty levels; skipping");
                continue;
            }
            None => {
                tracing::warn!(subject = %name, "unknown subject; skipping");
                continue;
            }
        }

        for &split in splits {
            let paths = UnitPaths::new(root, prompt, locale, model_id, split, name);
            if !paths.is_complete() {
                tracing::debug!(subject = %name, %split, "unit not evaluated yet");
                continue;
            }

            let evaluation: EvaluationMap = artifacts::read_json(&paths.evaluation)?;
            let mut result: UnitResult = artifacts::read_json(&paths.result)?;
            result.difficulties = Some(evaluate_difficulties(evaluation.values()));
            artifacts::write_json(&paths.result, &result)?;

            tracing::debug!(subject = %name, %split, "difficulty breakdown saved");
            updated.push(paths.result);
        }
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;
    use tempfile::tempdir;

    fn judged(id: &str, correct: bool, difficulty: Option<&str>) -> JudgedResult {
        JudgedResult {
            id: id.to_string(),
            judge: if correct { Verdict::Correct } else { Verdict::Incorrect },
            pred: "A".to_string(),
            answer: "A".to_string(),
            difficulty: difficulty.map(str::to_string),
            rationale: None,
            judge_error: None,
        }
    }

    fn evaluation_map(results: Vec<JudgedResult>) -> EvaluationMap {
        results.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    #[test]
    fn test_evaluate_empty_and_single() {
        let empty = evaluate(&[]);
        assert_eq!(empty.acc, 0.0);
        assert_eq!(empty.std_dev, 0.0);
        assert_eq!(empty.num_example, 0);

        let single = evaluate(&[true]);
        assert_eq!(single.acc, 1.0);
        assert_eq!(single.std_dev, 0.0);
        assert_eq!(single.num_example, 1);
    }

    #[test]
    fn test_evaluate_sample_std_dev() {
        let metric = evaluate(&[true, false]);
        assert_eq!(metric.acc, 0.5);
        assert!((metric.std_dev - 0.5f64.sqrt()).abs() < 1e-12);

        let metric = evaluate(&[true, true, false, false]);
        assert!((metric.std_dev - (1.0f64 / 3.0).sqrt()).abs() < 1e-12);

        let metric = evaluate(&[true, true, true]);
        assert_eq!(metric.std_dev, 0.0);
    }

    #[test]
    fn test_evaluate_difficulties() {
        let results = vec![
            judged("1", true, Some("easy")),
            judged("2", false, Some("easy")),
            judged("3", true, Some("hard")),
            judged("4", false, None),
        ];
        let levels = evaluate_difficulties(&results);
        assert_eq!(levels.len(), 3);
        assert_eq!(levels["easy"].acc, 0.5);
        assert_eq!(levels["hard"].num_example, 1);
        assert_eq!(levels[UNKNOWN_DIFFICULTY].acc, 0.0);
    }

    #[test]
    fn test_rollup_excludes_subjects_without_dimension() {
        let mut units = BTreeMap::new();
        units.insert(
            "Materials".to_string(),
            evaluation_map(vec![judged("m1", true, None), judged("m2", false, None)]),
        );
        units.insert(
            "Industry_Jargon".to_string(),
            evaluation_map(vec![judged("j1", true, None)]),
        );

        let total = rollup("gpt-4.1", Split::Test, &units);
        assert_eq!(total.metric.num_example, 3);
        assert_eq!(total.by_subject.len(), 2);
        assert_eq!(total.by_subject["Industry_Jargon"].acc, 1.0);

        let dimension_count: usize = total.by_dimension.values().map(|m| m.num_example).sum();
        assert_eq!(dimension_count, 2);
    }

    #[test]
    fn test_unit_result_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("result.json");
        let results = vec![
            judged("1", true, Some("easy")),
            judged("2", false, Some("hard")),
            judged("3", true, Some("hard")),
        ];
        let original = UnitResult {
            metric: evaluate_results(&results),
            difficulties: Some(evaluate_difficulties(&results)),
        };

        artifacts::write_json(&path, &original).unwrap();
        let reloaded: UnitResult = artifacts::read_json(&path).unwrap();

        assert!((reloaded.metric.acc - original.metric.acc).abs() < 1e-9);
        assert!((reloaded.metric.std_dev - original.metric.std_dev).abs() < 1e-9);
        assert_eq!(reloaded.metric.num_example, original.metric.num_example);
        assert_eq!(reloaded.difficulties.unwrap().len(), 2);
    }

    #[test]
    fn test_evaluate_total_writes_rollup() {
        let root = tempdir().unwrap();
        for (subject, results) in [
            ("Materials", vec![judged("m1", true, None)]),
            ("Interior", vec![judged("i1", false, None), judged("i2", true, None)]),
        ] {
            let paths = UnitPaths::new(root.path(), "mcqa", Locale::En, "openai/gpt-4.1", Split::Dev, subject);
            artifacts::write_json(&paths.evaluation, &evaluation_map(results)).unwrap();
        }
        // Folder without artifacts is ignored
        std::fs::create_dir_all(root.path().join("mcqa/en/gpt-4.1/dev/Empty")).unwrap();

        let (total, path) =
            evaluate_total(root.path(), "mcqa", Locale::En, "openai/gpt-4.1", Split::Dev).unwrap();
        assert_eq!(path, root.path().join("mcqa/en/gpt-4.1/dev/result_gpt-4.1_dev.json"));
        assert!(path.is_file());
        assert_eq!(total.model, "gpt-4.1");
        assert_eq!(total.metric.num_example, 3);
        assert!((total.metric.acc - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(total.by_subject.len(), 2);
    }

    #[test]
    fn test_recompute_difficulties_merges_breakdown() {
        let root = tempdir().unwrap();
        let subjects = vec!["Materials".to_string(), "Standard_Nomenclature".to_string()];
        let results = vec![judged("1", true, Some("easy")), judged("2", false, Some("hard"))];

        for subject in &subjects {
            let paths = UnitPaths::new(root.path(), "mcqa", Locale::En, "gpt-4.1", Split::Test, subject);
            artifacts::write_json(&paths.evaluation, &evaluation_map(results.clone())).unwrap();
            let unit = UnitResult {
                metric: evaluate_results(&results),
                difficulties: None,
            };
            artifacts::write_json(&paths.result, &unit).unwrap();
        }

        let updated = recompute_difficulties(
            root.path(),
            "mcqa",
            Locale::En,
            "gpt-4.1",
            &subjects,
            &[Split::Dev, Split::Test],
        )
        .unwrap();

        assert_eq!(updated.len(), 1);
        let unit: UnitResult = artifacts::read_json(&updated[0]).unwrap();
        let difficulties = unit.difficulties.unwrap();
        assert_eq!(difficulties["easy"].acc, 1.0);
        assert_eq!(difficulties["hard"].acc, 0.0);
        assert_eq!(unit.metric.num_example, 2);
    }
}
