use crate::aggregate::{self, EvaluationMap};
use crate::artifacts::{self, UnitPaths};
use crate::config::Config;
use crate::dataset::{DatasetSource, LocalDataset};
use crate::error::EvalError;
use crate::evaluation::Evaluator;
use crate::invoker::{Invoker, RetryPolicy, timeout_from_secs};
use crate::judge::{Judge, JudgeMode, SecondaryJudge};
use crate::models::{OutputRecord, Sample, Split, UnitResult};
use crate::prompt::PromptManager;
use crate::providers::{self, GenerationSettings};
use crate::{registry, subjects};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of one evaluation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Loaded,
    Aggregated,
    Persisted,
    Done,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitState::Pending => "pending",
            UnitState::Loaded => "loaded",
            UnitState::Aggregated => "aggregated",
            UnitState::Persisted => "persisted",
            UnitState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Outcome of one (subject, split) unit
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub subject: String,
    pub split: Split,
    pub paths: UnitPaths,
    pub result: UnitResult,
    /// Artifacts already existed and were not recomputed
    pub reused: bool,
}

/// Orchestrates evaluation units for the configured model
pub struct Runner {
    config: Config,
    dataset: Box<dyn DatasetSource>,
    /// Model id used for the output directory
    model_id: String,
}

impl Runner {
    /// Create a runner reading the dataset from `config.dataset_path`
    pub fn new(config: Config) -> Self {
        let dataset = Box::new(LocalDataset::new(config.dataset_path.clone()));
        Self::with_dataset(config, dataset)
    }

    pub fn with_dataset(config: Config, dataset: Box<dyn DatasetSource>) -> Self {
        let model_id = artifacts::output_model_id(&config.run.model);
        Self {
            config,
            dataset,
            model_id,
        }
    }

    /// Subjects to run, validated against the catalog
    pub fn subjects(&self) -> Result<Vec<String>, EvalError> {
        if self.config.run.subjects.is_empty() {
            return Ok(subjects::all_names());
        }
        for name in &self.config.run.subjects {
            if subjects::find(name).is_none() {
                return Err(EvalError::Configuration(format!("unknown subject '{}'", name)));
            }
        }
        Ok(self.config.run.subjects.clone())
    }

    /// Model, prompt and judge wiring; fails before any request is sent
    pub fn build_evaluator(&self) -> Result<Evaluator, EvalError> {
        let run = &self.config.run;
        let capability = registry::capability(&run.model)?;
        let model = providers::build_model(&self.config.providers, &run.model, GenerationSettings::from(run))?;
        let prompt = PromptManager::load(&self.config.prompt_path, &run.prompt, run.locale, &run.prompt_version)?;
        let invoker = Invoker::new(RetryPolicy::default());
        let max_timeout = timeout_from_secs(run.timeout_secs);

        let mut judge = Judge::new(self.config.judge.mode);
        if self.config.judge.mode == JudgeMode::OnUnparseable {
            let judge_prompt =
                PromptManager::load(&self.config.prompt_path, &self.config.judge.prompt, run.locale, "latest")?;
            let judge_model = providers::build_model(
                &self.config.providers,
                &self.config.judge.model,
                GenerationSettings::default(),
            )?;
            tracing::debug!(
                model = %self.config.judge.model,
                provider = %registry::provider_of(&self.config.judge.model)?,
                "secondary judge configured"
            );
            judge = judge.with_secondary(SecondaryJudge {
                model: judge_model,
                template: judge_prompt.template,
                invoker: invoker.clone(),
                max_retries: run.retries,
                max_timeout,
            });
        }

        tracing::info!(
            model = %run.model,
            provider = %capability.provider,
            prompt = %prompt.name,
            locale = %prompt.locale,
            version = %prompt.version,
            releases = prompt.releases.len(),
            judge = ?self.config.judge.mode,
            "evaluator ready"
        );

        Ok(Evaluator::new(model, prompt.template, invoker, judge)
            .with_task(run.task)
            .with_retries(run.retries, max_timeout)
            .with_rate_limit(run.rate_limit_rps)
            .with_image_payload_limit(capability.provider.image_payload_limit()))
    }

    /// Run every configured subject × split
    pub async fn run_each(&self) -> Result<Vec<UnitReport>, EvalError> {
        let names = self.subjects()?;
        let mut evaluator = self.build_evaluator()?;
        self.run_units(&mut evaluator, &names).await
    }

    /// Run every (subject, split) pair the locale and the split sizes allow
    pub async fn run_units(
        &self,
        evaluator: &mut Evaluator,
        names: &[String],
    ) -> Result<Vec<UnitReport>, EvalError> {
        let mut reports = Vec::new();

        for subject in names {
            if subjects::find(subject).is_some_and(|s| !s.supports(self.config.run.locale)) {
                tracing::info!(%subject, locale = %self.config.run.locale, "subject not available in locale; skipping");
                continue;
            }
            for &split in &self.config.run.splits {
                if subjects::find(subject).is_some_and(|s| !s.has_split(split)) {
                    tracing::info!(%subject, %split, "split has no data; skipping");
                    continue;
                }
                reports.push(self.run_unit(evaluator, subject, split).await?);
            }
        }

        Ok(reports)
    }

    fn transition(subject: &str, split: Split, state: UnitState) {
        tracing::debug!(%subject, %split, %state, "unit state");
    }

    /// Evaluate one unit and persist `output.json`, `evaluation.json` and `result.json`
    pub async fn run_unit(
        &self,
        evaluator: &mut Evaluator,
        subject: &str,
        split: Split,
    ) -> Result<UnitReport, EvalError> {
        let run = &self.config.run;
        let paths = UnitPaths::new(
            &self.config.output_path,
            &run.prompt,
            run.locale,
            &self.model_id,
            split,
            subject,
        );
        Self::transition(subject, split, UnitState::Pending);

        if !run.override_existing && paths.is_complete() {
            tracing::info!(%subject, %split, dir = %paths.dir.display(), "results exist; skipping");
            let result = artifacts::read_json(&paths.result)?;
            Self::transition(subject, split, UnitState::Done);
            return Ok(UnitReport {
                subject: subject.to_string(),
                split,
                paths,
                result,
                reused: true,
            });
        }

        paths.invalidate()?;

        let samples = self
            .dataset
            .load(subject, split)?
            .iter()
            .map(|record| Sample::from_record(record, subject, run.locale))
            .collect::<Result<Vec<_>, _>>()?;
        Self::transition(subject, split, UnitState::Loaded);
        tracing::info!(%subject, %split, samples = samples.len(), model = evaluator.model_id(), "evaluating unit");

        let mut records: Vec<OutputRecord> = Vec::with_capacity(samples.len());
        let mut evaluation = EvaluationMap::new();

        for (index, sample) in samples.iter().enumerate() {
            match evaluator.evaluate_sample(sample).await {
                Ok(outcome) => {
                    evaluation.insert(outcome.judged.id.clone(), outcome.judged);
                    records.push(outcome.record);
                }
                Err(e) => {
                    tracing::error!(%subject, %split, id = %sample.id, error = %e, "unit aborted");
                    if !records.is_empty() {
                        artifacts::write_json(&paths.output, &records)?;
                    }
                    return Err(e.into());
                }
            }

            if run.flush_every > 0 && (index + 1) % run.flush_every == 0 {
                tracing::debug!(%subject, %split, done = index + 1, "flushing partial output");
                artifacts::write_json(&paths.output, &records)?;
            }
        }

        artifacts::write_json(&paths.output, &records)?;

        let result = UnitResult {
            metric: aggregate::evaluate_results(evaluation.values()),
            difficulties: run
                .calculate_difficulty
                .then(|| aggregate::evaluate_difficulties(evaluation.values())),
        };
        for record in &mut records {
            record.judge = evaluation.get(&record.id).map(|judged| judged.judge);
        }
        Self::transition(subject, split, UnitState::Aggregated);

        artifacts::write_json(&paths.evaluation, &evaluation)?;
        artifacts::write_json(&paths.output, &records)?;
        artifacts::write_json(&paths.result, &result)?;
        Self::transition(subject, split, UnitState::Persisted);

        tracing::info!(
            %subject,
            %split,
            acc = result.metric.acc,
            num_example = result.metric.num_example,
            "unit complete"
        );
        Self::transition(subject, split, UnitState::Done);

        Ok(UnitReport {
            subject: subject.to_string(),
            split,
            paths,
            result,
            reused: false,
        })
    }
}
