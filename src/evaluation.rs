use crate::error::InvocationError;
use crate::imaging::{self, EncodedImage};
use crate::invoker::Invoker;
use crate::judge::{Judge, Judgement};
use crate::models::{
    JudgedResult, ModelResponse, OutputRecord, ParsedAnswer, QuestionType, Sample, Task,
};
use crate::parser::{parse_multi_choice_response, parse_open_response};
use crate::prompt::PromptTemplate;
use crate::providers::{ChatMessage, ChatModel};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Per-sample records produced by [`Evaluator::evaluate_sample`]
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub record: OutputRecord,
    pub judged: JudgedResult,
}

/// Prompts, invokes, parses and judges samples against one model, with rate limiting
pub struct Evaluator {
    model: Arc<dyn ChatModel>,
    template: PromptTemplate,
    invoker: Invoker,
    judge: Judge,
    task: Task,
    max_retries: u32,
    max_timeout: Option<Duration>,
    rate_limit_rps: f64,
    image_payload_limit: Option<usize>,
    /// Last request time for the model endpoint
    last_api_request: Option<Instant>,
}

impl Evaluator {
    pub fn new(model: Arc<dyn ChatModel>, template: PromptTemplate, invoker: Invoker, judge: Judge) -> Self {
        Self {
            model,
            template,
            invoker,
            judge,
            task: Task::Mcqa,
            max_retries: 3,
            max_timeout: None,
            rate_limit_rps: 0.0,
            image_payload_limit: None,
            last_api_request: None,
        }
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.task = task;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, max_timeout: Option<Duration>) -> Self {
        self.max_retries = max_retries;
        self.max_timeout = max_timeout;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit_rps: f64) -> Self {
        self.rate_limit_rps = rate_limit_rps;
        self
    }

    pub fn with_image_payload_limit(mut self, limit: Option<usize>) -> Self {
        self.image_payload_limit = limit;
        self
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Enforce rate limiting for API requests
    async fn enforce_rate_limit(last_request: &mut Option<Instant>, rate_limit_rps: f64) {
        if rate_limit_rps <= 0.0 {
            return;
        }

        let Ok(min_interval) = Duration::try_from_secs_f64(1.0 / rate_limit_rps) else {
            tracing::warn!(rate_limit_rps, "rate limit out of range; not limiting");
            return;
        };

        if let Some(last_time) = *last_request {
            let elapsed = last_time.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// System message plus the rendered question, with the image attached when given
    pub fn build_messages(&self, sample: &Sample, image: Option<&EncodedImage>) -> Vec<ChatMessage> {
        let human = self.template.render_question(&sample.question, &sample.options);
        let user = match image {
            Some(image) => ChatMessage::user_with_image(human, image.data_url()),
            None => ChatMessage::user(human),
        };

        let mut messages = Vec::with_capacity(2);
        if !self.template.system.is_empty() {
            messages.push(ChatMessage::system(self.template.system.clone()));
        }
        messages.push(user);
        messages
    }

    /// Invoke the model under the retry policy; image samples are re-encoded
    /// smaller on each retry
    pub async fn generate_response(&mut self, sample: &Sample) -> Result<ModelResponse, InvocationError> {
        Self::enforce_rate_limit(&mut self.last_api_request, self.rate_limit_rps).await;

        let limit = self.image_payload_limit;
        let image_bytes = sample
            .image
            .as_ref()
            .filter(|_| self.model.supports_image())
            .map(|image| image.bytes.as_slice());

        self.invoker
            .invoke_with(Arc::clone(&self.model), self.max_retries, self.max_timeout, |attempt| {
                let encoded = image_bytes.map(|bytes| imaging::encode_for_attempt(bytes, attempt, limit));
                self.build_messages(sample, encoded.as_ref())
            })
            .await
    }

    fn question_type(&self, sample: &Sample) -> QuestionType {
        match self.task {
            Task::OpenResponse => QuestionType::Open,
            Task::Mcqa => sample.question_type,
        }
    }

    pub fn parse_response(&self, sample: &Sample, answer: &str) -> ParsedAnswer {
        match self.question_type(sample) {
            QuestionType::MultipleChoice => parse_multi_choice_response(answer, &sample.options),
            QuestionType::Open => parse_open_response(answer),
        }
    }

    /// Run one sample through prompt, invocation, parsing and judging
    pub async fn evaluate_sample(&mut self, sample: &Sample) -> Result<SampleOutcome, InvocationError> {
        tracing::debug!(id = %sample.id, "evaluating sample");

        let response = self.generate_response(sample).await?;
        let answer = response.content.trim().to_string();
        tracing::debug!(id = %sample.id, answer = %answer, "model response");

        let parsed = self.parse_response(sample, &answer);

        let judged_sample = match self.question_type(sample) {
            qt if qt == sample.question_type => Cow::Borrowed(sample),
            qt => Cow::Owned(Sample {
                question_type: qt,
                ..sample.clone()
            }),
        };
        let judgement = self.judge.judge(&judged_sample, &parsed, &answer).await;

        Ok(build_outcome(&judged_sample, answer, parsed, response.raw, judgement))
    }
}

fn build_outcome(
    sample: &Sample,
    answer: String,
    parsed: ParsedAnswer,
    full_response: serde_json::Value,
    judgement: Judgement,
) -> SampleOutcome {
    let expected = match sample.question_type {
        QuestionType::MultipleChoice if !sample.ground_truth.label.is_empty() => &sample.ground_truth.label,
        _ => &sample.ground_truth.text,
    };

    let judged = JudgedResult {
        id: sample.id.clone(),
        judge: judgement.verdict,
        pred: judgement.pred,
        answer: expected.clone(),
        difficulty: sample.difficulty.clone(),
        rationale: judgement.rationale,
        judge_error: judgement.judge_error,
    };

    let record = OutputRecord {
        id: sample.id.clone(),
        question_type: sample.question_type,
        difficulty: sample.difficulty.clone(),
        human_acc: sample.human_acc,
        question: sample.question.clone(),
        options: sample.options.clone(),
        ground_truth: sample.ground_truth.clone(),
        image_path: sample.image.as_ref().and_then(|image| image.path.clone()),
        model_answer: answer,
        parsed_pred: parsed,
        full_response,
        judge: None,
    };

    SampleOutcome { record, judged }
}
