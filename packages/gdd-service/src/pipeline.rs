use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, GddService, Result,
	context::{ContextPayload, ContextSummary},
	prompts,
};
use gdd_domain::{Domain, Draft};
use gdd_providers::{ChatMessage, ChatRequest, StreamDelta};

const INVALID_JSON_ISSUE: &str = "Validator answer did not contain a JSON object.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
	Writer,
	Reviewer,
	Corrector,
	Validator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
	Text,
	Reasoning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
	StageStarted { stage: Stage },
	Delta { stage: Stage, kind: DeltaKind, text: String },
	StageFinished { stage: Stage, output: String },
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
	pub domain: Domain,
	pub brief: String,
	pub context: ContextPayload,
	/// Overrides `providers.llm.temperature` for the writing stages.
	pub temperature: Option<f32>,
	pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
	pub stage: Stage,
	pub output: String,
	pub reasoning: String,
	pub finish_reason: Option<String>,
	pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
	pub valid: bool,
	pub issues: Vec<String>,
	/// False when only the local structural checks ran.
	pub checked_by_model: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
	pub run_id: Uuid,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	pub domain: Domain,
	pub brief: String,
	pub draft_markdown: String,
	pub draft: Draft,
	pub review: Option<String>,
	pub validation: ValidationReport,
	pub stages: Vec<StageRecord>,
	pub context_summary: ContextSummary,
}

struct StageInput {
	stage: Stage,
	system: String,
	user: String,
	temperature: Option<f32>,
}

impl Stage {
	pub const ALL: [Stage; 4] =
		[Stage::Writer, Stage::Reviewer, Stage::Corrector, Stage::Validator];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Writer => "writer",
			Self::Reviewer => "reviewer",
			Self::Corrector => "corrector",
			Self::Validator => "validator",
		}
	}
}

impl std::fmt::Display for Stage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl GenerationResult {
	pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
		self.stages.iter().find(|record| record.stage == stage)
	}
}

impl GddService {
	/// Runs Writer, then Reviewer and Corrector, then Validator, forwarding every event to
	/// `on_event` as it happens.
	pub async fn generate(
		&self,
		request: &GenerationRequest,
		on_event: &mut (dyn FnMut(PipelineEvent) + Send),
	) -> Result<GenerationResult> {
		if request.brief.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "brief must be non-empty.".to_string() });
		}

		let run_id = Uuid::new_v4();
		let domain = request.domain;
		let context = request.context.render();
		let mut stages = Vec::with_capacity(Stage::ALL.len());

		tracing::info!(
			%run_id,
			domain = domain.key(),
			context_tokens = request.context.total_tokens,
			"Generation started."
		);

		let writer = self
			.run_stage(
				request,
				StageInput {
					stage: Stage::Writer,
					system: prompts::writer_system(domain),
					user: prompts::writer_user(&request.brief, &context),
					temperature: request.temperature,
				},
				on_event,
			)
			.await?;
		let mut draft_markdown = clean_markdown(&writer.output);
		let mut review = None;

		stages.push(writer);

		if self.cfg.pipeline.review {
			let reviewer = self
				.run_stage(
					request,
					StageInput {
						stage: Stage::Reviewer,
						system: prompts::reviewer_system(domain),
						user: prompts::reviewer_user(&draft_markdown, &context),
						temperature: request.temperature,
					},
					on_event,
				)
				.await?;
			let corrector = self
				.run_stage(
					request,
					StageInput {
						stage: Stage::Corrector,
						system: prompts::corrector_system(domain),
						user: prompts::corrector_user(&draft_markdown, &reviewer.output),
						temperature: request.temperature,
					},
					on_event,
				)
				.await?;

			draft_markdown = clean_markdown(&corrector.output);
			review = Some(reviewer.output.trim().to_string());

			stages.push(reviewer);
			stages.push(corrector);
		}

		let draft = Draft::parse(domain, &draft_markdown);
		let local = local_issues(&draft);
		let max_issues = self.cfg.pipeline.max_validation_issues as usize;
		let validation = if self.cfg.pipeline.validate {
			let validator = self
				.run_stage(
					request,
					StageInput {
						stage: Stage::Validator,
						system: prompts::validator_system(domain),
						user: prompts::validator_user(&draft_markdown, &context),
						temperature: Some(0.0),
					},
					on_event,
				)
				.await?;
			let report = merge_reports(parse_validation(&validator.output), local, max_issues);

			stages.push(validator);

			report
		} else {
			let mut issues = local;

			issues.truncate(max_issues);

			ValidationReport { valid: issues.is_empty(), issues, checked_by_model: false }
		};

		tracing::info!(
			%run_id,
			title = %draft.title,
			valid = validation.valid,
			issues = validation.issues.len(),
			"Generation finished."
		);

		Ok(GenerationResult {
			run_id,
			created_at: OffsetDateTime::now_utc(),
			domain,
			brief: request.brief.clone(),
			draft_markdown,
			draft,
			review,
			validation,
			stages,
			context_summary: request.context.summary(),
		})
	}

	async fn run_stage(
		&self,
		request: &GenerationRequest,
		input: StageInput,
		on_event: &mut (dyn FnMut(PipelineEvent) + Send),
	) -> Result<StageRecord> {
		let stage = input.stage;
		let started = Instant::now();
		let chat = ChatRequest {
			system: input.system,
			messages: vec![ChatMessage::user(input.user)],
			temperature: input.temperature,
			max_tokens: request.max_tokens,
		};

		tracing::info!(stage = stage.as_str(), "Stage started.");

		on_event(PipelineEvent::StageStarted { stage });

		let completion = {
			let mut forward = |delta: StreamDelta| {
				let (kind, text) = match delta {
					StreamDelta::Text(text) => (DeltaKind::Text, text),
					StreamDelta::Reasoning(text) => (DeltaKind::Reasoning, text),
				};

				on_event(PipelineEvent::Delta { stage, kind, text });
			};

			self.providers
				.llm
				.stream(&self.cfg.providers.llm, &chat, &mut forward)
				.await
				.map_err(|err| Error::Stage { stage: stage.to_string(), message: err.to_string() })?
		};

		if completion.text.trim().is_empty() {
			return Err(Error::Stage {
				stage: stage.to_string(),
				message: "Model returned an empty answer.".to_string(),
			});
		}

		let elapsed_ms = started.elapsed().as_millis() as u64;

		tracing::info!(
			stage = stage.as_str(),
			elapsed_ms,
			chars = completion.text.chars().count(),
			finish_reason = completion.finish_reason.as_deref().unwrap_or("unknown"),
			"Stage finished."
		);

		on_event(PipelineEvent::StageFinished { stage, output: completion.text.clone() });

		Ok(StageRecord {
			stage,
			output: completion.text,
			reasoning: completion.reasoning,
			finish_reason: completion.finish_reason,
			elapsed_ms,
		})
	}
}

/// Strips a wrapping code fence that models sometimes put around the whole draft.
pub fn clean_markdown(raw: &str) -> String {
	let trimmed = raw.trim();

	if let Some(rest) = trimmed.strip_prefix("```")
		&& let Some(inner) = rest.strip_suffix("```")
	{
		let body = inner.split_once('\n').map(|(_, body)| body).unwrap_or_default();

		return body.trim().to_string();
	}

	trimmed.to_string()
}

/// Structural problems that need no model to detect.
pub fn local_issues(draft: &Draft) -> Vec<String> {
	draft
		.missing_required()
		.into_iter()
		.map(|property| {
			if property == draft.domain.schema().title_property {
				"The draft has no title.".to_string()
			} else {
				format!("Missing required property `{property}`.")
			}
		})
		.collect()
}

/// Parses the first JSON object found in a validator answer.
pub fn parse_validation(output: &str) -> ValidationReport {
	for (offset, _) in output.match_indices('{') {
		let mut stream = serde_json::Deserializer::from_str(&output[offset..]).into_iter::<Value>();
		let Some(Ok(Value::Object(object))) = stream.next() else { continue };
		let mut issues: Vec<String> = object
			.get("issues")
			.and_then(Value::as_array)
			.map(|items| items.iter().filter_map(issue_text).collect())
			.unwrap_or_default();
		let valid = match object.get("valid").and_then(Value::as_bool) {
			Some(valid) => valid,
			None => {
				issues.push("Validator answer has no boolean `valid` field.".to_string());

				false
			},
		};

		return ValidationReport { valid, issues, checked_by_model: true };
	}

	ValidationReport {
		valid: false,
		issues: vec![INVALID_JSON_ISSUE.to_string()],
		checked_by_model: true,
	}
}

fn issue_text(item: &Value) -> Option<String> {
	let text = match item {
		Value::String(text) => text.clone(),
		Value::Object(object) => ["message", "description", "issue"]
			.iter()
			.find_map(|key| object.get(*key).and_then(Value::as_str))
			.map(str::to_string)
			.unwrap_or_else(|| item.to_string()),
		Value::Null => return None,
		other => other.to_string(),
	};
	let text = text.trim().to_string();

	(!text.is_empty()).then_some(text)
}

fn merge_reports(
	model: ValidationReport,
	local: Vec<String>,
	max_issues: usize,
) -> ValidationReport {
	let valid = model.valid && local.is_empty();
	let mut issues = local;

	for issue in model.issues {
		if !issues.contains(&issue) {
			issues.push(issue);
		}
	}

	issues.truncate(max_issues);

	ValidationReport { valid, issues, checked_by_model: model.checked_by_model }
}
