use std::{
	fs,
	io::{self, Write},
	path::PathBuf,
};

use clap::{
	Parser, Subcommand,
	builder::styling::{Effects, Style},
};
use color_eyre::eyre;
use tracing_subscriber::EnvFilter;

use gdd_domain::{Domain, Draft};
use gdd_service::{
	ContextPayload, ContextRequest, ContextSelection, DeltaKind, ExportReport, GddService,
	GenerationRequest, GenerationResult, PipelineEvent, Tier,
};

#[derive(Debug, Parser)]
#[command(
	version = gdd_cli::VERSION,
	rename_all = "kebab",
	styles = gdd_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum Command {
	/// Runs the generation pipeline and streams every stage.
	Generate {
		#[arg(long, short = 'd', value_parser = gdd_cli::parse_domain)]
		domain: Domain,
		#[arg(long, short = 'b')]
		brief: String,
		/// Page name or id to include as a preview.
		#[arg(long = "context", value_name = "NAME")]
		context: Vec<String>,
		/// Page name or id to include in full when the budget allows. Full pages take the budget
		/// before `--context` pages.
		#[arg(long = "full", value_name = "NAME")]
		full: Vec<String>,
		/// Adds pages whose titles appear in the brief.
		#[arg(long)]
		suggest: bool,
		#[arg(long)]
		max_tokens: Option<u32>,
		#[arg(long)]
		export: bool,
		#[arg(long, requires = "export")]
		dry_run: bool,
	},
	/// Prints the context payload selected for the given pages.
	Context {
		#[arg(long, short = 'd', value_parser = gdd_cli::parse_domain)]
		domain: Domain,
		/// Page name or id to include in full. Full pages take the budget before the listed names.
		#[arg(long = "full", value_name = "NAME")]
		full: Vec<String>,
		#[arg(value_name = "NAME")]
		names: Vec<String>,
		#[arg(long)]
		max_tokens: Option<u32>,
	},
	/// Ranks existing pages against a name.
	Match {
		/// Searches every configured domain when omitted.
		#[arg(long, short = 'd', value_parser = gdd_cli::parse_domain)]
		domain: Option<Domain>,
		#[arg(value_name = "QUERY")]
		query: String,
		#[arg(long, default_value_t = 0.0)]
		min_score: f32,
	},
	/// Exports a markdown draft to its domain's sandbox database.
	Export {
		#[arg(long, value_name = "FILE")]
		draft: PathBuf,
		#[arg(long, short = 'd', value_parser = gdd_cli::parse_domain)]
		domain: Domain,
		#[arg(long)]
		dry_run: bool,
	},
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = gdd_config::load(&args.config)?;

	init_tracing(&config)?;

	let service = GddService::new(config)?;
	let outcome = match args.command {
		Command::Generate {
			domain,
			brief,
			context,
			full,
			suggest,
			max_tokens,
			export,
			dry_run,
		} => {
			let mut selections = selections(&context, &full);

			if suggest {
				for mention in service.suggest_context(domain, &brief).await? {
					tracing::info!(
						title = %mention.title,
						domain = %mention.domain,
						"Suggested context page."
					);

					selections.push(ContextSelection::parse(&mention.page_id, Tier::Preview));
				}
			}

			run_generate(&service, domain, brief, selections, max_tokens, export, dry_run).await
		},
		Command::Context { domain, full, names, max_tokens } => {
			let payload = service
				.select_context(&ContextRequest {
					domain,
					selections: selections(&names, &full),
					max_tokens,
				})
				.await?;

			println!("{}", payload.render());
			print_payload_report(&payload);

			Ok(())
		},
		Command::Match { domain, query, min_score } => {
			let limit = service.cfg.matching.max_suggestions as usize;
			let hits = service.search_pages(domain, &query, min_score, limit).await?;

			if hits.is_empty() {
				println!("No match for `{query}`.");
			}

			for hit in hits {
				println!(
					"{:.2}  {}  ({}, {})",
					hit.matched.score, hit.matched.title, hit.domain, hit.matched.id
				);
			}

			Ok(())
		},
		Command::Export { draft, domain, dry_run } => {
			let markdown = fs::read_to_string(&draft)?;
			let draft = Draft::parse(domain, &markdown);

			export(&service, &draft, dry_run).await
		},
	};

	tracing::debug!(stats = ?service.cache.stats(), "Notion cache statistics.");

	outcome
}

fn init_tracing(config: &gdd_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

	Ok(())
}

/// Full selections first, then previews, each in the order given.
pub fn selections(preview: &[String], full: &[String]) -> Vec<ContextSelection> {
	full.iter()
		.map(|raw| ContextSelection::parse(raw, Tier::Full))
		.chain(preview.iter().map(|raw| ContextSelection::parse(raw, Tier::Preview)))
		.collect()
}

async fn run_generate(
	service: &GddService,
	domain: Domain,
	brief: String,
	selections: Vec<ContextSelection>,
	max_tokens: Option<u32>,
	export_draft: bool,
	dry_run: bool,
) -> color_eyre::Result<()> {
	let context = service.select_context(&ContextRequest { domain, selections, max_tokens }).await?;

	print_payload_report(&context);

	let request = GenerationRequest { domain, brief, context, temperature: None, max_tokens: None };
	let result = service.generate(&request, &mut print_event).await?;

	print_validation(&result);

	if let Some(files) = service.save_run(&result)? {
		eprintln!("Run saved to {}.", files.json.display());
	}
	if export_draft {
		if !result.validation.valid {
			tracing::warn!(run_id = %result.run_id, "Exporting a draft that failed validation.");
		}

		export(service, &result.draft, dry_run).await?;
	}

	Ok(())
}

async fn export(service: &GddService, draft: &Draft, dry_run: bool) -> color_eyre::Result<()> {
	if draft.title.trim().is_empty() {
		return Err(eyre::eyre!("The draft has no title; nothing to export."));
	}

	let relations = service.resolve_relations(draft).await?;
	let report = service.export_draft(draft, &relations, dry_run).await?;

	print_export(&report)
}

fn print_event(event: PipelineEvent) {
	match event {
		PipelineEvent::StageStarted { stage } => println!("\n=== {stage} ==="),
		PipelineEvent::Delta { kind: DeltaKind::Text, text, .. } => {
			print!("{text}");

			io::stdout().flush().ok();
		},
		PipelineEvent::Delta { kind: DeltaKind::Reasoning, text, .. } => {
			let dim = Style::new().effects(Effects::DIMMED);

			eprint!("{}{text}{}", dim.render(), dim.render_reset());
		},
		PipelineEvent::StageFinished { .. } => println!(),
	}
}

fn print_payload_report(payload: &ContextPayload) {
	eprintln!(
		"Context: {} / {} tokens, {} page(s).",
		payload.total_tokens,
		payload.budget,
		payload.items.len()
	);

	for item in payload.items.iter().filter(|item| item.downgraded) {
		eprintln!("  {} was shortened to its preview to fit the budget.", item.title);
	}
	for skipped in &payload.skipped {
		eprintln!(
			"  Skipped {}: {}",
			skipped.title.as_deref().unwrap_or(&skipped.page_id),
			skipped.reason
		);
	}
	for unresolved in &payload.unresolved {
		let suggestions: Vec<&str> =
			unresolved.suggestions.iter().map(|hit| hit.title.as_str()).collect();

		if suggestions.is_empty() {
			eprintln!("  No page matches `{}`.", unresolved.name);
		} else {
			eprintln!(
				"  No page matches `{}`; did you mean {}?",
				unresolved.name,
				suggestions.join(", ")
			);
		}
	}
}

fn print_validation(result: &GenerationResult) {
	let source = if result.validation.checked_by_model { "model" } else { "local checks" };

	if result.validation.valid {
		println!("\nValidation ({source}): OK.");
	} else {
		println!("\nValidation ({source}): {} issue(s).", result.validation.issues.len());
	}

	for issue in &result.validation.issues {
		println!("- {issue}");
	}
}

fn print_export(report: &ExportReport) -> color_eyre::Result<()> {
	if let Some(request) = &report.request {
		println!("{}", serde_json::to_string_pretty(request)?);
		eprintln!(
			"Dry run: {} block(s), {} extra append request(s), nothing sent.",
			report.blocks, report.append_batches
		);
	} else {
		println!(
			"Exported to {}.",
			report.url.as_deref().or(report.page_id.as_deref()).unwrap_or(&report.database_id)
		);
	}

	for unresolved in &report.unresolved {
		eprintln!(
			"  Unresolved {} `{}`; left out of the page.",
			unresolved.property(),
			unresolved.name()
		);
	}

	Ok(())
}
