use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{GddService, Result};
use gdd_domain::{Domain, FuzzyMatch, matcher, tokens};
use gdd_notion::{PageSummary, SourcedPage};

const ITEM_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
	Preview,
	Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Target {
	PageId(String),
	Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSelection {
	pub target: Target,
	pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRequest {
	pub domain: Domain,
	pub selections: Vec<ContextSelection>,
	/// Overrides `context.max_tokens`.
	pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
	pub page_id: String,
	pub title: String,
	pub domain: Option<Domain>,
	pub url: Option<String>,
	pub tier: Tier,
	/// Set when a full page did not fit and its preview was used instead.
	pub downgraded: bool,
	pub text: String,
	pub tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
	pub page_id: String,
	pub title: Option<String>,
	pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedName {
	pub name: String,
	pub suggestions: Vec<FuzzyMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPayload {
	pub domain: Domain,
	pub items: Vec<ContextItem>,
	pub total_tokens: u32,
	pub budget: u32,
	pub skipped: Vec<SkippedItem>,
	pub unresolved: Vec<UnresolvedName>,
}

/// Compact description of a payload, kept in run records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
	pub pages: Vec<(String, String, Tier, u32)>,
	pub total_tokens: u32,
	pub budget: u32,
	pub skipped: usize,
	pub unresolved: Vec<String>,
}

/// A page whose title appears in a brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
	pub domain: Domain,
	pub page_id: String,
	pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMatch {
	pub domain: Domain,
	#[serde(flatten)]
	pub matched: FuzzyMatch,
}

enum Placement {
	Placed(ContextItem),
	Skipped(SkippedItem),
}

impl ContextSelection {
	/// Treats anything that parses as a Notion id (or page URL) as a page id, otherwise as a name.
	pub fn parse(raw: &str, tier: Tier) -> Self {
		let target = match gdd_notion::normalize_id(raw) {
			Ok(id) => Target::PageId(id),
			Err(_) => Target::Name(raw.trim().to_string()),
		};

		Self { target, tier }
	}
}

impl ContextPayload {
	pub fn empty(domain: Domain, budget: u32) -> Self {
		Self {
			domain,
			items: Vec::new(),
			total_tokens: 0,
			budget,
			skipped: Vec::new(),
			unresolved: Vec::new(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	/// Prompt block: one `### Title (Domain)` entry per item, in selection order. Separators are
	/// counted in `total_tokens`.
	pub fn render(&self) -> String {
		self.items.iter().map(|item| item.text.as_str()).collect::<Vec<_>>().join(ITEM_SEPARATOR)
	}

	pub fn summary(&self) -> ContextSummary {
		ContextSummary {
			pages: self
				.items
				.iter()
				.map(|item| (item.page_id.clone(), item.title.clone(), item.tier, item.tokens))
				.collect(),
			total_tokens: self.total_tokens,
			budget: self.budget,
			skipped: self.skipped.len(),
			unresolved: self.unresolved.iter().map(|name| name.name.clone()).collect(),
		}
	}
}

impl GddService {
	pub async fn select_context(&self, request: &ContextRequest) -> Result<ContextPayload> {
		let budget = request.max_tokens.unwrap_or(self.cfg.context.max_tokens);
		let needs_candidates =
			request.selections.iter().any(|selection| matches!(selection.target, Target::Name(_)));
		let candidates = if needs_candidates {
			self.fetcher.list_domains(&self.sources()).await?
		} else {
			Vec::new()
		};
		let separator_tokens =
			tokens::estimate_tokens(ITEM_SEPARATOR, self.cfg.context.chars_per_token);
		let mut payload = ContextPayload::empty(request.domain, budget);
		let mut seen = HashSet::new();

		for selection in &request.selections {
			let (page_id, domain) = match &selection.target {
				Target::PageId(id) => match gdd_notion::normalize_id(id) {
					Ok(id) => (id, None),
					Err(err) => {
						payload.skipped.push(SkippedItem {
							page_id: id.clone(),
							title: None,
							reason: err.to_string(),
						});

						continue;
					},
				},
				Target::Name(name) => match self.resolve_name(name, &candidates) {
					Some(hit) => (hit.page.id.clone(), Some(hit.domain)),
					None => {
						tracing::info!(name = %name, "Context name did not resolve.");

						payload.unresolved.push(UnresolvedName {
							name: name.clone(),
							suggestions: self.suggestions(name, &candidates),
						});

						continue;
					},
				},
			};

			if !seen.insert(page_id.clone()) {
				tracing::debug!(page_id = %page_id, "Skipping duplicate context page.");

				continue;
			}

			let separator = if payload.items.is_empty() { 0 } else { separator_tokens };
			let remaining = budget.saturating_sub(payload.total_tokens + separator);

			match self.place(&page_id, selection.tier, domain, remaining).await {
				Placement::Placed(item) => {
					payload.total_tokens += separator + item.tokens;

					payload.items.push(item);
				},
				Placement::Skipped(skipped) => payload.skipped.push(skipped),
			}
		}

		tracing::info!(
			items = payload.items.len(),
			total_tokens = payload.total_tokens,
			budget,
			skipped = payload.skipped.len(),
			unresolved = payload.unresolved.len(),
			"Context selected."
		);

		Ok(payload)
	}

	/// Pages of every configured database whose titles appear in `brief`. Pages from domains
	/// that `domain` links to come first.
	pub async fn suggest_context(&self, domain: Domain, brief: &str) -> Result<Vec<Mention>> {
		let candidates = self.fetcher.list_domains(&self.sources()).await?;
		let mentions = matcher::find_mentions(brief, pairs(&candidates));
		let linked: HashSet<Domain> =
			domain.schema().relations.iter().map(|relation| relation.target).collect();
		let mut out: Vec<Mention> = mentions
			.into_iter()
			.filter_map(|hit| {
				candidates.iter().find(|candidate| candidate.page.id == hit.id).map(|candidate| {
					Mention { domain: candidate.domain, page_id: hit.id, title: hit.title }
				})
			})
			.collect();

		out.sort_by_key(|mention| !linked.contains(&mention.domain));

		Ok(out)
	}

	/// Ranks pages of one domain (or of every configured domain) against a free-text query.
	pub async fn search_pages(
		&self,
		domain: Option<Domain>,
		query: &str,
		min_score: f32,
		limit: usize,
	) -> Result<Vec<DomainMatch>> {
		let sources: Vec<_> = self
			.sources()
			.into_iter()
			.filter(|source| domain.is_none_or(|wanted| source.domain == wanted))
			.collect();
		let candidates = self.fetcher.list_domains(&sources).await?;
		let ranked = matcher::rank(query, pairs(&candidates), min_score, limit);

		Ok(ranked
			.into_iter()
			.filter_map(|matched| {
				candidates
					.iter()
					.find(|candidate| candidate.page.id == matched.id)
					.map(|candidate| DomainMatch { domain: candidate.domain, matched })
			})
			.collect())
	}

	fn resolve_name<'a>(
		&self,
		name: &str,
		candidates: &'a [SourcedPage],
	) -> Option<&'a SourcedPage> {
		let hit = matcher::best_match(name, pairs(candidates), self.cfg.matching.min_score)?;

		tracing::debug!(name, title = %hit.title, score = hit.score, "Resolved context name.");

		candidates.iter().find(|candidate| candidate.page.id == hit.id)
	}

	fn suggestions(&self, name: &str, candidates: &[SourcedPage]) -> Vec<FuzzyMatch> {
		matcher::rank(name, pairs(candidates), 0.0, self.cfg.matching.max_suggestions as usize)
	}

	async fn place(
		&self,
		page_id: &str,
		tier: Tier,
		domain: Option<Domain>,
		remaining: u32,
	) -> Placement {
		if tier == Tier::Full {
			match self.fetcher.full(page_id).await {
				Ok(content) => {
					let item = self.build_item(
						&content.summary,
						domain,
						Tier::Full,
						&content.properties,
						&content.body,
					);

					if item.tokens <= remaining {
						return Placement::Placed(item);
					}

					tracing::debug!(
						page_id,
						tokens = item.tokens,
						remaining,
						"Full page exceeds budget; trying preview."
					);
				},
				Err(err) => return Placement::Skipped(fetch_failure(page_id, err)),
			}
		}

		let preview = match self.fetcher.preview(page_id).await {
			Ok(preview) => preview,
			Err(err) => return Placement::Skipped(fetch_failure(page_id, err)),
		};
		let mut item = self.build_item(
			&preview.summary,
			domain,
			Tier::Preview,
			&preview.properties,
			&preview.excerpt,
		);

		item.downgraded = tier == Tier::Full;

		if item.tokens <= remaining {
			return Placement::Placed(item);
		}

		Placement::Skipped(SkippedItem {
			page_id: page_id.to_string(),
			title: Some(item.title),
			reason: format!(
				"Needs {} tokens but only {remaining} remain in the budget.",
				item.tokens
			),
		})
	}

	fn build_item(
		&self,
		summary: &PageSummary,
		domain: Option<Domain>,
		tier: Tier,
		properties: &BTreeMap<String, String>,
		body: &str,
	) -> ContextItem {
		let domain = domain.or_else(|| {
			summary.database_id.as_deref().and_then(|id| self.domain_of_database(id))
		});
		let text = render_item(&summary.title, domain, properties, body);
		let tokens = tokens::estimate_tokens(&text, self.cfg.context.chars_per_token);

		ContextItem {
			page_id: summary.id.clone(),
			title: summary.title.clone(),
			domain,
			url: summary.url.clone(),
			tier,
			downgraded: false,
			text,
			tokens,
		}
	}
}

fn render_item(
	title: &str,
	domain: Option<Domain>,
	properties: &BTreeMap<String, String>,
	body: &str,
) -> String {
	let mut out = match domain {
		Some(domain) => format!("### {title} ({})\n", domain.label()),
		None => format!("### {title}\n"),
	};

	for (name, value) in properties {
		out.push_str(&format!("- {name}: {value}\n"));
	}

	if !body.trim().is_empty() {
		if !properties.is_empty() {
			out.push('\n');
		}

		out.push_str(body.trim());
	}

	out.trim_end().to_string()
}

pub(crate) fn pairs(pages: &[SourcedPage]) -> impl Iterator<Item = (&str, &str)> {
	pages.iter().map(|candidate| (candidate.page.id.as_str(), candidate.page.title.as_str()))
}

fn fetch_failure(page_id: &str, err: gdd_notion::Error) -> SkippedItem {
	tracing::warn!(page_id, error = %err, "Context page could not be fetched.");

	SkippedItem { page_id: page_id.to_string(), title: None, reason: err.to_string() }
}
