use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{GddService, Result};
use gdd_domain::{Draft, FuzzyMatch, matcher};
use gdd_notion::PageSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelationResolution {
	Resolved { property: String, name: String, page_id: String, title: String, score: f32 },
	Unresolved { property: String, name: String, suggestions: Vec<FuzzyMatch> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationReport {
	pub resolutions: Vec<RelationResolution>,
}

impl RelationResolution {
	pub fn property(&self) -> &str {
		match self {
			Self::Resolved { property, .. } | Self::Unresolved { property, .. } => property,
		}
	}

	pub fn name(&self) -> &str {
		match self {
			Self::Resolved { name, .. } | Self::Unresolved { name, .. } => name,
		}
	}

	pub fn is_resolved(&self) -> bool {
		matches!(self, Self::Resolved { .. })
	}
}

impl RelationReport {
	/// Page ids resolved for `property`, in draft order.
	pub fn page_ids(&self, property: &str) -> Vec<&str> {
		self.resolutions
			.iter()
			.filter_map(|resolution| match resolution {
				RelationResolution::Resolved { property: p, page_id, .. } if p == property =>
					Some(page_id.as_str()),
				_ => None,
			})
			.collect()
	}

	pub fn unresolved(&self) -> Vec<&RelationResolution> {
		self.resolutions.iter().filter(|resolution| !resolution.is_resolved()).collect()
	}
}

impl GddService {
	/// Resolves every relation property of `draft` against its target domain's main database.
	pub async fn resolve_relations(&self, draft: &Draft) -> Result<RelationReport> {
		let mut report = RelationReport::default();

		for field in draft.domain.schema().relations {
			let names = draft.relation_values(field.property);

			if names.is_empty() {
				continue;
			}

			let candidates = match self.main_database(field.target) {
				Ok(database_id) => self.fetcher.list_pages(database_id).await?,
				Err(_) => {
					tracing::warn!(
						property = field.property,
						target = field.target.key(),
						"Relation target domain has no database; names stay unresolved."
					);

					Vec::new()
				},
			};
			let mut seen = HashSet::new();

			for (index, name) in names.into_iter().enumerate() {
				if !field.multiple && index > 0 {
					report.resolutions.push(RelationResolution::Unresolved {
						property: field.property.to_string(),
						name,
						suggestions: Vec::new(),
					});

					continue;
				}

				let resolution = self.resolve_one(field.property, name, &candidates);

				if let RelationResolution::Resolved { page_id, .. } = &resolution
					&& !seen.insert(page_id.clone())
				{
					continue;
				}

				report.resolutions.push(resolution);
			}
		}

		tracing::info!(
			domain = draft.domain.key(),
			resolved = report.resolutions.iter().filter(|r| r.is_resolved()).count(),
			unresolved = report.unresolved().len(),
			"Relations resolved."
		);

		Ok(report)
	}

	fn resolve_one(
		&self,
		property: &str,
		name: String,
		candidates: &[PageSummary],
	) -> RelationResolution {
		let pairs = candidates.iter().map(|page| (page.id.as_str(), page.title.as_str()));
		let limit = (self.cfg.matching.max_suggestions as usize).max(1);
		let ranked = matcher::rank(&name, pairs, 0.0, limit);
		let best = ranked
			.first()
			.filter(|best| best.score >= self.cfg.matching.min_score)
			.map(|best| (best.id.clone(), best.title.clone(), best.score));

		match best {
			Some((page_id, title, score)) => RelationResolution::Resolved {
				property: property.to_string(),
				name,
				page_id,
				title,
				score,
			},
			None => RelationResolution::Unresolved {
				property: property.to_string(),
				name,
				suggestions: ranked,
			},
		}
	}
}
