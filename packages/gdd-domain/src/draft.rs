use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Domain, matcher::normalize_name};

static BOLD_PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^\s*(?:[-*+]\s+)?\*\*(?P<name>[^*]+?)(?::\s*\*\*|\*\*\s*:)\s*(?P<value>.*)$")
		.expect("Bold property pattern must compile.")
});
static PLAIN_PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^\s*(?:[-*+]\s+)?(?P<name>[^:#*\n]{1,48}?)\s*:\s*(?P<value>.+)$")
		.expect("Plain property pattern must compile.")
});
static RELATION_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)\s*(?:[,;\n]|\s+et\s+|\s+and\s+)\s*")
		.expect("Relation separator pattern must compile.")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
	pub heading: String,
	pub body: String,
}

/// Structured form of a generated entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
	pub domain: Domain,
	pub title: String,
	/// Keys use the schema spelling when the name matches a schema property.
	pub properties: BTreeMap<String, String>,
	/// Free text between the property block and the first section.
	pub preamble: String,
	pub sections: Vec<Section>,
}

impl Draft {
	pub fn parse(domain: Domain, markdown: &str) -> Self {
		let schema = domain.schema();
		let mut title = String::new();
		let mut properties = BTreeMap::new();
		let mut preamble: Vec<&str> = Vec::new();
		let mut sections: Vec<Section> = Vec::new();
		let mut current: Option<(String, Vec<&str>)> = None;
		let mut in_fence = false;

		for line in markdown.lines() {
			let trimmed = line.trim();

			if trimmed.starts_with("```") {
				in_fence = !in_fence;
			}
			if !in_fence {
				if let Some(heading) = trimmed.strip_prefix("## ") {
					if let Some((heading, body)) = current.take() {
						sections.push(Section { heading, body: join_body(&body) });
					}

					current = Some((clean_heading(heading), Vec::new()));

					continue;
				}
				if title.is_empty()
					&& current.is_none()
					&& let Some(heading) = trimmed.strip_prefix("# ")
				{
					title = clean_heading(heading);

					continue;
				}
			}

			if let Some((_, body)) = current.as_mut() {
				body.push(line);

				continue;
			}
			if !in_fence && let Some((name, value)) = parse_property_line(line, domain) {
				let key = schema.canonical_property(&name).map(str::to_string).unwrap_or(name);

				properties.insert(key, value);

				continue;
			}

			preamble.push(line);
		}

		if let Some((heading, body)) = current.take() {
			sections.push(Section { heading, body: join_body(&body) });
		}

		if title.is_empty()
			&& let Some(name) = properties.remove(schema.title_property)
		{
			title = name;
		} else if !title.is_empty() {
			properties.remove(schema.title_property);
		}

		Self { domain, title, properties, preamble: join_body(&preamble), sections }
	}

	/// Looks up a property by name, ignoring case and accents.
	pub fn property(&self, name: &str) -> Option<&str> {
		let normalized = normalize_name(name);

		self.properties
			.iter()
			.find(|(key, _)| normalize_name(key) == normalized)
			.map(|(_, value)| value.as_str())
	}

	/// Splits a relation property into individual entity names.
	pub fn relation_values(&self, property: &str) -> Vec<String> {
		let Some(raw) = self.property(property) else { return Vec::new() };

		split_names(raw)
	}

	/// Schema properties that are absent or blank, title first.
	pub fn missing_required(&self) -> Vec<&'static str> {
		let schema = self.domain.schema();
		let mut missing = Vec::new();

		if self.title.trim().is_empty() {
			missing.push(schema.title_property);
		}

		for property in schema.required_properties {
			let present = self.property(property).map(|value| !value.trim().is_empty());

			if !present.unwrap_or(false) {
				missing.push(*property);
			}
		}

		missing
	}

	pub fn to_markdown(&self) -> String {
		let mut out = String::new();

		if !self.title.is_empty() {
			out.push_str("# ");
			out.push_str(&self.title);
			out.push_str("\n\n");
		}
		if !self.properties.is_empty() {
			for (key, value) in &self.properties {
				out.push_str(&format!("- **{key}**: {value}\n"));
			}

			out.push('\n');
		}
		if !self.preamble.is_empty() {
			out.push_str(&self.preamble);
			out.push_str("\n\n");
		}

		for section in &self.sections {
			out.push_str("## ");
			out.push_str(&section.heading);
			out.push_str("\n\n");

			if !section.body.is_empty() {
				out.push_str(&section.body);
				out.push_str("\n\n");
			}
		}

		let trimmed_len = out.trim_end().len();

		out.truncate(trimmed_len);
		out.push('\n');

		out
	}
}

pub fn split_names(raw: &str) -> Vec<String> {
	RELATION_SEPARATOR
		.split(raw)
		.map(|name| {
			name.trim()
				.trim_start_matches("[[")
				.trim_end_matches("]]")
				.trim_end_matches('.')
				.trim()
				.to_string()
		})
		.filter(|name| !name.is_empty() && !is_placeholder(name))
		.collect()
}

fn is_placeholder(name: &str) -> bool {
	matches!(
		normalize_name(name).as_str(),
		"aucun" | "aucune" | "none" | "n a" | "inconnu" | "unknown"
	)
}

fn parse_property_line(line: &str, domain: Domain) -> Option<(String, String)> {
	if let Some(captures) = BOLD_PROPERTY.captures(line) {
		let name = captures.name("name")?.as_str().trim().trim_end_matches(':').trim();
		let value = captures.name("value")?.as_str().trim();

		if name.is_empty() {
			return None;
		}

		return Some((name.to_string(), value.to_string()));
	}

	let captures = PLAIN_PROPERTY.captures(line)?;
	let name = captures.name("name")?.as_str().trim();

	// Plain `Name: value` lines are only trusted for schema properties.
	domain.schema().canonical_property(name)?;

	Some((name.to_string(), captures.name("value")?.as_str().trim().to_string()))
}

fn clean_heading(raw: &str) -> String {
	raw.trim().trim_matches('*').trim().to_string()
}

fn join_body(lines: &[&str]) -> String {
	lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = "\
# Kael Drunmor

- **Type** : PNJ
- **Espèce**: Humain
- **Communautés**: Les Veilleurs; Guilde des Cartographes et Ordre du Val
Résumé: Cartographe exilé.

Un homme discret.

## Apparence

Grand, cicatrice au menton.

## Histoire

Né à Port-Sel.
```
## pas une section
```
";

	#[test]
	fn parses_title_properties_and_sections() {
		let draft = Draft::parse(Domain::Personnages, SAMPLE);

		assert_eq!(draft.title, "Kael Drunmor");
		assert_eq!(draft.property("type"), Some("PNJ"));
		assert_eq!(draft.property("Espece"), Some("Humain"));
		assert_eq!(draft.property("Résumé"), Some("Cartographe exilé."));
		assert_eq!(draft.preamble, "Un homme discret.");
		assert_eq!(draft.sections.len(), 2);
		assert_eq!(draft.sections[0].heading, "Apparence");
		assert!(draft.sections[1].body.contains("## pas une section"));
	}

	#[test]
	fn splits_relation_values() {
		let draft = Draft::parse(Domain::Personnages, SAMPLE);

		assert_eq!(
			draft.relation_values("Communautés"),
			vec!["Les Veilleurs", "Guilde des Cartographes", "Ordre du Val"]
		);
		assert!(draft.relation_values("Lieux de vie").is_empty());
	}

	#[test]
	fn placeholder_relations_are_dropped() {
		assert!(split_names("Aucune.").is_empty());
		assert_eq!(split_names("[[Port-Sel]], N/A"), vec!["Port-Sel"]);
	}

	#[test]
	fn reports_missing_required_properties() {
		let draft = Draft::parse(Domain::Lieux, "## Description\n\nUne crique.");

		assert_eq!(draft.missing_required(), vec!["Nom", "Catégorie", "Résumé"]);
	}

	#[test]
	fn bold_prose_stays_in_preamble() {
		let draft = Draft::parse(
			Domain::Personnages,
			"# Kael\n\n- **Type**: PNJ\n- **Rôle:** Guide\n\n**Kael** est un cartographe discret.\n\n## Histoire\nNé.",
		);

		assert_eq!(draft.property("Type"), Some("PNJ"));
		assert_eq!(draft.property("Rôle"), Some("Guide"));
		assert!(draft.property("Kael").is_none());
		assert_eq!(draft.properties.len(), 2);
		assert_eq!(draft.preamble, "**Kael** est un cartographe discret.");
	}

	#[test]
	fn title_falls_back_to_title_property() {
		let draft = Draft::parse(Domain::Especes, "**Nom**: Sylvaris\n**Morphologie**: Ailée");

		assert_eq!(draft.title, "Sylvaris");
		assert!(draft.property("Nom").is_none());
	}

	#[test]
	fn markdown_round_trip_is_stable() {
		let draft = Draft::parse(Domain::Personnages, SAMPLE);
		let reparsed = Draft::parse(Domain::Personnages, &draft.to_markdown());

		assert_eq!(reparsed, draft);
	}
}
