use serde::{Deserialize, Serialize};

use crate::matcher::normalize_name;

/// Content category of the GDD. Each domain maps to one Notion schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
	Personnages,
	Lieux,
	Communautes,
	Especes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationField {
	pub property: &'static str,
	pub target: Domain,
	pub multiple: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct DomainSchema {
	pub title_property: &'static str,
	pub text_properties: &'static [&'static str],
	pub required_properties: &'static [&'static str],
	pub relations: &'static [RelationField],
}

static PERSONNAGES: DomainSchema = DomainSchema {
	title_property: "Nom",
	text_properties: &["Alias", "Type", "Genre", "Âge", "Occupation", "Rôle", "Résumé"],
	required_properties: &["Type", "Résumé"],
	relations: &[
		RelationField { property: "Espèce", target: Domain::Especes, multiple: false },
		RelationField { property: "Communautés", target: Domain::Communautes, multiple: true },
		RelationField { property: "Lieux de vie", target: Domain::Lieux, multiple: true },
	],
};
static LIEUX: DomainSchema = DomainSchema {
	title_property: "Nom",
	text_properties: &["Catégorie", "Taille", "Climat", "Résumé"],
	required_properties: &["Catégorie", "Résumé"],
	relations: &[
		RelationField { property: "Contenu par", target: Domain::Lieux, multiple: false },
		RelationField {
			property: "Communautés présentes",
			target: Domain::Communautes,
			multiple: true,
		},
		RelationField {
			property: "Personnages présents",
			target: Domain::Personnages,
			multiple: true,
		},
	],
};
static COMMUNAUTES: DomainSchema = DomainSchema {
	title_property: "Nom",
	text_properties: &["Type", "Idéologie", "Taille", "Résumé"],
	required_properties: &["Type", "Résumé"],
	relations: &[
		RelationField { property: "Lieux", target: Domain::Lieux, multiple: true },
		RelationField { property: "Espèces", target: Domain::Especes, multiple: true },
		RelationField { property: "Dirigeants", target: Domain::Personnages, multiple: true },
	],
};
static ESPECES: DomainSchema = DomainSchema {
	title_property: "Nom",
	text_properties: &["Morphologie", "Habitat", "Longévité", "Régime", "Résumé"],
	required_properties: &["Morphologie", "Résumé"],
	relations: &[
		RelationField { property: "Communautés", target: Domain::Communautes, multiple: true },
		RelationField { property: "Lieux d'origine", target: Domain::Lieux, multiple: true },
	],
};

impl Domain {
	pub const ALL: [Domain; 4] =
		[Domain::Personnages, Domain::Lieux, Domain::Communautes, Domain::Especes];

	/// Key used in `notion.databases.<key>`.
	pub fn key(self) -> &'static str {
		match self {
			Self::Personnages => "personnages",
			Self::Lieux => "lieux",
			Self::Communautes => "communautes",
			Self::Especes => "especes",
		}
	}

	pub fn label(self) -> &'static str {
		match self {
			Self::Personnages => "Personnages",
			Self::Lieux => "Lieux",
			Self::Communautes => "Communautés",
			Self::Especes => "Espèces",
		}
	}

	/// Singular English noun, used in prompts.
	pub fn entity_noun(self) -> &'static str {
		match self {
			Self::Personnages => "character",
			Self::Lieux => "location",
			Self::Communautes => "community",
			Self::Especes => "species",
		}
	}

	/// Accepts French or English names, singular or plural, with or without accents.
	pub fn parse(raw: &str) -> Option<Self> {
		let normalized = normalize_name(raw);

		match normalized.as_str() {
			"personnages" | "personnage" | "characters" | "character" | "pnj" => {
				Some(Self::Personnages)
			},
			"lieux" | "lieu" | "locations" | "location" | "places" | "place" => Some(Self::Lieux),
			"communautes" | "communaute" | "communities" | "community" | "factions" => {
				Some(Self::Communautes)
			},
			"especes" | "espece" | "species" | "races" | "race" => Some(Self::Especes),
			_ => None,
		}
	}

	pub fn schema(self) -> &'static DomainSchema {
		match self {
			Self::Personnages => &PERSONNAGES,
			Self::Lieux => &LIEUX,
			Self::Communautes => &COMMUNAUTES,
			Self::Especes => &ESPECES,
		}
	}
}

impl std::fmt::Display for Domain {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.label())
	}
}

impl DomainSchema {
	/// Finds the canonical schema property for a free-form name.
	pub fn canonical_property(&self, name: &str) -> Option<&'static str> {
		let normalized = normalize_name(name);

		if normalized.is_empty() {
			return None;
		}

		std::iter::once(self.title_property)
			.chain(self.text_properties.iter().copied())
			.chain(self.relations.iter().map(|relation| relation.property))
			.find(|property| normalize_name(property) == normalized)
	}

	pub fn relation(&self, property: &str) -> Option<&'static RelationField> {
		let normalized = normalize_name(property);

		self.relations.iter().find(|relation| normalize_name(relation.property) == normalized)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_aliases_without_accents() {
		assert_eq!(Domain::parse("Communautés"), Some(Domain::Communautes));
		assert_eq!(Domain::parse("ESPECES"), Some(Domain::Especes));
		assert_eq!(Domain::parse("character"), Some(Domain::Personnages));
		assert_eq!(Domain::parse(" lieux "), Some(Domain::Lieux));
		assert_eq!(Domain::parse("vehicles"), None);
	}

	#[test]
	fn keys_round_trip_through_parse() {
		for domain in Domain::ALL {
			assert_eq!(Domain::parse(domain.key()), Some(domain));
			assert_eq!(Domain::parse(domain.label()), Some(domain));
		}
	}

	#[test]
	fn canonical_property_ignores_case_and_accents() {
		let schema = Domain::Personnages.schema();

		assert_eq!(schema.canonical_property("espece"), Some("Espèce"));
		assert_eq!(schema.canonical_property("RESUME"), Some("Résumé"));
		assert_eq!(schema.canonical_property("nom"), Some("Nom"));
		assert_eq!(schema.canonical_property("Couleur"), None);
	}

	#[test]
	fn relation_targets_follow_schema() {
		let relation =
			Domain::Personnages.schema().relation("lieux de vie").expect("Missing relation.");

		assert_eq!(relation.target, Domain::Lieux);
		assert!(relation.multiple);
	}
}
