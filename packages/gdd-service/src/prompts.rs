//! Prompt builders for the four generation stages.

use gdd_domain::{Domain, DomainSchema};

const SHARED_RULES: &str = "\
Tu écris pour le GDD Alteir, un univers de jeu de rôle. Reste cohérent avec le contexte fourni, \
n'invente pas de faits qui le contredisent et écris en français.";

pub fn format_instructions(domain: Domain) -> String {
	let schema = domain.schema();
	let mut out = String::from("Format attendu (Markdown) :\n");

	out.push_str(&format!("# <{}>\n\n", schema.title_property));

	for property in properties(schema) {
		out.push_str(&format!("- **{property}**: <valeur>\n"));
	}

	out.push_str("\n## <Section>\n<texte>\n\n");
	out.push_str(&format!("Propriétés obligatoires : {}.\n", schema.required_properties.join(", ")));

	let relations: Vec<String> = schema
		.relations
		.iter()
		.map(|relation| {
			let arity =
				if relation.multiple { "noms séparés par des virgules" } else { "un seul nom" };

			format!("{} ({}, {arity})", relation.property, relation.target.label())
		})
		.collect();

	if !relations.is_empty() {
		out.push_str(&format!(
			"Relations, en citant des noms existants du contexte quand c'est possible : {}.\n",
			relations.join("; ")
		));
	}

	out
}

pub fn writer_system(domain: Domain) -> String {
	format!(
		"{SHARED_RULES}\nTu es l'auteur : rédige une fiche complète de {} ({}).\n\n{}",
		domain.entity_noun(),
		domain.label(),
		format_instructions(domain)
	)
}

pub fn writer_user(brief: &str, context: &str) -> String {
	let mut out = format!("Demande :\n{}\n", brief.trim());

	if !context.trim().is_empty() {
		out.push_str("\nContexte existant :\n");
		out.push_str(context.trim());
		out.push('\n');
	}

	out
}

pub fn reviewer_system(domain: Domain) -> String {
	format!(
		"{SHARED_RULES}\nTu es relecteur pour le domaine {}. Liste les incohérences avec le \
		 contexte, les propriétés manquantes et les faiblesses narratives, sous forme de puces. \
		 Ne réécris pas la fiche.",
		domain.label()
	)
}

pub fn reviewer_user(draft: &str, context: &str) -> String {
	format!("Fiche à relire :\n{}\n\n{}", draft.trim(), context_block(context))
}

pub fn corrector_system(domain: Domain) -> String {
	format!(
		"{SHARED_RULES}\nTu es correcteur : réécris la fiche en appliquant la relecture. Renvoie \
		 uniquement la fiche corrigée.\n\n{}",
		format_instructions(domain)
	)
}

pub fn corrector_user(draft: &str, review: &str) -> String {
	format!("Fiche :\n{}\n\nRelecture :\n{}", draft.trim(), review.trim())
}

pub fn validator_system(domain: Domain) -> String {
	format!(
		"Tu valides des fiches du domaine {} pour le GDD Alteir. Réponds uniquement avec un objet \
		 JSON de la forme {{\"valid\": true|false, \"issues\": [\"...\"]}}.\n\n{}",
		domain.label(),
		format_instructions(domain)
	)
}

pub fn validator_user(draft: &str, context: &str) -> String {
	format!("Fiche :\n{}\n\n{}", draft.trim(), context_block(context))
}

fn context_block(context: &str) -> String {
	if context.trim().is_empty() {
		"Aucun contexte fourni.".to_string()
	} else {
		format!("Contexte :\n{}", context.trim())
	}
}

fn properties(schema: &DomainSchema) -> impl Iterator<Item = &'static str> + '_ {
	let relations = schema.relations.iter().map(|relation| relation.property);

	schema.text_properties.iter().copied().chain(relations)
}
