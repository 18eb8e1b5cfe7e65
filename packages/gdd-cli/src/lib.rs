use clap::builder::{
	Styles,
	styling::{AnsiColor, Effects},
};

pub const VERSION: &str = concat!(
	env!("CARGO_PKG_VERSION"),
	"-",
	env!("VERGEN_GIT_SHA"),
	"-",
	env!("VERGEN_CARGO_TARGET_TRIPLE"),
);

pub fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Yellow.on_default() | Effects::BOLD)
		.usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
		.literal(AnsiColor::Cyan.on_default() | Effects::BOLD)
		.placeholder(AnsiColor::Green.on_default())
}

/// Clap value parser for domain arguments; accepts French or English names.
pub fn parse_domain(raw: &str) -> Result<gdd_domain::Domain, String> {
	gdd_domain::Domain::parse(raw).ok_or_else(|| {
		let known: Vec<&str> = gdd_domain::Domain::ALL.iter().map(|domain| domain.key()).collect();

		format!("Unknown domain `{raw}`. Expected one of: {}.", known.join(", "))
	})
}
