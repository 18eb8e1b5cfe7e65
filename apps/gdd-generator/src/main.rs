use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = gdd_generator::Args::parse();
	gdd_generator::run(args).await
}
