use std::path::Path;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bifrost", about = "Bifrost - federated statistical graph gateway")]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Validate a CSV import directory without serving
	CheckImport {
		/// Path to the import directory
		#[arg(long)]
		dir: String,
	},
	/// Run the gateway (default)
	Run,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	match cli.command.unwrap_or(Commands::Run) {
		Commands::CheckImport { dir } => match bifrost::ingest::CsvStore::open(Path::new(&dir)) {
			Ok(_) => println!("import directory {} loads cleanly", dir),
			Err(e) => {
				eprintln!("import directory {} failed to load: {}", dir, e);
				std::process::exit(1);
			}
		},
		Commands::Run => {
			match bifrost::config::load() {
				Ok(settings) => println!(
					"Loaded settings: host={} port={}",
					settings.host, settings.port
				),
				Err(e) => eprintln!("Warning: failed to load config: {}", e),
			}

			bifrost::run().await;
		}
	}
}
