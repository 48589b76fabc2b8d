use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "watchlimit-cli", version, about = "Watchlimit CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Video(commands::video::VideoAction),
    /// Open a URL in a simulated tab and answer the overlay from stdin
    Visit {
        /// Page URL, e.g. https://www.youtube.com/watch?v=dQw4w9WgXcQ
        url: String,
        /// Title the page reports for the video
        #[arg(long)]
        title: Option<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("WATCHLIMIT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Video(action) => commands::video::run(action).await,
        Commands::Visit { url, title } => commands::visit::run(&url, title).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
