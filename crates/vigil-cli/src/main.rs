use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vigil_infrastructure::VigilPaths;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "vigil - unattended desktop automation agent", long_about = None)]
struct Cli {
    /// Directory holding settings.toml, agent.toml and logs/
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor loop until superseded by a newer agent
    Run,
    /// Upload one file through the resumable upload client
    Upload {
        /// Local file to upload
        file: PathBuf,
        /// Destination path in the store
        remote_path: String,
    },
    /// Print the persisted agent record
    Record,
    /// Poll the controller for commands once and apply their record changes
    Poll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = VigilPaths::resolve(cli.config_dir.as_deref())?;
    let _guard = logging::init(&paths)?;

    match cli.command {
        Commands::Run => commands::run::run(&paths).await?,
        Commands::Upload { file, remote_path } => {
            commands::upload::upload(&paths, &file, &remote_path).await?
        }
        Commands::Record => commands::record::show(&paths)?,
        Commands::Poll => commands::poll::poll(&paths).await?,
    }

    Ok(())
}
