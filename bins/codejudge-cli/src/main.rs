mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codejudge-cli")]
#[command(about = "Codejudge CLI - Run code in the sandbox, manage challenges and submissions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported languages and their images
    Languages,

    /// Compile and run a single program in the sandbox
    Run {
        /// Language id (python, go, c, cpp, rust)
        #[arg(short, long)]
        language: String,

        /// Source file
        #[arg(short, long)]
        file: PathBuf,

        /// File fed to the program on stdin (empty when omitted)
        #[arg(short, long)]
        stdin_file: Option<PathBuf>,

        /// Memory limit in MB (defaults to DEFAULT_MEMORY_BYTES)
        #[arg(short, long)]
        memory_mb: Option<u64>,

        /// Time limit in milliseconds (defaults to DEFAULT_TIME_LIMIT_MS)
        #[arg(short, long)]
        time_ms: Option<u64>,
    },

    /// Manage challenges
    Challenge {
        #[command(subcommand)]
        action: ChallengeAction,
    },

    /// Submit a source file for grading
    Submit {
        /// Challenge id
        #[arg(short, long)]
        challenge: u64,

        /// Language id
        #[arg(short, long)]
        language: String,

        /// Source file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show a submission and its per-testcase verdicts
    Status {
        /// Submission id
        #[arg(short, long)]
        id: u64,
    },
}

#[derive(Subcommand)]
enum ChallengeAction {
    /// Validate a challenge JSON file and store it
    Create {
        /// Challenge definition (JSON)
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    codejudge_common::logging::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Languages => {
            commands::list_languages();
        }
        Commands::Run {
            language,
            file,
            stdin_file,
            memory_mb,
            time_ms,
        } => {
            commands::run_program(&language, &file, stdin_file.as_deref(), memory_mb, time_ms).await?;
        }
        Commands::Challenge {
            action: ChallengeAction::Create { file },
        } => {
            commands::create_challenge(&file).await?;
        }
        Commands::Submit {
            challenge,
            language,
            file,
        } => {
            commands::submit(challenge, &language, &file).await?;
        }
        Commands::Status { id } => {
            commands::show_status(id).await?;
        }
    }

    Ok(())
}
