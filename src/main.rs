use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stentor::config::Config;
use stentor::error;
use stentor::harvest::{self, HarvestArgs};
use stentor::queue::{self, QueueArgs};
use stentor::supervisor::{self, ProcessArgs};
use stentor::transcribe::TIMEOUT_DURATION_MULTIPLIER;

/// unattended audio-to-text ingestion – harvest, queue, transcribe
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain the inbox: run one supervised transcription job per media file
    Queue {
        /// Delete the normalized WAV and segment files on success
        #[arg(long)]
        cleanup_wav_files: bool,

        /// Remove the per-job run directory on success
        #[arg(long)]
        cleanup_run_logs: bool,

        /// Delete the original media file from completed/ once the
        /// transcript is copied
        #[arg(long)]
        cleanup_original_audio: bool,

        /// Enable all three cleanup flags
        #[arg(long)]
        aggressive_cleanup: bool,

        /// Ordered, comma-separated model list passed to each job
        #[arg(long, value_name = "m1,m2,...")]
        models: Option<String>,

        /// Per-segment timeout multiplier passed to each job
        #[arg(long, value_name = "N")]
        timeout_multiplier: Option<u32>,
    },

    /// Process a single media file into a transcript (spawned by `queue`)
    Process {
        /// Delete the normalized WAV and segment files on success
        #[arg(long)]
        cleanup_temp_audio: bool,

        /// Media file to transcribe
        input_audio_file: PathBuf,

        /// Ordered, comma-separated model list
        model_list_csv: Option<String>,

        /// Per-segment timeout multiplier (positive integer)
        timeout_multiplier: Option<u32>,
    },

    /// Download new sources and stage them into the worker inbox
    Harvest {
        /// Source list file (defaults to content_sources.txt in the config
        /// directory)
        #[arg(long, value_name = "FILE")]
        sources: Option<PathBuf>,

        /// Stop each listing URL at the first already-archived entry
        #[arg(long)]
        break_on_existing: bool,
    },

    /// Copy finished transcripts from the worker into LOCAL_TRANSCRIPT_DIR
    Pull,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(
        "stentor=info"
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        None => {
            // No arguments is a question, not a mistake.
            let _ = Cli::command().print_help();
            println!();
            error::EXIT_SUCCESS
        }
        Some(Commands::Queue {
            cleanup_wav_files,
            cleanup_run_logs,
            cleanup_original_audio,
            aggressive_cleanup,
            models,
            timeout_multiplier,
        }) => queue::run(&QueueArgs {
            cleanup_wav_files: cleanup_wav_files || aggressive_cleanup,
            cleanup_run_logs: cleanup_run_logs || aggressive_cleanup,
            cleanup_original_audio: cleanup_original_audio || aggressive_cleanup,
            models,
            timeout_multiplier,
        }),
        Some(Commands::Process {
            cleanup_temp_audio,
            input_audio_file,
            model_list_csv,
            timeout_multiplier,
        }) => match Config::load() {
            Ok(cfg) => supervisor::run(&ProcessArgs {
                input: input_audio_file,
                models: model_list_csv
                    .as_deref()
                    .map(supervisor::parse_model_list)
                    .unwrap_or_default(),
                timeout_multiplier: timeout_multiplier.unwrap_or(TIMEOUT_DURATION_MULTIPLIER),
                cleanup_temp_audio,
                models_dir: cfg.models_dir,
            }),
            Err(err) => error::report(&err),
        },
        Some(Commands::Harvest {
            sources,
            break_on_existing,
        }) => harvest::run(&HarvestArgs {
            sources,
            break_on_existing,
        }),
        Some(Commands::Pull) => harvest::run_pull(),
    };

    std::process::exit(code);
}
