//! PanTransfer CLI - cloud drive transfers from the command line
//!
//! Chunked uploads with server-side block deduplication and downloads that
//! resume from a temporary file after an interruption.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pantransfer_core::SettingsStore;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// PanTransfer - chunked and resumable cloud drive transfers
#[derive(Parser)]
#[command(name = "pantransfer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding settings.json
    #[arg(long, env = "PANTRANSFER_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Access token, overrides the stored one for this run
    #[arg(long, env = "PANTRANSFER_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Upload {
        /// Local file to upload
        file: PathBuf,

        /// Absolute remote directory
        remote_dir: String,

        /// Remote file name (defaults to the local name)
        #[arg(short, long)]
        name: Option<String>,

        /// Replace an existing remote file
        #[arg(long)]
        overwrite: bool,

        /// Account tier code (0 standard, 1 plus, 2 premium)
        #[arg(long)]
        tier: Option<u8>,
    },

    /// Download a remote file
    Download {
        #[command(flatten)]
        source: SourceArgs,

        /// Local directory (defaults to the configured download directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Local file name (defaults to the remote name)
        #[arg(short, long)]
        name: Option<String>,

        /// Replace an existing local file
        #[arg(long)]
        overwrite: bool,

        /// How interruptions are handled
        #[arg(short, long, default_value = "retry")]
        mode: ModeArg,

        /// Attempts for retry mode (defaults to the configured value)
        #[arg(long)]
        retry: Option<u32>,

        /// Append failures to <file>_pttmp_ErrorLog.txt
        #[arg(long)]
        error_log: bool,
    },

    /// Print the block manifest of a local file without uploading it
    Manifest {
        /// Local file
        file: PathBuf,

        /// Account tier code (0 standard, 1 plus, 2 premium)
        #[arg(long)]
        tier: Option<u8>,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Exactly one way to address the remote file
#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Direct download link
    #[arg(long)]
    link: Option<String>,

    /// Remote file id
    #[arg(long)]
    fsid: Option<u64>,

    /// Absolute remote path
    #[arg(long)]
    path: Option<String>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ModeArg {
    /// One request, partial data discarded on failure
    Simple,
    /// One range request, partial data kept for the next run
    Breakpoint,
    /// Range requests repeated until the file is complete
    Retry,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let store = SettingsStore::new(cli.config_dir.unwrap_or_else(SettingsStore::default_dir));
    let mut settings = store.load().await?;
    if let Some(token) = cli.access_token {
        settings.access_token = Some(token);
    }

    match cli.command {
        Commands::Upload {
            file,
            remote_dir,
            name,
            overwrite,
            tier,
        } => {
            commands::upload(settings, file, remote_dir, name, overwrite, tier, cli.output).await?
        }

        Commands::Download {
            source,
            dir,
            name,
            overwrite,
            mode,
            retry,
            error_log,
        } => {
            let options = commands::DownloadOptions {
                source: source.into_source(),
                dir,
                name,
                overwrite,
                mode,
                retry,
                error_log,
            };
            commands::download(settings, options, cli.output).await?
        }

        Commands::Manifest { file, tier } => {
            commands::manifest(&settings, &file, tier, cli.output).await?
        }

        Commands::Config { action } => {
            commands::config_action(&store, settings, action, cli.output).await?
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "pantransfer",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

impl SourceArgs {
    fn into_source(self) -> pantransfer_types::DownloadSource {
        use pantransfer_types::DownloadSource;

        match (self.link, self.fsid, self.path) {
            (Some(link), _, _) => DownloadSource::Link(link),
            (_, Some(fs_id), _) => DownloadSource::FsId(fs_id),
            (_, _, Some(path)) => DownloadSource::Path(path),
            // clap's group guarantees one of the three
            (None, None, None) => DownloadSource::Path(String::new()),
        }
    }
}
