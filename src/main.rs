use anyhow::Context;
use clap::{Parser, Subcommand};
use hget::{list_jobs, DownloadConfig, DownloadJob, DEFAULT_MAX_CONNECTIONS, DEFAULT_RANGE_SIZE};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hget")]
#[command(about = "Resumable, parallel-range HTTP downloader", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Job directory for temp files, checkpoints and finished downloads
    /// (default: ~/.hget)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new download
    Get {
        /// URL to download
        url: String,

        /// Range size in bytes (should match the server's slice size)
        #[arg(short = 'r', long, default_value_t = DEFAULT_RANGE_SIZE)]
        range_size: u64,

        /// Number of parallel connections
        #[arg(short = 'c', long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
        connections: usize,

        /// Skip TLS certificate verification
        #[arg(long)]
        skip_tls: bool,
    },
    /// List in-progress downloads
    Tasks,
    /// Resume an interrupted download by name or URL
    Resume {
        /// Job name (file name) or original URL
        name: String,

        /// Skip TLS certificate verification
        #[arg(long)]
        skip_tls: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("hget={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    let mut config = DownloadConfig {
        show_progress: atty::is(atty::Stream::Stderr),
        ..DownloadConfig::default()
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    match args.command {
        Command::Get {
            url,
            range_size,
            connections,
            skip_tls,
        } => {
            config.range_size = range_size;
            config.max_connections = connections;
            config.skip_tls_verify = skip_tls;

            info!("🚀 hget - {}", url);
            let started = Instant::now();
            let job = DownloadJob::probe(&url, &config)
                .await
                .with_context(|| format!("failed to create download task for {}", url))?;
            let path = job
                .run()
                .await
                .with_context(|| format!("download of {} did not complete", url))?;
            report_done(&path, started);
        }
        Command::Tasks => {
            let jobs = list_jobs(&config.data_dir).await.with_context(|| {
                format!("failed to read job directory {}", config.data_dir.display())
            })?;
            println!("Currently ongoing downloads:");
            for job in jobs {
                println!(
                    "{}\t{} of {} bytes remaining\t{}",
                    job.name, job.remaining, job.length, job.url
                );
            }
        }
        Command::Resume { name, skip_tls } => {
            config.skip_tls_verify = skip_tls;

            let started = Instant::now();
            let job = DownloadJob::from_checkpoint(&name, &config)
                .await
                .with_context(|| format!("failed to load checkpoint for {}", name))?;
            let path = job
                .run()
                .await
                .with_context(|| format!("resumed download of {} did not complete", name))?;
            report_done(&path, started);
        }
    }

    Ok(())
}

fn report_done(path: &std::path::Path, started: Instant) {
    let elapsed = std::time::Duration::from_secs(started.elapsed().as_secs());
    info!(
        "✅ Saved {} in {}",
        path.display(),
        humantime::format_duration(elapsed)
    );
}
