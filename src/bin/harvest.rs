//! Command-line client for a running harvester server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use attachment_harvester::client::ApiClient;
use attachment_harvester::queue::{ItemFailure, QueueDriver, QueueSnapshot};

/// List posts, scan them for attachments and download the results through a
/// harvester server.
#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(author, version, about)]
struct Args {
    /// Base URL of the harvester server
    #[arg(
        short,
        long,
        env = "HARVEST_SERVER",
        default_value = "http://127.0.0.1:3000"
    )]
    server: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print posts as JSON
    Posts {
        /// Offset of the first post
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Follow pages until the listing is exhausted
        #[arg(long)]
        all: bool,

        /// Posts per upstream page, used to advance the offset with --all
        #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u64).range(1..))]
        page_size: u64,
    },
    /// Print the matching files of the given posts as JSON
    Scan {
        #[arg(required = true)]
        post_ids: Vec<String>,
    },
    /// Scan the given posts and download every matching file, one at a time
    Download {
        #[arg(required = true)]
        post_ids: Vec<String>,

        /// Pause after each file in milliseconds
        #[arg(long, default_value_t = 5000)]
        delay_ms: u64,
    },
}

#[derive(Debug, Serialize)]
struct DownloadReport {
    scan_failures: Vec<ItemFailure>,
    run: QueueSnapshot,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn,attachment_harvester=info",
        1 => "info,attachment_harvester=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Stdout carries the JSON results
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(args: Args) -> Result<()> {
    let client = ApiClient::new(&args.server).context("Invalid server URL")?;

    match args.command {
        Command::Posts {
            offset,
            all,
            page_size,
        } => {
            let posts = if all {
                client.all_posts(page_size).await
            } else {
                client.posts(offset).await
            };
            let posts = posts.context("Failed to list posts")?;
            info!(count = posts.len(), "Listed posts");
            print_json(&posts)
        }
        Command::Scan { post_ids } => {
            let report = client.scan(&post_ids).await;
            for failure in &report.failures {
                warn!(post_id = %failure.name, error = %failure.error, "Post skipped");
            }
            print_json(&report.files)
        }
        Command::Download { post_ids, delay_ms } => {
            let report = client.scan(&post_ids).await;
            info!(files = report.files.len(), "Scan complete, starting downloads");

            let driver = QueueDriver::new(Arc::new(client), Duration::from_millis(delay_ms));
            let run = driver
                .enqueue_all(report.files)
                .await?
                .await
                .context("Download run aborted")?;

            print_json(&DownloadReport {
                scan_failures: report.failures,
                run,
            })
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{json}");
    Ok(())
}
