//! Remote array inspector.
//!
//! Opens a remote source and prints groups, datasets, slices or binned
//! envelopes as JSON on stdout. Logs go to stderr.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use remote_array::{ArrayClient, ClientConfig, ClientRegistry, ReadOptions, SourceFormat};

#[derive(Parser, Debug)]
#[command(name = "array-inspect")]
#[command(about = "Inspect remote hierarchical array files")]
struct Args {
    /// URL of the file, store or manifest
    url: String,

    /// Source format (detected from the URL when omitted)
    #[arg(short, long)]
    format: Option<SourceFormat>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Bytes fetched to parse an NH5 header
    #[arg(long, env = "REMOTE_ARRAY_HEADER_WINDOW")]
    header_window: Option<u64>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REMOTE_ARRAY_REQUEST_TIMEOUT_SECS")]
    request_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a group with its attributes and children
    Group {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a dataset's shape, element type and attributes
    Dataset { path: String },
    /// Read a dataset, optionally sliced
    Read {
        path: String,

        /// Ranges for the leading dimensions, e.g. `0:100,2:4`
        #[arg(long, value_parser = parse_slice)]
        slice: Option<SliceArg>,
    },
    /// Read envelope heights from a binned array group
    Binned {
        path: String,

        #[arg(long, default_value = "0")]
        start: u64,

        /// End bin, exclusive (defaults to the number of bins)
        #[arg(long)]
        end: Option<u64>,
    },
}

/// Half-open ranges for the leading dimensions of a read.
#[derive(Debug, Clone, PartialEq)]
struct SliceArg(Vec<(u64, u64)>);

/// Parse `s:e[,s:e...]` into half-open ranges.
fn parse_slice(arg: &str) -> Result<SliceArg> {
    arg.split(',')
        .map(|part| {
            let (start, end) = part
                .split_once(':')
                .ok_or_else(|| anyhow!("expected start:end, got {:?}", part))?;
            let start: u64 = start
                .trim()
                .parse()
                .with_context(|| format!("invalid start in {:?}", part))?;
            let end: u64 = end
                .trim()
                .parse()
                .with_context(|| format!("invalid end in {:?}", part))?;
            Ok((start, end))
        })
        .collect::<Result<Vec<_>>>()
        .map(SliceArg)
}

fn client_config(args: &Args) -> ClientConfig {
    let mut config = ClientConfig::from_env();
    if let Some(window) = args.header_window {
        config.header_window_bytes = window;
    }
    if let Some(timeout) = args.request_timeout {
        config.request_timeout_secs = timeout;
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let registry = ClientRegistry::with_http(client_config(&args))?;

    // Ctrl+C abandons the read in progress
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        on_signal.cancel();
    });

    let output = match &args.command {
        Command::Group { path } => {
            let client = registry.get_client(&args.url, args.format).await?;
            let group = client
                .get_group(path)
                .ok_or_else(|| anyhow!("group {} not found", path))?;
            serde_json::to_value(group)?
        }
        Command::Dataset { path } => {
            let client = registry.get_client(&args.url, args.format).await?;
            let dataset = client
                .get_dataset(path)
                .ok_or_else(|| anyhow!("dataset {} not found", path))?;
            serde_json::to_value(dataset)?
        }
        Command::Read { path, slice } => {
            let client = registry.get_client(&args.url, args.format).await?;
            let mut options = ReadOptions::new().with_cancel(cancel.clone());
            options.slice = slice.clone().map(|s| s.0);

            let data = client
                .get_dataset_data(path, &options)
                .await?
                .ok_or_else(|| anyhow!("dataset {} not found", path))?;
            info!(path = %path, kind = data.kind(), len = data.len(), "Read dataset");
            json!({"path": path, "kind": data.kind(), "values": data.to_json()})
        }
        Command::Binned { path, start, end } => {
            let binned = registry.get_binned(&args.url, args.format, path).await?;
            let end = end.unwrap_or(binned.num_bins());
            let rows = binned.get_data(*start, end).await?;
            json!({
                "path": path,
                "num_bins": binned.num_bins(),
                "num_channels": binned.num_channels(),
                "bin_size_sec": binned.bin_size_sec(),
                "bin_size_frames": binned.bin_size_frames(),
                "start": start,
                "end": end,
                "rows": rows,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slice() {
        assert_eq!(parse_slice("0:10").unwrap(), SliceArg(vec![(0, 10)]));
        assert_eq!(
            parse_slice("2:4, 0:3").unwrap(),
            SliceArg(vec![(2, 4), (0, 3)])
        );
        assert!(parse_slice("5").is_err());
        assert!(parse_slice("a:3").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from([
            "array-inspect",
            "https://host/rec.nh5",
            "read",
            "/x",
            "--slice",
            "0:4",
        ]);
        match args.command {
            Command::Read { path, slice } => {
                assert_eq!(path, "/x");
                assert_eq!(slice, Some(SliceArg(vec![(0, 4)])));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = Args::parse_from(["array-inspect", "-f", "zarr", "https://host/a", "group"]);
        assert_eq!(args.format, Some(SourceFormat::ChunkedConsolidated));
    }
}
