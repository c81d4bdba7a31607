use clap::Parser;
use rpc_router::config::{parse_endpoint_list, RouterConfig};
use rpc_router::{RequestExecutor, RequestOptions};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// rpc-router - send JSON-RPC calls through the health-aware endpoint router
#[derive(Parser, Debug)]
#[command(name = "rpc-router", version, about)]
struct Args {
    /// TOML configuration file (falls back to RPC_ENDPOINTS)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Endpoint URL, repeatable; replaces the configured list
    #[arg(short, long = "endpoint")]
    endpoints: Vec<String>,

    /// JSON-RPC method
    #[arg(short, long, default_value = "eth_blockNumber")]
    method: String,

    /// Parameters as a JSON array
    #[arg(short, long, default_value = "[]")]
    params: String,

    /// Race this many endpoints instead of retrying sequentially
    #[arg(long)]
    parallel: Option<usize>,

    /// Cache the result
    #[arg(long)]
    cache: bool,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Send the call this many times
    #[arg(short, long, default_value_t = 1)]
    repeat: u32,
}

fn load_config(args: &Args) -> Result<RouterConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => RouterConfig::from_file(path)?,
        None if !args.endpoints.is_empty() => RouterConfig::new(Vec::new()),
        None => RouterConfig::from_env()?,
    };
    if !args.endpoints.is_empty() {
        config.endpoints = args
            .endpoints
            .iter()
            .flat_map(|e| parse_endpoint_list(e))
            .collect();
    }
    config.validate()?;
    Ok(config)
}

fn request_options(args: &Args, defaults: &RequestOptions) -> RequestOptions {
    let mut options = defaults.clone();
    if let Some(count) = args.parallel {
        options = options.parallel(count);
    }
    if args.cache {
        options = options.with_cache();
    }
    if let Some(ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    options
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let params: Vec<Value> = serde_json::from_str(&args.params)
        .map_err(|e| format!("--params must be a JSON array: {}", e))?;

    let executor = RequestExecutor::from_config(&config)?;
    let options = request_options(&args, executor.default_options());

    info!(
        method = %args.method,
        endpoints = config.endpoints.len(),
        parallel = options.use_parallel,
        "sending request"
    );

    for round in 1..=args.repeat.max(1) {
        match executor.execute(&args.method, params.clone(), &options).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => warn!(round, error = %e, "request failed"),
        }
    }

    let health = executor.endpoint_health();
    println!("{}", serde_json::to_string_pretty(&health)?);

    Ok(())
}
