use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use tracing_subscriber::EnvFilter;
use url::Url;

use barrage::config::DEFAULT_CONNECTIONS;
use barrage::{Barrage, ClientKind, Config, ProgressSink, TerminationSpec, report};

#[derive(Parser, Debug)]
#[command(name = "barrage", version, about = "HTTP(S) load generator")]
struct Cli {
    /// Target URL
    #[arg(value_name = "URL")]
    url: Url,

    /// Number of concurrent connections
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONNECTIONS)]
    connections: u64,

    /// Number of requests to perform (mutually exclusive with --duration)
    #[arg(short = 'n', long, value_name = "COUNT")]
    requests: Option<u64>,

    /// Duration of the test in seconds (mutually exclusive with --requests)
    #[arg(short = 'd', long, value_name = "SECONDS")]
    duration: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(short = 't', long, value_name = "SECONDS", default_value_t = 2.0)]
    timeout: f64,

    /// Cap on issued requests per second
    #[arg(long, value_name = "RPS")]
    rate: Option<u64>,

    /// HTTP method
    #[arg(short = 'm', long, default_value = "GET")]
    method: String,

    /// Request header as "Name: value"; repeatable
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Request body, either literal or @path to read it from a file
    #[arg(short = 'b', long, value_name = "BODY")]
    body: Option<String>,

    /// Re-read the body source for every request
    #[arg(long)]
    stream: bool,

    /// HTTP client variant
    #[arg(long, value_enum, default_value = "fasthttp1")]
    client: ClientKind,

    /// Path to the client TLS certificate (PEM)
    #[arg(long, value_name = "PATH")]
    cert: Option<PathBuf>,

    /// Path to the client TLS key (PEM)
    #[arg(long, value_name = "PATH")]
    key: Option<PathBuf>,

    /// Skip TLS certificate verification
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Print latency percentiles
    #[arg(short = 'l', long)]
    latencies: bool,

    /// Print the report as JSON instead of the human-readable format
    #[arg(long)]
    json: bool,
}

fn parse_header(raw: &str) -> anyhow::Result<(HeaderName, HeaderValue)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header {raw:?} is not in \"Name: value\" form"))?;
    let name = name
        .trim()
        .parse::<HeaderName>()
        .with_context(|| format!("invalid header name in {raw:?}"))?;
    let value = value
        .trim()
        .parse::<HeaderValue>()
        .with_context(|| format!("invalid header value in {raw:?}"))?;
    Ok((name, value))
}

fn build_config(cli: Cli) -> anyhow::Result<Config> {
    let termination = match (cli.requests, cli.duration) {
        (Some(count), None) => TerminationSpec::Counted(count),
        (None, Some(seconds)) => {
            if seconds <= 0.0 {
                bail!("duration must be positive");
            }
            TerminationSpec::Timed(Duration::from_secs_f64(seconds))
        }
        (Some(_), Some(_)) => bail!("--requests and --duration are mutually exclusive"),
        (None, None) => bail!("either --requests or --duration is required"),
    };
    if cli.timeout <= 0.0 {
        bail!("timeout must be positive");
    }

    let method = Method::from_bytes(cli.method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid method {:?}", cli.method))?;
    let headers = cli
        .headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let (body, body_file) = match cli.body {
        Some(body) => match body.strip_prefix('@') {
            Some(path) => (None, Some(PathBuf::from(path))),
            None => (Some(body), None),
        },
        None => (None, None),
    };

    Ok(Config::builder()
        .url(cli.url)
        .method(method)
        .body(body)
        .body_file(body_file)
        .stream_body(cli.stream)
        .headers(headers)
        .connections(cli.connections)
        .termination(termination)
        .rate(cli.rate)
        .timeout(Duration::from_secs_f64(cli.timeout))
        .client(cli.client)
        .insecure(cli.insecure)
        .cert_path(cli.cert)
        .key_path(cli.key)
        .print_latencies(cli.latencies)
        .build())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    let config = build_config(cli)?;

    let mut engine = Barrage::new(config)?.with_progress(if json {
        ProgressSink::hidden()
    } else {
        ProgressSink::bar()
    });

    let barrier = engine.barrier();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, winding down");
            barrier.cancel();
        }
    });

    if !json {
        let mut out = std::io::stdout().lock();
        report::print_intro(&mut out, engine.config())?;
    }

    engine.bombard().await;

    let summary = engine.summary();
    let mut out = std::io::stdout().lock();
    if json {
        report::print_json(&mut out, &summary)?;
    } else {
        report::print(&mut out, &summary, engine.config().print_latencies)?;
    }
    Ok(())
}
