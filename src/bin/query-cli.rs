use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "query-cli")]
#[command(about = "Management CLI for the prism-query admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon and engine status
    Status,
    /// Summarize cache contents by freshness
    Cache,
    /// Show the loaded engine
    Engine,
    /// Inspect one query, e.g. `todos/1`
    Query { key: String },
    /// Invalidate every query under a prefix, or all queries
    Invalidate { key: Option<String> },
    /// Evict expired entries now
    Gc,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Cache => client.get(format!("{base}/admin/cache")),
        Commands::Engine => client.get(format!("{base}/admin/engine")),
        Commands::Query { key } => {
            client.get(format!("{base}/admin/queries/{}", key.trim_matches('/')))
        }
        Commands::Invalidate { key: Some(key) } => {
            client.post(format!("{base}/admin/invalidate/{}", key.trim_matches('/')))
        }
        Commands::Invalidate { key: None } => client.post(format!("{base}/admin/invalidate")),
        Commands::Gc => client.post(format!("{base}/admin/gc")),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
