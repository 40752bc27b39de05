use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Query a running resilient-proxy gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate health of every service
    Health,
    /// Request totals and cache counters
    Metrics,
    /// Health of a single service
    Service {
        /// Service name as configured
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Metrics => {
            let res = client.get(format!("{}/metrics", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Service { name } => {
            let res = client.get(format!("{}/health", base)).send().await?;
            let report: Value = res.error_for_status()?.json().await?;
            match report["services"].get(&name) {
                Some(Value::Bool(true)) => println!("{}: healthy", name),
                Some(Value::Bool(false)) => println!("{}: unhealthy", name),
                _ => {
                    eprintln!("Error: unknown service {}", name);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
