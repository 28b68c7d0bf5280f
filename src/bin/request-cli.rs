use std::io::Write;
use std::path::PathBuf;

use bytes::Bytes;
use clap::{Parser, Subcommand};

use request_service::client::ServiceClient;
use request_service::request::Headers;

#[derive(Parser)]
#[command(name = "request-cli")]
#[command(about = "Talk to a running request-service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "/tmp/request-service.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL and print the response
    Fetch {
        url: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request header as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
        /// Print every event instead of the body
        #[arg(long)]
        events: bool,
    },
    /// Replace the service's trust roots
    Trust { paths: Vec<PathBuf> },
    /// Ask the service to stop
    Shutdown,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut client = ServiceClient::connect(&cli.socket).await?;

    match cli.command {
        Commands::Fetch { url, method, headers, data, events } => {
            let headers = parse_headers(&headers)?;
            let id = client
                .start_request(1, &method, &url, headers, data.map(Bytes::from))
                .await?;

            if events {
                while let Some(event) = client.next_event().await? {
                    println!("{}", serde_json::to_string(&event)?);
                    if event.request_id() == id && event.is_terminal() {
                        break;
                    }
                }
                return Ok(());
            }

            let exchange = client.collect(id).await?;
            if let Some((kind, detail)) = exchange.failure {
                eprintln!("Error: request failed ({}): {}", kind, detail);
                std::process::exit(1);
            }
            if let Some(status) = exchange.status {
                eprintln!("HTTP {}", status);
            }
            for (name, value) in exchange.headers.iter() {
                eprintln!("{}: {}", name, value);
            }
            std::io::stdout().write_all(&exchange.body)?;
        }
        Commands::Trust { paths } => {
            client.set_certificate_override(paths).await?;
            println!("Certificate override sent");
        }
        Commands::Shutdown => {
            client.shutdown().await?;
            println!("Shutdown requested");
        }
    }

    Ok(())
}

fn parse_headers(raw: &[String]) -> Result<Headers, Box<dyn std::error::Error>> {
    let mut headers = Headers::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("Header '{}' is not in 'Name: value' form", line))?;
        headers.append(name.trim(), value.trim());
    }
    Ok(headers)
}
