use std::path::PathBuf;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use clap::{Parser, Subcommand};
use fcgi_gateway::config::{load_config, GatewayConfig, ObservabilityConfig};
use fcgi_gateway::http::{ConnectionMeta, RequestTranslator};
use fcgi_gateway::observability::init_logging;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Inspect how the FastCGI gateway would handle requests", long_about = None)]
struct Cli {
    /// Gateway configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Check,
    /// Show what the rewrite rules make of a URI
    Rewrite {
        uri: String,
    },
    /// Print the CGI environment computed for a request
    Env {
        /// Request target, e.g. "/index.php?page=1"
        target: String,

        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request header as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    let _ = init_logging(&ObservabilityConfig {
        log_level: "warn".to_string(),
        ..config.observability.clone()
    });

    let translator = RequestTranslator::from_config(&config)?;

    match cli.command {
        Commands::Check => {
            println!("Configuration OK");
            println!("  backend:       {}", config.backend.address);
            println!("  document_root: {}", config.document_root);
            println!("  script:        {}", config.script.as_deref().unwrap_or("(from URI)"));
            println!("  rewrite rules: {}", config.rewrite.len());
            println!("  params:        {}", config.params.len());
        }
        Commands::Rewrite { uri } => {
            let context = translator.context(&uri)?;
            println!("REQUEST_URI:  {}", context.request_uri());
            println!("DOCUMENT_URI: {}", context.document_uri());
            println!("QUERY_STRING: {}", context.query.as_deref().unwrap_or(""));
            println!("SCRIPT:       {}", context.script().unwrap_or(""));
        }
        Commands::Env {
            target,
            method,
            headers,
        } => {
            let method = Method::from_bytes(method.as_bytes())?;
            let headers = parse_headers(&headers)?;
            let conn = ConnectionMeta {
                server_name: config.server_name.clone(),
                scheme: config.scheme.clone(),
                ..ConnectionMeta::default()
            };

            let environment = translator.translate(&method, &target, &headers, &conn)?;
            println!("{}", serde_json::to_string_pretty(&environment)?);
        }
    }

    Ok(())
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("header must look like \"Name: value\", got {line:?}"))?;
        headers.append(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
    Ok(headers)
}
