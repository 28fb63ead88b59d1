//! Zentinel SOAP client binary.
//!
//! Run with: `zentinel-soap-client --url http://host/svc --body request.xml`

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_soap_client::envelope;
use zentinel_soap_client::{
    ReqwestTransport, SoapClient, SoapClientConfig, SoapEnvelope, SoapError, SoapVersion,
    XmlElement,
};

/// Send one SOAP request and print the response envelope.
///
/// The body file holds the XML of the element(s) placed inside the SOAP Body.
/// A single root element is expected.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Endpoint URL
    #[arg(short, long)]
    url: String,

    /// SOAP action
    #[arg(short, long)]
    action: Option<String>,

    /// SOAP version (1.1 or 1.2); defaults to the configured version
    #[arg(long)]
    soap_version: Option<SoapVersion>,

    /// File containing the body element XML
    #[arg(short, long)]
    body: PathBuf,

    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let config: SoapClientConfig = if args.config.exists() {
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        serde_yaml::from_str(&content).context("Failed to parse config file")?
    } else {
        debug!("Config file {} not found, using defaults", args.config.display());
        SoapClientConfig::default()
    };

    let version = args
        .soap_version
        .unwrap_or(config.settings.default_soap_version);

    let body = tokio::fs::read(&args.body)
        .await
        .with_context(|| format!("Failed to read body file {}", args.body.display()))?;
    let body = XmlElement::parse(&body).context("Body file is not well-formed XML")?;

    let transport =
        ReqwestTransport::from_config(&config.http).context("Failed to create HTTP transport")?;
    let client = SoapClient::new(config).with_async_transport(transport);

    info!(url = %args.url, version = %version, "Sending SOAP request");

    let request = SoapEnvelope::new().with_body_element(body);
    match client
        .send_async(&args.url, args.action.as_deref(), version, request)
        .await
    {
        Ok(response) => {
            let xml = envelope::to_bytes(&response, version)
                .context("Failed to serialize response envelope")?;
            println!("{}", String::from_utf8_lossy(&xml));
            Ok(ExitCode::SUCCESS)
        }
        Err(SoapError::Fault(fault)) => {
            eprintln!(
                "SOAP fault: {} - {}",
                fault.code(),
                fault.reason().unwrap_or(fault.message())
            );
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("SOAP request failed"),
    }
}
