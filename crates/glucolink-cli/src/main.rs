//! # glucolink CLI
//!
//! One-shot utilities for checking the upstream glucose feed without
//! running the daemon.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use glucolink_core::mmol_to_mgdl;
use glucolink_tidepool::{Credential, TidepoolClient, TidepoolConfig, UpstreamSession};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "bg" => {
            fetch_and_print().await?;
        }
        "convert" => {
            if args.len() < 3 {
                eprintln!("Usage: glucolink convert <mmol>");
                std::process::exit(1);
            }
            let mmol: f64 = args[2].parse().context("Invalid mmol/L value")?;
            println!("{:.1} mg/dL", mmol_to_mgdl(mmol));
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Authenticate, fetch the latest reading once and print it.
async fn fetch_and_print() -> Result<()> {
    let username = env::var("GLUCOLINK_USERNAME").context("GLUCOLINK_USERNAME is not set")?;
    let password = env::var("GLUCOLINK_PASSWORD").context("GLUCOLINK_PASSWORD is not set")?;
    let base_url = env::var("GLUCOLINK_UPSTREAM_URL")
        .unwrap_or_else(|_| "https://api.tidepool.org".to_string());

    let client = TidepoolClient::new(TidepoolConfig {
        base_url,
        timeout: Duration::from_secs(30),
    })?;

    let session = UpstreamSession::connect(client, Credential::new(username, password))
        .await
        .context("Couldn't connect to the upstream API")?;

    let Some(reading) = session.latest_bg().await else {
        anyhow::bail!("No recent reading available");
    };

    let local = reading.timestamp.with_timezone(&Local);
    println!(
        "{} mg/dL at {}",
        reading.rounded_mgdl(),
        local.format("%a %d %b %Y, %I:%M%p")
    );

    Ok(())
}

fn print_help() {
    println!(
        r#"glucolink CLI

USAGE:
    glucolink <COMMAND> [OPTIONS]

COMMANDS:
    bg                Fetch and print the latest glucose reading
    convert <mmol>    Convert a mmol/L value to mg/dL
    help              Show this help message

ENVIRONMENT:
    GLUCOLINK_USERNAME, GLUCOLINK_PASSWORD    Upstream account (for bg)
    GLUCOLINK_UPSTREAM_URL                    Upstream API base URL

EXAMPLES:
    glucolink bg
    glucolink convert 5.8
"#
    );
}
