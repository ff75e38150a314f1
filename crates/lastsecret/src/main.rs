use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lastsecret_server::handlers::{CreateResponse, RevealResponse};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "lastsecret", about = "LastSecret: one-time, self-destructing secrets", version)]
struct Cli {
    /// LastSecret server URL (default: http://localhost:8080 or $LASTSECRET_SERVER)
    #[arg(long, env = "LASTSECRET_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the LastSecret HTTP server
    Serve {
        /// Port to listen on (default: $LASTSECRET_PORT or 8080)
        #[arg(long, env = "LASTSECRET_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $LASTSECRET_HOST or 0.0.0.0)
        #[arg(long, env = "LASTSECRET_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Directory for lastsecret.db (default: $LASTSECRET_DATA_DIR or platform dir)
        #[arg(long, env = "LASTSECRET_DATA_DIR")]
        data_dir: Option<PathBuf>,
        /// Keep secrets in memory only; nothing survives a restart
        #[arg(long)]
        memory: bool,
    },
    /// Store a secret and print its one-time URL
    Create {
        /// Secret text; read from stdin when omitted or `-`
        text: Option<String>,
        /// Lifetime e.g. 10m, 1h, 7d (default: 1h)
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Reveal (and destroy) a secret by id or share URL
    Reveal {
        /// Secret id or a URL ending in /s/<id>
        target: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LASTSECRET_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            data_dir,
            memory,
        } => cmd_serve(host, port, data_dir, memory).await,

        Commands::Create { text, ttl } => {
            cmd_create(&cli.server, text.as_deref(), ttl.as_deref()).await
        }

        Commands::Reveal { target } => cmd_reveal(&cli.server, &target).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, data_dir: Option<PathBuf>, memory: bool) -> Result<()> {
    let mut cfg = lastsecret_server::ServerConfig {
        host,
        port,
        data_dir,
        ..Default::default()
    };
    if memory {
        cfg.backend = lastsecret_server::StoreBackend::Memory;
    }

    lastsecret_server::run(cfg).await
}

async fn cmd_create(server: &str, text: Option<&str>, ttl: Option<&str>) -> Result<()> {
    let ttl_seconds = ttl.map(parse_duration).transpose()?;

    let secret = match text {
        Some(t) if t != "-" => t.to_owned(),
        _ => read_stdin()?,
    };

    let body = serde_json::json!({
        "secret": secret,
        "ttl_seconds": ttl_seconds,
    });

    let resp = Client::new()
        .post(format!("{}/api/secrets", base(server)))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        return Err(server_error(resp).await);
    }

    let created: CreateResponse = resp.json().await.context("parse response")?;
    println!("{}", absolute_url(server, &created.url));
    Ok(())
}

async fn cmd_reveal(server: &str, target: &str) -> Result<()> {
    let id = extract_id(target);
    let resp = Client::new()
        .post(format!("{}/api/secrets/{}/reveal", base(server), id))
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        return Err(server_error(resp).await);
    }

    let revealed: RevealResponse = resp.json().await.context("parse response")?;
    println!("{}", revealed.secret);
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn base(server: &str) -> &str {
    server.trim_end_matches('/')
}

async fn server_error(resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    anyhow::anyhow!(
        "server returned {status}: {}",
        json["error"].as_str().unwrap_or("unknown error")
    )
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read secret from stdin")?;
    Ok(strip_trailing_newline(buf))
}

fn strip_trailing_newline(mut s: String) -> String {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
    s
}

/// Parse human duration strings like "1h", "30m", "7d" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}

/// Accept a bare id or any URL whose path ends in `/s/<id>`.
fn extract_id(target: &str) -> &str {
    let trimmed = target.trim().trim_end_matches('/');
    match trimmed.rsplit_once("/s/") {
        Some((_, id)) => id,
        None => trimmed.rsplit('/').next().unwrap_or(trimmed),
    }
}

fn absolute_url(server: &str, url: &str) -> String {
    if url.starts_with('/') {
        format!("{}{url}", base(server))
    } else {
        url.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_id_from_targets() {
        assert_eq!(extract_id("abc123"), "abc123");
        assert_eq!(extract_id("/s/abc123"), "abc123");
        assert_eq!(extract_id("https://x.example/s/abc123/"), "abc123");
        assert_eq!(extract_id("  http://localhost:8080/s/abc123 "), "abc123");
    }

    #[test]
    fn absolute_url_prefixes_relative_paths() {
        assert_eq!(
            absolute_url("http://localhost:8080/", "/s/abc"),
            "http://localhost:8080/s/abc"
        );
        assert_eq!(
            absolute_url("http://localhost:8080", "https://public/s/abc"),
            "https://public/s/abc"
        );
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("1h").unwrap(), 3600);
        assert_eq!(parse_duration("7d").unwrap(), 604_800);
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn stdin_newline_is_stripped_once() {
        assert_eq!(strip_trailing_newline("pw\n".into()), "pw");
        assert_eq!(strip_trailing_newline("pw\r\n".into()), "pw");
        assert_eq!(strip_trailing_newline("pw\n\n".into()), "pw\n");
        assert_eq!(strip_trailing_newline("pw".into()), "pw");
    }
}
