//!
//! mental server binary
//! --------------------
//! Command-line entry point for the mental HTTP server. Port comes from CLI flags,
//! then environment variables, then defaults; auth settings come from
//! `AuthConfig::load` (`MENTAL_CONFIG` file plus `MENTAL_*` overrides).

use anyhow::{Context, Result};
use std::env;
use tracing_subscriber::EnvFilter;

use mental::config::AuthConfig;

fn parse_port_env(name: &str) -> Option<u16> {
    match env::var(name) {
        Ok(val) => val.parse::<u16>().ok(),
        Err(_) => None,
    }
}

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag
            && i + 1 < args.len() {
                return args[i + 1].parse::<u16>().ok();
            }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("mental Server\n\nUSAGE:\n  mental_server [--http-port N]\n\nOPTIONS:\n  --http-port N       HTTP API port (env: MENTAL_HTTP_PORT, default 8080)\n\nENVIRONMENT:\n  MENTAL_CONFIG                 JSON file with auth settings\n  MENTAL_ACCESS_SECRET          access token signing secret (required)\n  MENTAL_REFRESH_SECRET         refresh token signing secret (required, distinct)\n  MENTAL_ACCESS_TTL_MS / MENTAL_REFRESH_TTL_MS\n  MENTAL_ROLE_CACHE_TTL_SECS / MENTAL_OPERATION_CACHE_TTL_SECS\n");
        return Ok(());
    }

    let default_http: u16 = 8080;
    let env_http = parse_port_env("MENTAL_HTTP_PORT");
    // CLI arguments override environment
    let arg_http = parse_port_arg(&args, "--http-port");
    let http_port = arg_http.or(env_http).unwrap_or(default_http);

    let cfg = AuthConfig::load().context("loading auth configuration")?;
    tracing::info!(
        target: "startup",
        "mental starting: http_port={}, access_ttl_ms={}, refresh_ttl_ms={}",
        http_port, cfg.access_ttl_ms, cfg.refresh_ttl_ms
    );
    mental::server::run_with_port(http_port, cfg).await
}
