use clap::{Args, Parser, Subcommand};
use miette::{bail, Context, Result};
use opensmtpd::FilterServer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod dkim;
mod headers;

use crate::config::{Cfg, CfgDKIM, CfgLog, LogFormat};
use dkim::{DkimSign, DkimVerify, MailAuthVerifier};

const DEFAULT_HOSTNAME: &str = "localhost";

/// DKIM filters for OpenSMTPD.
#[derive(Parser)]
#[command(name = "smtpd-filters", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign outgoing messages for the configured domains
    DkimSign(DkimSignArgs),
    /// Verify incoming messages and add Authentication-Results
    DkimVerify(DkimVerifyArgs),
}

#[derive(Args)]
struct DkimSignArgs {
    /// Signing keys as domain:selector:key_path, added to the configured ones
    domains: Vec<CfgDKIM>,
}

#[derive(Args)]
struct DkimVerifyArgs {
    /// Host name written into Authentication-Results
    hostname: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Cfg::load(path).wrap_err("error loading configuration")?,
        None => Cfg::default(),
    };

    // stdout belongs to the filter protocol.
    init_logging(&cfg.log);

    match cli.command {
        Command::DkimSign(args) => run_dkim_sign(&cfg, args).await,
        Command::DkimVerify(args) => run_dkim_verify(&cfg, args).await,
    }
}

fn init_logging(log: &CfgLog) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);

    match log.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn signing_domains(cfg: &Cfg, args: DkimSignArgs) -> Vec<CfgDKIM> {
    let mut domains = cfg
        .sign
        .as_ref()
        .map(|sign| sign.domains.clone())
        .unwrap_or_default();
    domains.extend(args.domains);
    domains
}

fn verify_hostname(cfg: &Cfg, args: DkimVerifyArgs) -> String {
    args.hostname
        .or_else(|| cfg.verify.as_ref().and_then(|v| v.hostname.clone()))
        .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string())
}

async fn run_dkim_sign(cfg: &Cfg, args: DkimSignArgs) -> Result<()> {
    let domains = signing_domains(cfg, args);
    if domains.is_empty() {
        bail!("no signing domains, pass domain:selector:key_path or configure [[sign.domains]]");
    }
    let signer = DkimSign::load(&domains).await?;

    let mut server = FilterServer::stdio()
        .await
        .wrap_err("handshake with smtpd")?;
    server.register_message_filter(signer).await?;
    info!(domains = domains.len(), "dkim-sign ready");

    server.serve().await?;
    Ok(())
}

async fn run_dkim_verify(cfg: &Cfg, args: DkimVerifyArgs) -> Result<()> {
    let hostname = verify_hostname(cfg, args);
    let verifier = MailAuthVerifier::new()?;

    let mut server = FilterServer::stdio()
        .await
        .wrap_err("handshake with smtpd")?;
    server
        .register_message_filter(DkimVerify::new(hostname.as_str(), verifier))
        .await?;
    info!(%hostname, "dkim-verify ready");

    server.serve().await?;
    Ok(())
}
