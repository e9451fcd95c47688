//! Mesh Auth - command line entry point.
//!
//! ```text
//! mesh-auth issue             print a fresh server token
//! mesh-auth verify <token>    check a server token
//! mesh-auth whoami <token>    check a user identity token and print the identity
//! ```
//!
//! Settings come from the environment (see `Config::from_env`), or from the
//! file named by `MESH_CONFIG`.

use std::process::ExitCode;

use anyhow::{Context, bail};
use mesh_auth::server::ensure_secure;
use mesh_auth::{
    Config, HostDiscovery, IdentityTokenVerifier, IdentityVerifierOptions, ServerTokenManager,
    TokenManager,
};
use rust_common::{TracingConfig, init_tracing};
use tracing::{error, info};

const USAGE: &str = "usage: mesh-auth <issue | verify <token> | whoami <token>>";

enum Command {
    Issue,
    Verify(String),
    WhoAmI(String),
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let command = match (args.next().as_deref(), args.next()) {
            (Some("issue"), None) => Self::Issue,
            (Some("verify"), Some(token)) => Self::Verify(token),
            (Some("whoami"), Some(token)) => Self::WhoAmI(token),
            _ => bail!(USAGE),
        };
        if args.next().is_some() {
            bail!(USAGE);
        }
        Ok(command)
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = match std::env::var("MESH_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => Config::from_env().context("loading configuration from environment")?,
    };
    Ok(config)
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Issue => {
            let manager = ServerTokenManager::from_config(config)?;
            ensure_secure(&manager, config.environment)?;
            let token = manager.get_token().await?;
            println!("{}", token.token);
        }
        Command::Verify(token) => {
            let manager = ServerTokenManager::from_config(config)?;
            manager.authenticate(&token).await?;
            info!("Server token accepted");
            println!("ok");
        }
        Command::WhoAmI(token) => {
            let discovery = HostDiscovery::from_config(config);
            let options = IdentityVerifierOptions::from_config(config)?;
            let verifier = IdentityTokenVerifier::create(&discovery, options).await?;
            let user = verifier.authenticate(Some(&token)).await?;
            println!("{}", serde_json::to_string_pretty(&user.identity)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let command = match Command::parse(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(
        &TracingConfig::default()
            .with_log_level(config.log_level.clone())
            .with_json_output(config.log_json),
    );
    info!(environment = ?config.environment, "Starting mesh-auth");

    match run(command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
