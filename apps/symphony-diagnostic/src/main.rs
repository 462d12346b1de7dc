use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use greentic_messaging_providers_symphony::{
    Credential, SymphonyClient, SymphonyConfig, UserQuery,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Checks a Symphony bot's certificate, tokens and datafeed")]
struct Cli {
    /// Pod host, e.g. foundation.symphony.com
    #[arg(long)]
    host: String,
    /// Client certificate (PEM)
    #[arg(long)]
    public_key: PathBuf,
    /// Private key (PEM, optionally encrypted PKCS#8)
    #[arg(long)]
    private_key: PathBuf,
    #[arg(long)]
    passphrase: String,
    /// Key manager host; defaults to --host
    #[arg(long)]
    km_host: Option<String>,
    /// Agent host; defaults to --host
    #[arg(long)]
    agent_host: Option<String>,
    /// Session auth host; defaults to --host
    #[arg(long)]
    session_host: Option<String>,
}

impl Cli {
    fn config(&self) -> SymphonyConfig {
        let mut config = SymphonyConfig::new(
            self.host.clone(),
            Credential {
                public_key: self.public_key.clone(),
                private_key: self.private_key.clone(),
                passphrase: self.passphrase.clone(),
            },
        );
        if let Some(host) = &self.km_host {
            config = config.with_key_manager_host(host.clone());
        }
        if let Some(host) = &self.agent_host {
            config = config.with_agent_host(host.clone());
        }
        if let Some(host) = &self.session_host {
            config = config.with_session_auth_host(host.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = gsm_telemetry::install("gsm-symphony-diagnostic") {
        eprintln!("failed to initialise logging: {err:#}");
    }

    match run(cli).await {
        Ok(()) => {
            info!("all diagnostics passed");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "diagnostics failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!(host = %cli.host, "running diagnostics");
    let config = cli.config();
    let client = SymphonyClient::connect(&config).context("unable to load bot certificate")?;

    let session = client
        .tokens()
        .session_token()
        .await
        .context("failed to fetch session token")?;
    info!(name = %session.name, acquired_at = %session.acquired_at, "session token acquired");
    let key_manager = client
        .tokens()
        .key_manager_token()
        .await
        .context("failed to fetch key manager token")?;
    info!(name = %key_manager.name, acquired_at = %key_manager.acquired_at, "key manager token acquired");

    let me = client.who_am_i().await.context("failed to fetch user id")?;
    info!(user_id = me.user_id, "resolved bot identity");
    let user = client
        .get_user(&UserQuery::UserId(me.user_id))
        .await
        .context("failed to fetch bot profile")?;
    info!(
        display_name = user.display_name.as_deref().unwrap_or("-"),
        email = user.email_address.as_deref().unwrap_or("-"),
        "bot profile"
    );

    let datafeed = client
        .create_datafeed()
        .await
        .context("failed to create datafeed")?;
    info!(datafeed_id = %datafeed.id, "created datafeed, send the bot a message");
    let messages = client
        .read_datafeed(&datafeed.id)
        .await
        .context("failed to read datafeed")?;
    for message in messages.iter().filter(|message| message.is_chat_message()) {
        info!(stream_id = %message.stream_id, message = %message.message, "received message");
    }
    info!(count = messages.len(), "datafeed read complete");
    Ok(())
}
