//! authbot - conversational magic-code authentication agent
//!
//! Walks a chat user through an out-of-band browser sign-in, binds the
//! resulting token pair to the conversation with a one-time code, then
//! fetches mail with transparent token refresh.

mod api;
mod auth;
mod bot;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::MailClient;
use crate::auth::{
    CallbackBinder, MemoryStateStore, RefreshProtocol, SignInCorrelation, SignInLinkIssuer,
    SignInProfile,
};
use crate::bot::{AuthStateMachine, ConversationRouter};
use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "authbot")]
#[command(about = "Conversational magic-code authentication agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a console conversation against the configured provider
    Run {
        /// Conversation id for this console session
        #[arg(long, default_value = "console")]
        conversation: String,
    },

    /// Print the sign-in link a conversation would be sent
    Link {
        /// Conversation id to correlate the link to
        #[arg(long, default_value = "console")]
        conversation: String,
    },

    /// Show the effective configuration (client secret redacted)
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Run { conversation } => {
            run_console(conversation).await?;
        }
        Commands::Link { conversation } => {
            let config = AppConfig::load()?;
            let issuer = SignInLinkIssuer::new(&config.provider)?;
            let (link, _) = issuer.issue(&conversation);
            println!("{}", link);
        }
        Commands::Config { init } => {
            let config = AppConfig::load()?;
            if init {
                config.save()?;
                println!("Config written.");
            }
            show_config(&config)?;
        }
    }

    Ok(())
}

/// Console transport: each stdin line is one inbound turn. The out-of-band
/// callback is stood in for by pasting the payload JSON after signing in.
async fn run_console(conversation: String) -> Result<()> {
    let config = AppConfig::load()?;

    let issuer = SignInLinkIssuer::new(&config.provider)?;
    let machine = AuthStateMachine::new(issuer, config.messages.clone(), config.max_code_attempts);
    let refresh = RefreshProtocol::new(&config.provider);
    let mail = match &config.mail_endpoint {
        Some(endpoint) => MailClient::with_endpoint(endpoint.clone()),
        None => MailClient::new(),
    };

    let (router, mut replies) =
        ConversationRouter::new(machine, refresh, mail, MemoryStateStore::default());

    println!(
        "Console conversation '{}'. Type a message to start; after signing in, \
         paste the callback payload JSON (or use '/signin <name>' to simulate \
         the provider redirect). Ctrl-D to exit.",
        conversation
    );

    tokio::spawn(async move {
        while let Some(reply) = replies.recv().await {
            println!("bot> {}", reply.text);
        }
    });

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        // Stand-in for the provider redirect: mint a code for a demo token
        // pair and inject the payload exactly as the callback host would.
        if let Some(name) = text.strip_prefix("/signin ") {
            let binder = CallbackBinder::new(router.clone());
            let correlation = SignInCorrelation::for_conversation(&conversation);
            let code = binder.bind(
                &correlation,
                SignInProfile {
                    user_id: "demo-user".into(),
                    name: name.to_string(),
                    email: format!("{}@example.com", name.to_lowercase()),
                },
                "demo-access-token".into(),
                "demo-refresh-token".into(),
            )?;
            println!(
                "provider> Welcome {}! Please copy this number and paste it back \
                 to your chat so your authentication can complete: {}",
                name, code
            );
            continue;
        }

        router.submit(&conversation, text.to_string());
    }

    Ok(())
}

fn show_config(config: &AppConfig) -> Result<()> {
    let mut redacted = config.clone();
    if !redacted.provider.client_secret.is_empty() {
        redacted.provider.client_secret = "<redacted>".into();
    }
    print!("{}", toml::to_string_pretty(&redacted)?);
    Ok(())
}
