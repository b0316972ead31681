//! # parley
//!
//! Command-line chat client: live one-to-one chat over the broker, plus
//! history and unread queries against the REST store.

#![deny(unsafe_code)]

mod render;
mod wiring;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_core::logging::init_subscriber;
use parley_core::{ConsumerId, Message, MessageDraft, UserId};
use parley_gateway::{Acceptance, Conversation, MessageGateway, SendError};
use parley_settings::ParleySettings;
use parley_store::ConversationStore;
use parley_transport::Credentials;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Parley chat client.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Parley chat client")]
struct Cli {
    /// Settings file (defaults to `~/.parley/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Broker WebSocket URL (overrides settings).
    #[arg(long)]
    broker_url: Option<String>,

    /// REST store base URL (overrides settings).
    #[arg(long)]
    store_url: Option<String>,

    /// Bearer token for the broker and the store.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat live with one peer; each stdin line is sent.
    Chat {
        /// Your user id.
        #[arg(long)]
        user: String,
        /// The other participant.
        #[arg(long)]
        peer: String,
    },
    /// Print the stored conversation between two users.
    History {
        /// Your user id.
        #[arg(long)]
        user: String,
        /// The other participant.
        #[arg(long)]
        peer: String,
    },
    /// Print unread messages addressed to a user.
    Unread {
        /// The user id.
        #[arg(long)]
        user: String,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<ParleySettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(parley_settings::settings_path);
        let mut settings = parley_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(url) = &self.broker_url {
            settings.broker.url.clone_from(url);
        }
        if let Some(url) = &self.store_url {
            settings.store.base_url.clone_from(url);
        }
        Ok(settings)
    }

    fn credentials(&self) -> Credentials {
        self.token
            .as_deref()
            .map_or_else(Credentials::anonymous, Credentials::bearer)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    init_subscriber(&settings.logging.level);

    match &args.command {
        Command::Chat { user, peer } => {
            chat(&args, &settings, UserId::from(user.as_str()), UserId::from(peer.as_str())).await
        }
        Command::History { user, peer } => {
            let store = wiring::store(&settings, args.token.as_deref())?;
            let me = UserId::from(user.as_str());
            let history = store
                .history(&me, &UserId::from(peer.as_str()))
                .await
                .context("Failed to fetch history")?;
            for message in &history {
                println!("{}", render::line(message, &me));
            }
            Ok(())
        }
        Command::Unread { user } => {
            let store = wiring::store(&settings, args.token.as_deref())?;
            let me = UserId::from(user.as_str());
            let unread = store.unread(&me).await.context("Failed to fetch unread messages")?;
            for message in &unread {
                println!("{}", render::line(message, &me));
            }
            Ok(())
        }
    }
}

async fn chat(args: &Cli, settings: &ParleySettings, me: UserId, peer: UserId) -> Result<()> {
    let gateway = wiring::gateway(settings);
    let store = wiring::store(settings, args.token.as_deref())?;

    let (tx, mut inbound) = mpsc::unbounded_channel::<Message>();
    let _ = gateway.register_handler(me.clone(), ConsumerId::new(), move |message| {
        let _ = tx.send(message.clone());
    });

    if let Err(e) = gateway.connect(me.clone(), args.credentials()).await {
        eprintln!("Offline ({e}); message sending is currently unavailable. Retrying in the background.");
    }

    let mut conversation = Conversation::new(me.clone(), peer.clone());
    match store.history(&me, &peer).await {
        Ok(history) => {
            conversation.load_history(history);
            for message in conversation.messages() {
                println!("{}", render::line(message, &me));
            }
            if let Err(e) = store.mark_read(&peer, &me).await {
                warn!(error = %e, "failed to mark conversation read");
            }
        }
        Err(e) => warn!(error = %e, "history unavailable"),
    }

    let result = run_chat(&gateway, &mut conversation, &mut inbound).await;
    gateway.disconnect();
    info!(user = %me, "chat ended");
    result
}

async fn run_chat(
    gateway: &MessageGateway,
    conversation: &mut Conversation,
    inbound: &mut mpsc::UnboundedReceiver<Message>,
) -> Result<()> {
    let me = conversation.me().clone();
    let peer = conversation.peer().clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(text) = line.context("Failed to read stdin")? else {
                    return Ok(());
                };
                match gateway.send(MessageDraft::new(me.clone(), peer.clone(), text)) {
                    Ok(message) => {
                        if conversation.push_local(message.clone()) == Acceptance::Accepted {
                            println!("{}", render::line(&message, &me));
                        }
                    }
                    Err(SendError::Invalid(_)) => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
            Some(message) = inbound.recv() => {
                match conversation.accept(message.clone()) {
                    Acceptance::Accepted => println!("{}", render::line(&message, &me)),
                    Acceptance::Unrelated { incoming: true } => println!("{}", render::notification(&message)),
                    Acceptance::Duplicate | Acceptance::Unrelated { incoming: false } => {}
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                return Ok(());
            }
        }
    }
}
