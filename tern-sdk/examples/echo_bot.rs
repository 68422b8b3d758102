//! Echo bot example: custom handler module, outbound filtering and a
//! reconnect loop around the poll API.
//!
//! Usage:
//!   cargo run --example echo_bot -- --host irc.libera.chat --tls \
//!     --channel "#tern-test" --nick ternbot
//!
//! Or point it at a config file:
//!   cargo run --example echo_bot -- --config ~/.config/tern/client.toml
//!
//! Features demonstrated:
//!   - `!echo`, `!ping` and `!who` commands from a HandlerModule
//!   - An outbound hook that refuses to send anything containing a secret
//!   - Automatic reconnect with exponential backoff

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tern_sdk::dispatch::{InboundHook, OutboundHook};
use tern_sdk::{Client, ClientConfig, Flow, HandlerModule, Hook, Message, Priority};

#[derive(Parser)]
#[command(name = "echo-bot", about = "tern echo bot example")]
struct Args {
    /// TOML config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, default_value = "ternbot")]
    nick: String,
    #[arg(long)]
    channel: Vec<String>,
    #[arg(long)]
    tls: bool,
    #[arg(long, env = "TERN_SASL_USER")]
    sasl_user: Option<String>,
    #[arg(long, env = "TERN_SASL_PASSWORD")]
    sasl_password: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig> {
        let mut config = match self.config {
            Some(ref path) => ClientConfig::load(path)?,
            None => ClientConfig::new("irc.libera.chat", &self.nick),
        };
        if let Some(host) = self.host {
            config.host = Some(host);
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        if self.tls {
            config.use_secure_transport = true;
        }
        if !self.channel.is_empty() {
            config.default_channels = self.channel;
        }
        if self.sasl_user.is_some() {
            config.sasl_username = self.sasl_user;
            config.sasl_password = self.sasl_password;
        }
        Ok(config)
    }
}

struct EchoModule {
    secret: Option<String>,
}

impl EchoModule {
    fn handle_privmsg(client: &mut Client, msg: &Message) -> Result<()> {
        let (Some(target), Some(text), Some(sender)) =
            (msg.param(0), msg.trailing(), msg.source_nick())
        else {
            return Ok(());
        };
        let reply_to = if client.session().isupport.is_channel(target) {
            target.to_string()
        } else {
            sender.to_string()
        };

        let (command, args) = text.split_once(' ').unwrap_or((text, ""));
        match command {
            "!echo" if !args.is_empty() => {
                client.privmsg(&reply_to, args);
            }
            "!ping" => {
                let lag = client
                    .session()
                    .lag
                    .rtt
                    .map(|rtt| format!("{}ms", rtt.as_millis()))
                    .unwrap_or_else(|| "unknown".into());
                client.privmsg(&reply_to, &format!("{sender}: pong (lag {lag})"));
            }
            "!who" => {
                let reply = match client.session().user(args.trim()) {
                    Some(user) => format!(
                        "{} is {}@{} account={} away={}",
                        user.nick,
                        user.user.as_deref().unwrap_or("?"),
                        user.host.as_deref().unwrap_or("?"),
                        user.account.as_deref().unwrap_or("*"),
                        user.away,
                    ),
                    None => format!("I don't know {}", args.trim()),
                };
                client.privmsg(&reply_to, &reply);
            }
            _ => {}
        }
        Ok(())
    }
}

impl HandlerModule<Client> for EchoModule {
    fn name(&self) -> &str {
        "echo"
    }

    fn inbound(&self) -> Vec<InboundHook<Client>> {
        vec![Hook::inbound(Some("PRIVMSG"), Priority::DEFAULT, Self::handle_privmsg)]
    }

    fn outbound(&self) -> Vec<OutboundHook<Client>> {
        let Some(secret) = self.secret.clone() else {
            return Vec::new();
        };
        vec![Hook::outbound(Some("PRIVMSG"), Priority::FIRST, move |_: &mut Client, msg: &Message| {
            if msg.trailing().is_some_and(|t| t.contains(&secret)) {
                tracing::warn!("refusing to leak the SASL password");
                Flow::Cancel
            } else {
                Flow::Continue
            }
        })]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tern_sdk=debug".into()),
        )
        .init();

    let config = Args::parse().into_config()?;
    let module = EchoModule {
        secret: config.sasl_password.clone(),
    };
    let mut client = Client::with_modules(config, vec![Box::new(module)])?;

    println!("Echo bot starting...");
    println!("  Server: {}", client.config().server_addr());
    println!("  Channels: {}", client.config().default_channels.join(", "));
    println!("  Commands: !echo <text> !ping !who <nick>");

    let mut backoff = Duration::from_secs(1);
    loop {
        if let Err(e) = client.connect().await {
            tracing::warn!(error = %e, "connect failed");
        } else {
            loop {
                match client.poll_inbound().await {
                    Ok(_) => backoff = Duration::from_secs(1),
                    Err(e) => {
                        tracing::warn!(error = %e, "connection lost");
                        break;
                    }
                }
            }
        }

        tracing::info!(delay = ?backoff, "reconnecting");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(60));
    }
}
