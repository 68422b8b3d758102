//! Session configuration.
//!
//! Loaded from TOML (`~/.config/tern/client.toml` by default) or built in
//! code. [`ClientConfig::validate`] runs when a client is constructed and
//! either aborts (missing endpoint, TLS impossible) or downgrades features
//! with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::TLS_AVAILABLE;
use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 6667;
pub const DEFAULT_TLS_PORT: u16 = 6697;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Desired nickname.
    pub nick: String,
    /// Tried when `nick` is taken. Defaults to `nick` + `_`.
    pub altnick: Option<String>,
    /// Username (ident). Defaults to `nick`.
    pub user: Option<String>,
    pub realname: String,
    /// CTCP VERSION reply.
    pub version: String,

    pub host: Option<String>,
    /// Defaults to 6697 with `use_secure_transport`, 6667 otherwise.
    pub port: Option<u16>,
    /// Connect over TLS from the first byte.
    #[serde(alias = "tls")]
    pub use_secure_transport: bool,
    /// Skip certificate verification (self-signed servers).
    pub tls_insecure: bool,
    /// Request STARTTLS before registering.
    pub use_transport_upgrade: bool,
    /// Server password (PASS).
    pub password: Option<String>,
    /// Seconds allowed for the TCP (and TLS) connect.
    pub connect_timeout: u64,

    #[serde(alias = "channels")]
    pub default_channels: Vec<String>,
    pub channel_keys: HashMap<String, String>,
    /// Seconds between lag-check pings; 0 disables.
    pub keepalive_interval: u64,

    #[serde(alias = "use_cap")]
    pub use_capability_negotiation: bool,
    pub use_sasl: bool,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,

    pub kick_autorejoin: bool,
    /// Seconds to wait before rejoining after a kick.
    pub kick_rejoin_delay: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nick: "tern".to_string(),
            altnick: None,
            user: None,
            realname: "tern IRC client".to_string(),
            version: concat!("tern-sdk ", env!("CARGO_PKG_VERSION")).to_string(),
            host: None,
            port: None,
            use_secure_transport: false,
            tls_insecure: false,
            use_transport_upgrade: true,
            password: None,
            connect_timeout: 10,
            default_channels: Vec::new(),
            channel_keys: HashMap::new(),
            keepalive_interval: 60,
            use_capability_negotiation: true,
            use_sasl: false,
            sasl_username: None,
            sasl_password: None,
            kick_autorejoin: false,
            kick_rejoin_delay: 5,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            nick: nick.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tern")
            .join("client.toml")
    }

    /// Check the configuration and resolve feature interactions.
    pub fn validate(mut self) -> Result<Self> {
        match self.host.as_deref().map(str::trim) {
            None | Some("") => return Err(Error::Config("no host specified".into())),
            Some(_) => {}
        }
        if self.nick.trim().is_empty() || self.nick.contains(' ') {
            return Err(Error::Config(format!("invalid nick {:?}", self.nick)));
        }

        if !TLS_AVAILABLE {
            if self.use_secure_transport {
                return Err(Error::TlsUnavailable);
            }
            if self.use_transport_upgrade {
                tracing::warn!("STARTTLS unavailable without a TLS crypto provider; disabling");
                self.use_transport_upgrade = false;
            }
        }
        if self.use_secure_transport && self.use_transport_upgrade {
            tracing::debug!("already on TLS; transport upgrade not needed");
            self.use_transport_upgrade = false;
        }

        let have_credentials = self.sasl_credentials().is_some();
        if self.use_sasl && !have_credentials {
            tracing::warn!("unable to use SASL, no username/password provided");
            self.use_sasl = false;
        } else if have_credentials {
            self.use_sasl = true;
        }

        if (self.use_sasl || self.use_transport_upgrade) && !self.use_capability_negotiation {
            tracing::warn!("enabling capability negotiation because STARTTLS and/or SASL requested");
            self.use_capability_negotiation = true;
        }

        Ok(self)
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.use_secure_transport {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    pub fn altnick(&self) -> String {
        self.altnick.clone().unwrap_or_else(|| format!("{}_", self.nick))
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(&self.nick)
    }

    pub fn sasl_credentials(&self) -> Option<(&str, &str)> {
        match (self.sasl_username.as_deref(), self.sasl_password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_interval > 0).then(|| Duration::from_secs(self.keepalive_interval))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn kick_rejoin_delay(&self) -> Duration {
        Duration::from_secs(self.kick_rejoin_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_host_aborts() {
        let err = ClientConfig::default().validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn sasl_without_password_is_disabled() {
        let cfg = ClientConfig {
            use_sasl: true,
            sasl_username: Some("bot".into()),
            ..ClientConfig::new("irc.example.net", "bot")
        }
        .validate()
        .unwrap();
        assert!(!cfg.use_sasl);
    }

    #[test]
    fn credentials_enable_sasl_and_force_cap() {
        let cfg = ClientConfig {
            use_capability_negotiation: false,
            use_transport_upgrade: false,
            sasl_username: Some("bot".into()),
            sasl_password: Some("hunter2".into()),
            ..ClientConfig::new("irc.example.net", "bot")
        }
        .validate()
        .unwrap();
        assert!(cfg.use_sasl);
        assert!(cfg.use_capability_negotiation);
    }

    #[test]
    fn secure_transport_disables_upgrade_and_picks_tls_port() {
        let cfg = ClientConfig {
            use_secure_transport: true,
            ..ClientConfig::new("irc.example.net", "bot")
        }
        .validate()
        .unwrap();
        assert!(!cfg.use_transport_upgrade);
        assert_eq!(cfg.port(), DEFAULT_TLS_PORT);
    }

    #[test]
    fn parses_toml_with_aliases() {
        let cfg = ClientConfig::from_toml_str(
            r##"
            nick = "Vorpel"
            host = "irc.example.net"
            port = 6667
            channels = ["#tern", "#secret"]
            use_cap = true
            keepalive_interval = 0

            [channel_keys]
            "#secret" = "hunter2"
            "##,
        )
        .unwrap();
        assert_eq!(cfg.nick, "Vorpel");
        assert_eq!(cfg.default_channels, vec!["#tern", "#secret"]);
        assert_eq!(cfg.channel_keys.get("#secret").map(String::as_str), Some("hunter2"));
        assert_eq!(cfg.keepalive(), None);
        assert_eq!(cfg.altnick(), "Vorpel_");
        assert_eq!(cfg.user(), "Vorpel");
    }
}
