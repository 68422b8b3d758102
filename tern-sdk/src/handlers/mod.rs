//! Built-in handler modules.
//!
//! Each submodule reacts to a handful of commands:
//! - [`cap`]: CAP LS/ACK/NAK/NEW/DEL
//! - [`starttls`]: 670/691
//! - [`sasl`]: AUTHENTICATE and the 90x numerics
//! - [`welcome`]: 001
//! - [`isupport`]: 005
//! - [`pingpong`]: PING/PONG and the keepalive timer
//! - [`nickinuse`]: 432/433/436 before registration
//! - [`roster`]: JOIN, PART, KICK, QUIT, NICK, NAMES
//! - [`account`]: ACCOUNT, AWAY, 900/901
//! - [`presence`]: MONITOR and ISON replies
//! - [`introspect`]: learning our own user/host
//! - [`ctcp`]: VERSION, PING, TIME

mod account;
mod cap;
mod ctcp;
mod introspect;
mod isupport;
mod nickinuse;
mod pingpong;
mod presence;
mod roster;
mod sasl;
mod starttls;
mod welcome;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::dispatch::{CtcpHook, HandlerModule, InboundHook};

/// The closed set of handler modules shipped with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Introspect,
    Isupport,
    Welcome,
    PingPong,
    NickInUse,
    Roster,
    Account,
    Presence,
    Ctcp,
    Cap,
    StartTls,
    Sasl,
}

impl Builtin {
    /// Modules to load for `config`, in registration order.
    pub fn defaults(config: &ClientConfig) -> Vec<Builtin> {
        let mut modules = vec![
            Builtin::Introspect,
            Builtin::Isupport,
            Builtin::Welcome,
            Builtin::PingPong,
            Builtin::NickInUse,
            Builtin::Roster,
            Builtin::Account,
            Builtin::Presence,
            Builtin::Ctcp,
        ];
        if config.use_capability_negotiation {
            modules.push(Builtin::Cap);
            if config.use_transport_upgrade {
                modules.push(Builtin::StartTls);
            }
            if config.use_sasl {
                modules.push(Builtin::Sasl);
            }
        }
        modules
    }
}

impl HandlerModule<Client> for Builtin {
    fn name(&self) -> &str {
        match self {
            Builtin::Introspect => "introspect",
            Builtin::Isupport => "isupport",
            Builtin::Welcome => "welcome",
            Builtin::PingPong => "pingpong",
            Builtin::NickInUse => "nickinuse",
            Builtin::Roster => "roster",
            Builtin::Account => "account",
            Builtin::Presence => "presence",
            Builtin::Ctcp => "ctcp",
            Builtin::Cap => "cap",
            Builtin::StartTls => "starttls",
            Builtin::Sasl => "sasl",
        }
    }

    fn inbound(&self) -> Vec<InboundHook<Client>> {
        match self {
            Builtin::Introspect => introspect::hooks(),
            Builtin::Isupport => isupport::hooks(),
            Builtin::Welcome => welcome::hooks(),
            Builtin::PingPong => pingpong::hooks(),
            Builtin::NickInUse => nickinuse::hooks(),
            Builtin::Roster => roster::hooks(),
            Builtin::Account => account::hooks(),
            Builtin::Presence => presence::hooks(),
            Builtin::Ctcp => Vec::new(),
            Builtin::Cap => cap::hooks(),
            Builtin::StartTls => starttls::hooks(),
            Builtin::Sasl => sasl::hooks(),
        }
    }

    fn ctcp(&self) -> Vec<CtcpHook<Client>> {
        match self {
            Builtin::Ctcp => ctcp::hooks(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_configuration() {
        let plain = ClientConfig {
            use_capability_negotiation: false,
            ..ClientConfig::default()
        };
        assert!(!Builtin::defaults(&plain).contains(&Builtin::Cap));

        let full = ClientConfig {
            use_sasl: true,
            ..ClientConfig::default()
        };
        let modules = Builtin::defaults(&full);
        assert_eq!(modules[0], Builtin::Introspect);
        assert!(modules.ends_with(&[Builtin::Cap, Builtin::StartTls, Builtin::Sasl]));
    }
}
