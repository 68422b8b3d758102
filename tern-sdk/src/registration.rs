//! Registration state machine.
//!
//! ```text
//! Disconnected -> HandshakeStarted -> CapabilityNegotiating
//!     -> TransportUpgrading -> Authenticating -> Registered
//! ```
//!
//! Capability negotiation, STARTTLS and SASL are each optional. Every wait
//! is bounded by a timer that ends negotiation as if it had failed, so the
//! handshake always reaches identity registration.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::client::Client;
use crate::irc::Message;
use crate::sasl;
use crate::session::RegistrationState;

pub const CAP_TIMEOUT_TIMER: &str = "cap_negotiation_timeout";
pub const SASL_TIMEOUT_TIMER: &str = "sasl_timeout";
pub const KEEPALIVE_TIMER: &str = "keepalive";

pub const CAP_TIMEOUT: Duration = Duration::from_secs(10);
pub const SASL_TIMEOUT: Duration = Duration::from_secs(15);

/// Extensions the built-in handlers understand.
const SUPPORTED_CAPS: &[&str] = &[
    "multi-prefix",
    "account-notify",
    "away-notify",
    "extended-join",
    "userhost-in-names",
];

impl Client {
    /// Start the handshake on a fresh connection.
    pub(crate) fn begin_handshake(&mut self) {
        self.session_mut().handshake = true;
        self.session_mut().state = RegistrationState::HandshakeStarted;

        if !self.config().use_capability_negotiation {
            self.register_identity();
            return;
        }

        self.session_mut().state = RegistrationState::CapabilityNegotiating;
        tracing::debug!("starting capability negotiation");
        self.send_command("CAP", ["LS", "302"]);
        self.arm_cap_timeout();
    }

    fn arm_cap_timeout(&mut self) {
        self.timers_mut()
            .schedule_once(CAP_TIMEOUT_TIMER, CAP_TIMEOUT, |c: &mut Client| {
                tracing::info!("capability negotiation timed out");
                c.terminate_negotiation();
            });
    }

    /// Capabilities we would enable if the server offers them.
    pub fn desired_caps(&self) -> BTreeSet<&'static str> {
        let mut caps: BTreeSet<&'static str> = SUPPORTED_CAPS.iter().copied().collect();
        if self.config().use_transport_upgrade && self.can_upgrade_transport() {
            caps.insert("tls");
        }
        if self.config().use_sasl {
            caps.insert("sasl");
        }
        caps
    }

    /// `CAP * LS [*] :caps`; the `*` marks more lines to come.
    pub(crate) fn on_cap_ls(&mut self, msg: &Message) {
        let more = msg.params.len() > 3 && msg.param(2) == Some("*");
        for token in msg.trailing().unwrap_or_default().split_whitespace() {
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (token, None),
            };
            self.session_mut()
                .caps
                .available
                .insert(name.to_ascii_lowercase(), value);
        }
        if more || self.session().cap_ended {
            return;
        }

        let request: Vec<&str> = self
            .desired_caps()
            .into_iter()
            .filter(|cap| match self.session().caps.available.get(*cap) {
                Some(value) if *cap == "sasl" => sasl::offers_plain(value.as_deref()),
                Some(_) => true,
                None => false,
            })
            .collect();

        if request.is_empty() {
            tracing::debug!("no usable capabilities offered");
            self.terminate_negotiation();
            return;
        }
        self.request_caps(&request);
    }

    fn request_caps(&mut self, caps: &[&str]) {
        self.session_mut()
            .caps
            .requested
            .extend(caps.iter().map(|c| c.to_string()));
        tracing::debug!(caps = %caps.join(" "), "requesting capabilities");
        self.send_command("CAP", ["REQ".to_string(), caps.join(" ")]);
    }

    /// `CAP * ACK :caps`; a `-cap` entry disables.
    pub(crate) fn on_cap_ack(&mut self, msg: &Message) {
        let caps = &mut self.session_mut().caps;
        for token in msg.trailing().unwrap_or_default().split_whitespace() {
            let token = token.to_ascii_lowercase();
            match token.strip_prefix('-') {
                Some(name) => {
                    caps.requested.remove(name);
                    caps.enabled.remove(name);
                }
                None => {
                    caps.requested.remove(&token);
                    caps.enabled.insert(token);
                }
            }
        }
        self.negotiation_answered();
    }

    /// `CAP * NAK :caps`: carry on without them.
    pub(crate) fn on_cap_nak(&mut self, msg: &Message) {
        let rejected = msg.trailing().unwrap_or_default();
        tracing::info!(caps = %rejected, "server rejected capabilities; continuing without them");
        for token in rejected.split_whitespace() {
            self.session_mut()
                .caps
                .requested
                .remove(&token.to_ascii_lowercase());
        }
        self.negotiation_answered();
    }

    /// `CAP * DEL :caps` (cap-notify).
    pub(crate) fn on_cap_del(&mut self, msg: &Message) {
        for token in msg.trailing().unwrap_or_default().split_whitespace() {
            let name = token.to_ascii_lowercase();
            let caps = &mut self.session_mut().caps;
            caps.available.remove(&name);
            if caps.enabled.remove(&name) {
                tracing::info!(cap = %name, "server withdrew capability");
            }
        }
    }

    /// `CAP * NEW :caps` (cap-notify): pick up plain extensions after the
    /// fact. `tls` and `sasl` only matter before registration.
    pub(crate) fn on_cap_new(&mut self, msg: &Message) {
        let mut wanted = Vec::new();
        for token in msg.trailing().unwrap_or_default().split_whitespace() {
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.to_ascii_lowercase(), Some(value.to_string())),
                None => (token.to_ascii_lowercase(), None),
            };
            if let Some(cap) = SUPPORTED_CAPS.iter().find(|c| **c == name) {
                if !self.session().caps.is_enabled(cap) {
                    wanted.push(*cap);
                }
            }
            self.session_mut().caps.available.insert(name, value);
        }
        if !wanted.is_empty() {
            self.request_caps(&wanted);
        }
    }

    fn negotiation_answered(&mut self) {
        if !self.session().caps.requested.is_empty() || self.session().cap_ended {
            return;
        }
        self.timers_mut().cancel(CAP_TIMEOUT_TIMER);
        self.continue_negotiation();
    }

    /// Next optional phase: STARTTLS, then SASL, then `CAP END`.
    pub(crate) fn continue_negotiation(&mut self) {
        if self.session().cap_ended {
            return;
        }
        let caps = &self.session().caps;
        let want_tls = caps.is_enabled("tls") && !self.session().upgrade_attempted;
        let want_sasl = caps.is_enabled("sasl")
            && self.config().use_sasl
            && !self.session().sasl_attempted
            && !self.session().identified;

        if want_tls && self.can_upgrade_transport() {
            self.session_mut().upgrade_attempted = true;
            self.session_mut().state = RegistrationState::TransportUpgrading;
            tracing::debug!("requesting transport upgrade");
            self.send_command("STARTTLS", Vec::<String>::new());
            self.arm_cap_timeout();
        } else if want_sasl {
            self.session_mut().sasl_attempted = true;
            self.session_mut().state = RegistrationState::Authenticating;
            tracing::debug!(mechanism = sasl::MECHANISM, "starting SASL");
            self.send_command("AUTHENTICATE", [sasl::MECHANISM]);
            self.arm_sasl_timeout();
        } else {
            self.terminate_negotiation();
        }
    }

    fn arm_sasl_timeout(&mut self) {
        self.timers_mut()
            .schedule_once(SASL_TIMEOUT_TIMER, SASL_TIMEOUT, |c: &mut Client| {
                tracing::warn!("SASL authentication timed out");
                c.terminate_negotiation();
            });
    }

    /// 670: the server is ready; upgrade once the outbox is flushed.
    pub(crate) fn on_starttls_ready(&mut self) {
        if self.session().state != RegistrationState::TransportUpgrading {
            tracing::warn!("unexpected STARTTLS confirmation, ignoring");
            return;
        }
        self.timers_mut().cancel(CAP_TIMEOUT_TIMER);
        self.request_upgrade();
    }

    /// 691: stay in plaintext.
    pub(crate) fn on_starttls_failed(&mut self, msg: &Message) {
        tracing::warn!(reason = msg.trailing().unwrap_or_default(), "STARTTLS failed; continuing in plaintext");
        self.timers_mut().cancel(CAP_TIMEOUT_TIMER);
        self.session_mut().state = RegistrationState::CapabilityNegotiating;
        self.continue_negotiation();
    }

    pub(crate) fn on_transport_upgraded(&mut self) {
        self.session_mut().state = RegistrationState::CapabilityNegotiating;
        self.continue_negotiation();
    }

    /// `AUTHENTICATE +`: send the PLAIN payload.
    pub(crate) fn on_authenticate(&mut self, msg: &Message) {
        if self.session().identified || self.session().state != RegistrationState::Authenticating {
            return;
        }
        if msg.param(0) != Some("+") {
            tracing::warn!("unexpected response from SASL agent, continuing");
        }
        let Some((username, password)) = self.config().sasl_credentials() else {
            self.terminate_negotiation();
            return;
        };
        let payload = sasl::encode_plain(username, password);
        for chunk in sasl::chunk_payload(&payload) {
            self.send_command("AUTHENTICATE", [chunk]);
        }
        self.arm_sasl_timeout();
    }

    /// 903.
    pub(crate) fn on_sasl_success(&mut self) {
        tracing::info!("SASL authentication succeeded");
        self.session_mut().identified = true;
        self.terminate_negotiation();
    }

    /// 902, 904-907: a failure is never fatal.
    pub(crate) fn on_sasl_failure(&mut self, msg: &Message) {
        tracing::error!(
            numeric = %msg.command,
            reason = msg.trailing().unwrap_or_default(),
            "SASL authentication failed"
        );
        self.terminate_negotiation();
    }

    /// End capability negotiation (once) and register.
    pub fn terminate_negotiation(&mut self) {
        self.timers_mut().cancel(CAP_TIMEOUT_TIMER);
        self.timers_mut().cancel(SASL_TIMEOUT_TIMER);
        if self.session().cap_ended {
            return;
        }
        self.session_mut().cap_ended = true;
        if self.session().state != RegistrationState::Registered {
            self.session_mut().state = RegistrationState::HandshakeStarted;
        }
        tracing::debug!("ending capability negotiation");
        self.send_command("CAP", ["END"]);
        self.register_identity();
    }

    /// Send PASS/NICK/USER. Never sends them twice in one session.
    pub fn register_identity(&mut self) {
        if self.session().identity_sent {
            return;
        }
        self.session_mut().identity_sent = true;

        let config = self.config().clone();
        if let Some(ref password) = config.password {
            self.send_command("PASS", [password.as_str()]);
        }
        self.send_command("NICK", [config.nick.as_str()]);
        self.send_command("USER", [config.user(), "0", "*", config.realname.as_str()]);
    }

    /// 001: registration is complete.
    pub(crate) fn on_welcome(&mut self, msg: &Message) {
        if let Some(nick) = msg.param(0) {
            self.session_mut().nick = nick.to_string();
        }
        self.timers_mut().cancel(CAP_TIMEOUT_TIMER);
        self.timers_mut().cancel(SASL_TIMEOUT_TIMER);
        let session = self.session_mut();
        session.cap_ended = true;
        session.identity_sent = true;
        session.registered = true;
        session.state = RegistrationState::Registered;
        tracing::info!(nick = %session.nick, "registered");

        if let Some(interval) = self.config().keepalive() {
            self.timers_mut()
                .schedule_repeating(KEEPALIVE_TIMER, interval, |c: &mut Client| c.send_keepalive());
        }

        let channels = self.config().default_channels.clone();
        if !channels.is_empty() {
            let keys = self.config().channel_keys.clone();
            self.join_channels(&channels, &keys);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use pretty_assertions::assert_eq;

    fn client(config: ClientConfig) -> Client {
        Client::new(config).unwrap()
    }

    fn base() -> ClientConfig {
        ClientConfig {
            keepalive_interval: 0,
            ..ClientConfig::new("irc.example.net", "tern")
        }
    }

    fn feed(c: &mut Client, line: &str) {
        c.handle_message(&Message::parse(line).unwrap());
    }

    fn wire(c: &mut Client) -> Vec<String> {
        c.drain_outbox().iter().map(Message::to_wire).collect()
    }

    #[tokio::test]
    async fn without_cap_registers_immediately() {
        let mut c = client(ClientConfig {
            use_capability_negotiation: false,
            use_transport_upgrade: false,
            password: Some("pw".into()),
            ..base()
        });
        c.begin_handshake();
        assert_eq!(
            wire(&mut c),
            vec!["PASS pw", "NICK tern", "USER tern 0 * :tern IRC client"]
        );
        assert!(c.timers().is_empty());

        c.register_identity();
        assert!(wire(&mut c).is_empty());
    }

    #[tokio::test]
    async fn multiline_ls_waits_for_last_line() {
        let mut c = client(base());
        c.begin_handshake();
        assert_eq!(wire(&mut c), vec!["CAP LS 302"]);
        assert!(c.timers().contains(CAP_TIMEOUT_TIMER));

        feed(&mut c, ":irc CAP * LS * :multi-prefix sasl=PLAIN");
        assert!(wire(&mut c).is_empty());
        feed(&mut c, ":irc CAP * LS :away-notify chghost");
        assert_eq!(wire(&mut c), vec!["CAP REQ :away-notify multi-prefix"]);
    }

    #[tokio::test]
    async fn nak_degrades_to_cap_end() {
        let mut c = client(base());
        c.begin_handshake();
        wire(&mut c);
        feed(&mut c, ":irc CAP * LS :multi-prefix");
        wire(&mut c);
        feed(&mut c, ":irc CAP * NAK :multi-prefix");
        assert_eq!(
            wire(&mut c),
            vec!["CAP END", "NICK tern", "USER tern 0 * :tern IRC client"]
        );
        assert!(c.session().caps.enabled.is_empty());
        assert!(c.timers().is_empty());
    }

    #[tokio::test]
    async fn sasl_is_skipped_when_plain_is_not_offered() {
        let mut c = client(ClientConfig {
            sasl_username: Some("bot".into()),
            sasl_password: Some("pw".into()),
            ..base()
        });
        c.begin_handshake();
        wire(&mut c);
        feed(&mut c, ":irc CAP * LS :sasl=EXTERNAL");
        assert_eq!(
            wire(&mut c),
            vec!["CAP END", "NICK tern", "USER tern 0 * :tern IRC client"]
        );
    }

    #[tokio::test]
    async fn sasl_failure_still_registers() {
        let mut c = client(ClientConfig {
            sasl_username: Some("bot".into()),
            sasl_password: Some("pw".into()),
            ..base()
        });
        c.begin_handshake();
        feed(&mut c, ":irc CAP * LS :sasl");
        feed(&mut c, ":irc CAP * ACK :sasl");
        assert_eq!(c.state(), RegistrationState::Authenticating);
        feed(&mut c, "AUTHENTICATE +");
        wire(&mut c);

        feed(&mut c, ":irc 904 tern :SASL authentication failed");
        assert_eq!(
            wire(&mut c),
            vec!["CAP END", "NICK tern", "USER tern 0 * :tern IRC client"]
        );
        assert!(!c.session().identified);
        assert!(c.timers().is_empty());
    }

    #[tokio::test]
    async fn welcome_starts_keepalive_and_joins() {
        let mut c = client(ClientConfig {
            use_capability_negotiation: false,
            keepalive_interval: 30,
            default_channels: vec!["#tern".into()],
            ..base()
        });
        c.begin_handshake();
        wire(&mut c);
        feed(&mut c, ":irc 001 tern_ :Welcome");
        assert_eq!(c.state(), RegistrationState::Registered);
        assert_eq!(c.session().nick, "tern_");
        assert!(c.timers().contains(KEEPALIVE_TIMER));
        assert_eq!(wire(&mut c), vec!["JOIN #tern"]);
    }

    #[tokio::test]
    async fn cap_del_removes_enabled() {
        let mut c = client(base());
        c.begin_handshake();
        feed(&mut c, ":irc CAP * LS :away-notify");
        feed(&mut c, ":irc CAP * ACK :away-notify");
        assert!(c.session().caps.is_enabled("away-notify"));
        feed(&mut c, ":irc CAP tern DEL :away-notify");
        assert!(!c.session().caps.is_enabled("away-notify"));
    }
}
