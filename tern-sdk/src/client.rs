//! The client engine.
//!
//! A [`Client`] owns one session at a time: the configuration, the
//! [`Session`] state, the hook [`Registry`], the [`Timers`] and the
//! [`Connection`]. Hooks and timer callbacks run synchronously with
//! `&mut Client`; anything they send is queued and written by the run loop.
//!
//! The caller drives it:
//!
//! ```rust,no_run
//! use tern_sdk::{Client, ClientConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut client = Client::new(ClientConfig::new("irc.libera.chat", "ternbot"))?;
//! client.connect().await?;
//! loop {
//!     for msg in client.poll_inbound().await? {
//!         if msg.command == "PRIVMSG" && msg.trailing() == Some("!ping") {
//!             let target = msg.param(0).unwrap_or_default().to_string();
//!             client.privmsg(&target, "pong");
//!         }
//!     }
//! }
//! # }
//! ```
//!
//! ## Reconnection
//!
//! The engine does not reconnect by itself. When [`Client::poll_inbound`]
//! returns an error for which [`Error::is_disconnect`] holds, call
//! [`Client::connect`] again (it resets first), with backoff.

use std::collections::VecDeque;

use tokio::time::Instant;
use tracing::Instrument;

use crate::config::ClientConfig;
use crate::connection::{Connection, Transport};
use crate::dispatch::{Ctcp, HandlerModule, Registry, run_inbound, run_outbound};
use crate::error::{Error, Result};
use crate::handlers::Builtin;
use crate::irc::Message;
use crate::session::{RegistrationState, Session};
use crate::timer::Timers;

pub struct Client {
    config: ClientConfig,
    session: Session,
    registry: Registry<Client>,
    timers: Timers<Client>,
    conn: Option<Connection>,
    outbox: VecDeque<Message>,
    upgrade_requested: bool,
    span: tracing::Span,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server", &self.config.server_addr())
            .field("nick", &self.session.nick)
            .field("state", &self.session.state)
            .field("conn", &self.conn)
            .field("timers", &self.timers)
            .field("registry", &self.registry)
            .field("queued", &self.outbox.len())
            .finish()
    }
}

impl Client {
    /// Validate `config` and register the built-in handlers.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_modules(config, Vec::new())
    }

    /// Like [`Client::new`], merging `modules` after the built-ins in the
    /// order given.
    pub fn with_modules(
        config: ClientConfig,
        modules: Vec<Box<dyn HandlerModule<Client>>>,
    ) -> Result<Self> {
        let config = config.validate()?;
        let mut registry = Registry::new();
        for builtin in Builtin::defaults(&config) {
            registry.add_module(&builtin);
        }
        for module in &modules {
            registry.add_module(module.as_ref());
        }

        let span = tracing::info_span!("tern", server = %config.server_addr());
        Ok(Self {
            session: Session::new(&config.nick),
            config,
            registry,
            timers: Timers::new(),
            conn: None,
            outbox: VecDeque::new(),
            upgrade_requested: false,
            span,
        })
    }

    /// Use `span` as the parent of everything the engine logs.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn state(&self) -> RegistrationState {
        self.session.state
    }

    pub fn timers(&self) -> &Timers<Client> {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut Timers<Client> {
        &mut self.timers
    }

    /// Hooks registered here apply from the next message on.
    pub fn registry_mut(&mut self) -> &mut Registry<Client> {
        &mut self.registry
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Messages queued but not yet written.
    pub fn pending_output(&self) -> impl Iterator<Item = &Message> {
        self.outbox.iter()
    }

    /// Take the queued output without writing it.
    pub fn drain_outbox(&mut self) -> Vec<Message> {
        self.outbox.drain(..).collect()
    }

    // ── lifecycle ──

    /// Reset, open the configured endpoint and start the handshake.
    pub async fn connect(&mut self) -> Result<()> {
        self.reset();
        let span = self.span.clone();
        let conn = Connection::connect(&self.config).instrument(span).await?;
        self.start(conn).await
    }

    /// Reset and start the handshake over a transport the caller opened.
    pub async fn connect_with(&mut self, transport: Transport) -> Result<()> {
        self.reset();
        let conn = Connection::from_transport(transport, self.config.server_addr());
        self.start(conn).await
    }

    async fn start(&mut self, conn: Connection) -> Result<()> {
        self.conn = Some(conn);
        let span = self.span.clone();
        span.in_scope(|| self.begin_handshake());
        self.flush().await
    }

    /// Tear down the session: cancel every timer, drop the connection and
    /// any queued output, and start over with a fresh [`Session`].
    pub fn reset(&mut self) {
        self.timers.cancel_all();
        self.outbox.clear();
        self.upgrade_requested = false;
        self.conn = None;
        self.session = Session::new(&self.config.nick);
        tracing::debug!(parent: &self.span, "session reset");
    }

    fn on_transport_error(&mut self, error: &Error) {
        tracing::info!(parent: &self.span, %error, "disconnected");
        self.timers.cancel_all();
        self.outbox.clear();
        self.upgrade_requested = false;
        self.conn = None;
        self.session.state = RegistrationState::Disconnected;
    }

    pub(crate) fn request_upgrade(&mut self) {
        self.upgrade_requested = true;
    }

    pub(crate) fn can_upgrade_transport(&self) -> bool {
        self.conn.as_ref().is_some_and(Connection::can_upgrade)
    }

    // ── run loop ──

    /// Wait for the next batch of inbound messages or due timers.
    ///
    /// Every message from one read is dispatched in order before this
    /// returns them; an empty batch means only timers fired. Transport
    /// errors cancel all timers and are returned to the caller.
    pub async fn poll_inbound(&mut self) -> Result<Vec<Message>> {
        let span = self.span.clone();
        self.poll_once().instrument(span).await
    }

    async fn poll_once(&mut self) -> Result<Vec<Message>> {
        self.flush().await?;
        let deadline = self.timers.next_deadline();
        let conn = self.conn.as_mut().ok_or(Error::NotConnected)?;

        let received = tokio::select! {
            result = conn.receive() => Some(result),
            _ = sleep_until(deadline) => None,
        };

        match received {
            Some(Ok(messages)) => {
                for msg in &messages {
                    self.handle_message(msg);
                }
                self.flush().await?;
                Ok(messages)
            }
            Some(Err(e)) => {
                self.on_transport_error(&e);
                Err(e)
            }
            None => {
                self.fire_due_timers(Instant::now());
                self.flush().await?;
                Ok(Vec::new())
            }
        }
    }

    /// Run inbound hooks for `msg`. A failing hook is logged and skips the
    /// rest of this message's hooks only.
    pub fn handle_message(&mut self, msg: &Message) {
        let hooks = self.registry.inbound_hooks(&msg.command);
        let ctcp_hooks = Ctcp::from_message(msg)
            .map(|ctcp| self.registry.ctcp_hooks(&ctcp.tag))
            .unwrap_or_default();
        if let Err(error) = run_inbound(&hooks, |_| ctcp_hooks, self, msg) {
            tracing::warn!(command = %msg.command, %error, "inbound hook failed");
        }
    }

    /// Fire every timer due at `now` on this client. Returns how many ran.
    pub fn fire_due_timers(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some((name, callback)) = self.timers.pop_due(now) {
            tracing::trace!(timer = %name, "timer fired");
            callback(self);
            fired += 1;
        }
        fired
    }

    /// Write queued output, performing a pending STARTTLS upgrade once the
    /// queue is empty.
    pub async fn flush(&mut self) -> Result<()> {
        loop {
            while let Some(msg) = self.outbox.pop_front() {
                let conn = self.conn.as_mut().ok_or(Error::NotConnected)?;
                if let Err(e) = conn.send_frame(&msg).await {
                    self.on_transport_error(&e);
                    return Err(e);
                }
            }
            if !std::mem::take(&mut self.upgrade_requested) {
                return Ok(());
            }

            let conn = self.conn.take().ok_or(Error::NotConnected)?;
            match conn.upgrade(self.config.host(), self.config.tls_insecure).await {
                Ok(conn) => {
                    self.conn = Some(conn);
                    self.on_transport_upgraded();
                }
                Err(e) => {
                    self.on_transport_error(&e);
                    return Err(e);
                }
            }
        }
    }

    // ── output ──

    /// Queue `msg` unless an outbound hook cancels it. Returns whether it
    /// was queued.
    pub fn send(&mut self, msg: Message) -> bool {
        let hooks = self.registry.outbound_hooks(&msg.command);
        if run_outbound(&hooks, self, &msg) {
            tracing::debug!(command = %msg.command, "outbound message cancelled by hook");
            return false;
        }
        self.outbox.push_back(msg);
        true
    }

    pub fn send_command<I, S>(&mut self, command: &str, params: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(Message::new(command, params))
    }

    pub fn privmsg(&mut self, target: &str, text: &str) -> bool {
        self.send_command("PRIVMSG", [target, text])
    }

    pub fn notice(&mut self, target: &str, text: &str) -> bool {
        self.send_command("NOTICE", [target, text])
    }

    pub fn part(&mut self, channel: &str, reason: Option<&str>) -> bool {
        match reason {
            Some(reason) => self.send_command("PART", [channel, reason]),
            None => self.send_command("PART", [channel]),
        }
    }

    pub fn quit(&mut self, reason: Option<&str>) -> bool {
        match reason {
            Some(reason) => self.send_command("QUIT", [reason]),
            None => self.send_command("QUIT", Vec::<String>::new()),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Flow, Priority};
    use std::time::Duration;

    fn client() -> Client {
        let config = ClientConfig {
            use_capability_negotiation: false,
            keepalive_interval: 0,
            ..ClientConfig::new("irc.example.net", "tern")
        };
        Client::new(config).unwrap()
    }

    #[test]
    fn outbound_cancel_suppresses_the_write() {
        let mut c = client();
        c.registry_mut()
            .register_outbound(Some("PRIVMSG"), Priority::DEFAULT, |_, msg| {
                if msg.trailing() == Some("secret") {
                    Flow::Cancel
                } else {
                    Flow::Continue
                }
            });

        assert!(!c.privmsg("#t", "secret"));
        assert!(c.privmsg("#t", "hello"));
        let out = c.drain_outbox();
        assert_eq!(out, vec![Message::new("PRIVMSG", ["#t", "hello"])]);
    }

    #[test]
    fn failing_hook_is_contained() {
        let mut c = client();
        c.registry_mut()
            .register_inbound(Some("PING"), Priority::FIRST, |_, _| anyhow::bail!("boom"));
        c.handle_message(&Message::parse("PING :x").unwrap());
        assert!(c.drain_outbox().is_empty());

        c.handle_message(&Message::parse(":irc 005 tern MONITOR :are supported").unwrap());
        assert!(c.session().isupport.supports_monitor());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_timers_and_rebuilds_session() {
        let mut c = client();
        c.timers_mut()
            .schedule_once("stale", Duration::from_secs(1), |c: &mut Client| {
                c.privmsg("#t", "too late");
            });
        c.session_mut().caps.enabled.insert("sasl".into());
        c.session_mut().registered = true;

        c.reset();
        assert!(c.timers().is_empty());
        assert!(c.session().caps.enabled.is_empty());
        assert!(!c.session().registered);
        assert_eq!(c.state(), RegistrationState::Disconnected);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(c.fire_due_timers(Instant::now()), 0);
    }

    #[tokio::test]
    async fn poll_without_connection_is_an_error() {
        let mut c = client();
        assert!(matches!(c.poll_inbound().await, Err(Error::NotConnected)));
    }
}
