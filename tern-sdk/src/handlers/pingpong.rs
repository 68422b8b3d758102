//! Server PING answers and keepalive lag measurement.

use anyhow::Result;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::time::Instant;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::Message;

const TOKEN_LEN: usize = 12;

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    vec![
        Hook::inbound(Some("PING"), Priority::DEFAULT, handle_ping),
        Hook::inbound(Some("PONG"), Priority::DEFAULT, handle_pong),
    ]
}

fn handle_ping(client: &mut Client, msg: &Message) -> Result<()> {
    client.send_command("PONG", msg.params.clone());
    Ok(())
}

fn handle_pong(client: &mut Client, msg: &Message) -> Result<()> {
    let lag = &mut client.session_mut().lag;
    if lag.last_token.is_none() || lag.last_token.as_deref() != msg.trailing() {
        return Ok(());
    }
    lag.last_token = None;
    if let Some(sent_at) = lag.sent_at.take() {
        let rtt = sent_at.elapsed();
        lag.rtt = Some(rtt);
        tracing::debug!(lag_ms = rtt.as_millis() as u64, "lag measured");
    }
    Ok(())
}

impl Client {
    /// Send a `PING` with a fresh token and remember when.
    pub(crate) fn send_keepalive(&mut self) {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let lag = &mut self.session_mut().lag;
        lag.last_token = Some(token.clone());
        lag.sent_at = Some(Instant::now());
        self.send_command("PING", [token]);
    }
}

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::config::ClientConfig;
    use crate::irc::Message;
    use std::time::Duration;

    fn client() -> Client {
        Client::new(ClientConfig {
            use_capability_negotiation: false,
            keepalive_interval: 0,
            ..ClientConfig::new("irc.example.net", "me")
        })
        .unwrap()
    }

    #[test]
    fn server_ping_is_answered() {
        let mut c = client();
        c.handle_message(&Message::parse("PING :irc.example.net").unwrap());
        assert_eq!(
            c.drain_outbox(),
            vec![Message::new("PONG", ["irc.example.net"])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn matching_pong_records_lag() {
        let mut c = client();
        c.send_keepalive();
        let ping = c.drain_outbox().remove(0);
        let token = ping.trailing().unwrap().to_string();
        assert_eq!(token.len(), 12);

        tokio::time::advance(Duration::from_millis(250)).await;
        c.handle_message(&Message::parse(":irc PONG irc :wrong").unwrap());
        assert!(c.session().lag.rtt.is_none());

        let pong = Message::new("PONG", ["irc".to_string(), token]);
        c.handle_message(&pong);
        assert_eq!(c.session().lag.rtt, Some(Duration::from_millis(250)));
        assert!(c.session().lag.last_token.is_none());
    }
}
