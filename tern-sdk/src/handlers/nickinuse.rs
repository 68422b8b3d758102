//! Nickname fallback while registering: the configured `altnick`, then
//! `nick` plus a counter, then `nick` plus random digits.

use anyhow::Result;
use rand::Rng;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::{Message, numeric};

/// Counter suffixes tried after the altnick.
const COUNTER_TRIES: u32 = 4;

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    [
        numeric::ERR_NICKNAMEINUSE,
        numeric::ERR_ERRONEUSNICKNAME,
        numeric::ERR_NICKCOLLISION,
    ]
    .into_iter()
    .map(|n| Hook::inbound(Some(n), Priority::DEFAULT, handle_nick_unavailable))
    .collect()
}

fn handle_nick_unavailable(client: &mut Client, msg: &Message) -> Result<()> {
    let rejected = msg.param(1).unwrap_or_default();
    if client.session().registered {
        tracing::warn!(nick = %rejected, numeric = %msg.command, "nick change refused");
        return Ok(());
    }

    let session = client.session_mut();
    session.nick_tries += 1;
    let tries = session.nick_tries;
    let nicklen = session.isupport.nicklen();

    let base = client.config().nick.clone();
    let candidate = match tries {
        1 => client.config().altnick(),
        n if n <= 1 + COUNTER_TRIES => with_suffix(&base, &(n - 1).to_string(), nicklen),
        _ => {
            let digits = format!("{:04}", rand::thread_rng().gen_range(0..10_000));
            with_suffix(&base, &digits, nicklen)
        }
    };
    tracing::info!(%rejected, %candidate, "nick unavailable, trying another");
    client.session_mut().nick = candidate.clone();
    client.send_command("NICK", [candidate]);
    Ok(())
}

/// Append `suffix`, shortening `base` so the result fits `nicklen`.
fn with_suffix(base: &str, suffix: &str, nicklen: Option<usize>) -> String {
    let keep = match nicklen {
        Some(max) if max > suffix.len() => max - suffix.len(),
        _ => base.chars().count(),
    };
    let mut nick: String = base.chars().take(keep).collect();
    nick.push_str(suffix);
    nick
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    #[test]
    fn fallback_sequence() {
        let mut c = Client::new(ClientConfig {
            use_capability_negotiation: false,
            ..ClientConfig::new("irc.example.net", "terntern")
        })
        .unwrap();
        let in_use = Message::parse(":irc 433 * terntern :Nickname is already in use").unwrap();

        let mut tried = Vec::new();
        for _ in 0..6 {
            c.handle_message(&in_use);
            tried.push(c.session().nick.clone());
        }
        assert_eq!(&tried[..5], ["terntern_", "ternter1", "ternter2", "ternter3", "ternter4"]);
        assert_eq!(tried[5].len(), 8);
        assert!(tried[5].starts_with("tern"));
        assert_eq!(c.drain_outbox().len(), 6);
    }

    #[test]
    fn suffix_respects_nicklen() {
        assert_eq!(with_suffix("abcdefgh", "12", Some(8)), "abcdef12");
        assert_eq!(with_suffix("abc", "1", None), "abc1");
    }
}
