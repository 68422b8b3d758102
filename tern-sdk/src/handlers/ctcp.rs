//! Built-in CTCP replies.

use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Ctcp, CtcpHook, Hook, Priority};
use crate::irc::Message;

pub(super) fn hooks() -> Vec<CtcpHook<Client>> {
    vec![
        Hook::ctcp(Some("VERSION"), Priority::DEFAULT, handle_version),
        Hook::ctcp(Some("PING"), Priority::DEFAULT, handle_ping),
        Hook::ctcp(Some("TIME"), Priority::DEFAULT, handle_time),
    ]
}

fn reply(client: &mut Client, msg: &Message, ctcp: &Ctcp, args: Option<&str>) {
    if ctcp.is_reply {
        return;
    }
    let Some(nick) = msg.source_nick() else {
        return;
    };
    tracing::debug!(%nick, tag = %ctcp.tag, "answering CTCP");
    client.notice(nick, &Ctcp::encode(&ctcp.tag, args));
}

fn handle_version(client: &mut Client, msg: &Message, ctcp: &Ctcp) -> Result<()> {
    let version = client.config().version.clone();
    reply(client, msg, ctcp, Some(&version));
    Ok(())
}

fn handle_ping(client: &mut Client, msg: &Message, ctcp: &Ctcp) -> Result<()> {
    reply(client, msg, ctcp, ctcp.args.as_deref());
    Ok(())
}

fn handle_time(client: &mut Client, msg: &Message, ctcp: &Ctcp) -> Result<()> {
    let now = chrono::Local::now().to_rfc2822();
    reply(client, msg, ctcp, Some(&now));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::config::ClientConfig;
    use crate::irc::Message;
    use pretty_assertions::assert_eq;

    fn client() -> Client {
        Client::new(ClientConfig {
            use_capability_negotiation: false,
            version: "tern test".into(),
            ..ClientConfig::new("irc.example.net", "me")
        })
        .unwrap()
    }

    #[test]
    fn version_and_ping_are_answered_by_notice() {
        let mut c = client();
        c.handle_message(&Message::parse(":bob!b@h PRIVMSG me :\x01VERSION\x01").unwrap());
        c.handle_message(&Message::parse(":bob!b@h PRIVMSG me :\x01PING 1234\x01").unwrap());
        assert_eq!(
            c.drain_outbox(),
            vec![
                Message::new("NOTICE", ["bob", "\x01VERSION tern test\x01"]),
                Message::new("NOTICE", ["bob", "\x01PING 1234\x01"]),
            ]
        );
    }

    #[test]
    fn replies_are_not_answered() {
        let mut c = client();
        c.handle_message(&Message::parse(":bob!b@h NOTICE me :\x01VERSION other\x01").unwrap());
        c.handle_message(&Message::parse(":bob!b@h PRIVMSG me :\x01TIME\x01").unwrap());
        let out = c.drain_outbox();
        assert_eq!(out.len(), 1);
        assert!(out[0].trailing().unwrap().starts_with("\x01TIME "));
    }
}
