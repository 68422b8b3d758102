//! Channel and user roster upkeep.
//!
//! Membership changes feed the presence tracker: losing the last shared
//! channel starts a departure watch, gaining one cancels it.

use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::{Message, Sender, numeric};

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    vec![
        Hook::inbound(Some("JOIN"), Priority::DEFAULT, handle_join),
        Hook::inbound(Some("PART"), Priority::DEFAULT, handle_part),
        Hook::inbound(Some("KICK"), Priority::DEFAULT, handle_kick),
        Hook::inbound(Some("QUIT"), Priority::DEFAULT, handle_quit),
        Hook::inbound(Some("NICK"), Priority::DEFAULT, handle_nick),
        Hook::inbound(Some(numeric::RPL_NAMREPLY), Priority::DEFAULT, handle_names),
    ]
}

/// Record a membership, cancelling any departure watch first.
fn add_member(client: &mut Client, channel: &str, who: &Sender) {
    if !client.session().is_self(&who.nick) {
        client.unexpire_user(&who.nick);
    }
    client.session_mut().attach(channel, &who.nick);
    let user = client.session_mut().ensure_user(&who.nick);
    if who.user.is_some() {
        user.user.clone_from(&who.user);
    }
    if who.host.is_some() {
        user.host.clone_from(&who.host);
    }
}

/// We left `channel`: drop it and watch whoever we no longer see.
fn leave_channel(client: &mut Client, channel: &str) {
    let orphaned = client.session_mut().remove_channel(channel);
    tracing::debug!(%channel, orphaned = orphaned.len(), "left channel");
    for nick in orphaned {
        client.expire_user(&nick);
    }
}

fn remove_member(client: &mut Client, channel: &str, nick: &str) {
    if client.session_mut().detach(channel, nick) == Some(0) {
        client.expire_user(nick);
    }
}

fn handle_join(client: &mut Client, msg: &Message) -> Result<()> {
    let (Some(who), Some(channel)) = (msg.sender.as_ref(), msg.param(0)) else {
        return Ok(());
    };
    add_member(client, channel, who);

    // extended-join: JOIN <channel> <account|*> :<realname>
    if client.session().caps.is_enabled("extended-join") && msg.params.len() >= 3 {
        let account = msg.param(1).filter(|a| *a != "*").map(str::to_string);
        let realname = msg.param(2).map(str::to_string);
        let user = client.session_mut().ensure_user(&who.nick);
        user.account = account;
        user.realname = realname;
    }
    if client.session().is_self(&who.nick) {
        tracing::info!(%channel, "joined");
    }
    Ok(())
}

fn handle_part(client: &mut Client, msg: &Message) -> Result<()> {
    let (Some(nick), Some(channel)) = (msg.source_nick(), msg.param(0)) else {
        return Ok(());
    };
    if client.session().is_self(nick) {
        leave_channel(client, channel);
    } else {
        remove_member(client, channel, nick);
    }
    Ok(())
}

fn handle_kick(client: &mut Client, msg: &Message) -> Result<()> {
    let (Some(channel), Some(target)) = (msg.param(0), msg.param(1)) else {
        return Ok(());
    };
    if !client.session().is_self(target) {
        remove_member(client, channel, target);
        return Ok(());
    }

    tracing::warn!(
        %channel,
        by = msg.source_nick().unwrap_or_default(),
        reason = msg.param(2).unwrap_or_default(),
        "kicked"
    );
    leave_channel(client, channel);

    if client.config().kick_autorejoin {
        let name = format!("rejoin_{}", client.session().fold(channel));
        let delay = client.config().kick_rejoin_delay();
        let channel = channel.to_string();
        client
            .timers_mut()
            .schedule_once(name, delay, move |c: &mut Client| {
                let keys = c.config().channel_keys.clone();
                c.join_channels([channel.as_str()], &keys);
            });
    }
    Ok(())
}

/// Our own QUIT and someone else's are different events: ours means the
/// server is about to close the connection.
fn handle_quit(client: &mut Client, msg: &Message) -> Result<()> {
    let Some(nick) = msg.source_nick() else {
        return Ok(());
    };
    if client.session().is_self(nick) {
        tracing::info!("quitting network");
        return Ok(());
    }
    client.forget_user(nick);
    Ok(())
}

fn handle_nick(client: &mut Client, msg: &Message) -> Result<()> {
    let (Some(old), Some(new)) = (msg.source_nick(), msg.param(0)) else {
        return Ok(());
    };
    let watched = client.unexpire_user(old);
    client.session_mut().rename_user(old, new);
    if watched {
        client.expire_user(new);
    }
    Ok(())
}

/// `353 <me> <symbol> <channel> :[prefixes]nick[!user@host] ...`
fn handle_names(client: &mut Client, msg: &Message) -> Result<()> {
    let (Some(channel), Some(names)) = (msg.param(2), msg.param(3)) else {
        return Ok(());
    };
    let prefix = client.session().isupport.prefix();

    for entry in names.split_whitespace() {
        let mut modes = Vec::new();
        let mut rest = entry;
        while let Some(symbol) = rest.chars().next() {
            let Some((mode, _)) = prefix.iter().find(|(_, s)| *s == symbol) else {
                break;
            };
            modes.push(*mode);
            rest = &rest[symbol.len_utf8()..];
        }
        let who = Sender::parse(rest);
        if who.nick.is_empty() {
            continue;
        }
        add_member(client, channel, &who);
        if let Some(membership) = client.session_mut().member_mut(channel, &who.nick) {
            for mode in modes {
                membership.add_mode(mode);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::config::ClientConfig;
    use crate::irc::Message;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn client(config: ClientConfig) -> Client {
        Client::new(ClientConfig {
            use_capability_negotiation: false,
            keepalive_interval: 0,
            ..config
        })
        .unwrap()
    }

    fn feed(c: &mut Client, line: &str) {
        c.handle_message(&Message::parse(line).unwrap());
    }

    #[test]
    fn names_reply_maps_prefixes_and_hostmasks() {
        let mut c = client(ClientConfig::new("irc.example.net", "me"));
        feed(&mut c, ":irc 005 me PREFIX=(qohv)~@%+ :are supported by this server");
        feed(&mut c, ":me!u@h JOIN #t");
        feed(&mut c, ":irc 353 me = #t :me ~@owner!o@host +voiced plain");

        let s = c.session();
        assert_eq!(s.member("#t", "owner").unwrap().modes, vec!['q', 'o']);
        assert_eq!(s.member("#t", "voiced").unwrap().modes, vec!['v']);
        assert!(s.member("#t", "plain").unwrap().modes.is_empty());
        assert_eq!(s.user("owner").unwrap().host.as_deref(), Some("host"));
        assert_eq!(s.channel("#t").unwrap().members.len(), 4);
    }

    #[test]
    fn peer_quit_forgets_user_but_own_quit_keeps_state() {
        let mut c = client(ClientConfig::new("irc.example.net", "me"));
        feed(&mut c, ":me!u@h JOIN #t");
        feed(&mut c, ":bob!b@h JOIN #t");

        feed(&mut c, ":bob!b@h QUIT :bye");
        assert!(c.session().user("bob").is_none());
        assert!(c.session().member("#t", "bob").is_none());

        feed(&mut c, ":me!u@h QUIT :bye");
        assert!(c.session().channel("#t").is_some());
    }

    #[test]
    fn nick_change_moves_membership() {
        let mut c = client(ClientConfig::new("irc.example.net", "me"));
        feed(&mut c, ":me!u@h JOIN #t");
        feed(&mut c, ":bob!b@h JOIN #t");
        feed(&mut c, ":bob!b@h NICK robert");
        assert!(c.session().member("#t", "robert").is_some());
        assert!(c.session().user("bob").is_none());

        feed(&mut c, ":me!u@h NICK :me2");
        assert_eq!(c.session().nick, "me2");
    }

    #[test]
    fn extended_join_records_account() {
        let mut c = client(ClientConfig::new("irc.example.net", "me"));
        c.session_mut().caps.enabled.insert("extended-join".into());
        feed(&mut c, ":me!u@h JOIN #t * :Me");
        feed(&mut c, ":bob!b@h JOIN #t bobacct :Bob Real");
        let bob = c.session().user("bob").unwrap();
        assert_eq!(bob.account.as_deref(), Some("bobacct"));
        assert_eq!(bob.realname.as_deref(), Some("Bob Real"));
        assert_eq!(c.session().user("me").unwrap().account, None);
    }

    #[tokio::test(start_paused = true)]
    async fn kick_schedules_rejoin_with_key() {
        let mut config = ClientConfig::new("irc.example.net", "me");
        config.kick_autorejoin = true;
        config.kick_rejoin_delay = 3;
        config.channel_keys.insert("#t".into(), "k3y".into());
        let mut c = client(config);
        feed(&mut c, ":me!u@h JOIN #t");
        c.drain_outbox();

        feed(&mut c, ":op!o@h KICK #t me :out");
        assert!(c.session().channel("#t").is_none());
        assert!(c.timers().contains("rejoin_#t"));

        tokio::time::advance(Duration::from_secs(3)).await;
        c.fire_due_timers(tokio::time::Instant::now());
        assert_eq!(c.drain_outbox(), vec![Message::new("JOIN", ["#t", "k3y"])]);
    }
}
