//! Departure confirmations: MONITOR pushes (730/731) and ISON replies (303).

use std::collections::HashSet;

use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::{Message, Sender, numeric};

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    vec![
        Hook::inbound(Some(numeric::RPL_MONONLINE), Priority::DEFAULT, handle_online),
        Hook::inbound(Some(numeric::RPL_MONOFFLINE), Priority::DEFAULT, handle_offline),
        Hook::inbound(Some(numeric::RPL_ISON), Priority::DEFAULT, handle_ison),
    ]
}

/// `730/731 <me> :target[,target2...]` with `nick!user@host` targets.
fn targets(msg: &Message) -> Vec<String> {
    msg.param(1)
        .unwrap_or_default()
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| Sender::parse(t).nick)
        .collect()
}

fn handle_online(_client: &mut Client, msg: &Message) -> Result<()> {
    for nick in targets(msg) {
        tracing::trace!(%nick, "monitored user online");
    }
    Ok(())
}

fn handle_offline(client: &mut Client, msg: &Message) -> Result<()> {
    for nick in targets(msg) {
        if client.session().is_pending(&nick) {
            client.confirm_departed(&nick);
        }
    }
    Ok(())
}

/// `303 <me> :nick1 nick2`, listing which of the queried nicks are online.
fn handle_ison(client: &mut Client, msg: &Message) -> Result<()> {
    let Some(queried) = client.session_mut().pop_ison_query() else {
        return Ok(());
    };
    let online: HashSet<String> = msg
        .param(1)
        .unwrap_or_default()
        .split_whitespace()
        .map(|n| client.session().fold(n))
        .collect();
    for nick in queried {
        let session = client.session();
        if session.is_pending(&nick) && !online.contains(&session.fold(&nick)) {
            client.confirm_departed(&nick);
        }
    }
    Ok(())
}
