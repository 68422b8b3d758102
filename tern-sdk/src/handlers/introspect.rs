//! Learn our own user and host from what the server echoes back.

use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::{Message, numeric};

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    vec![
        Hook::inbound(None, Priority::FIRST, handle_any),
        Hook::inbound(Some(numeric::RPL_HOSTHIDDEN), Priority::DEFAULT, handle_host_hidden),
    ]
}

fn handle_any(client: &mut Client, msg: &Message) -> Result<()> {
    let Some(sender) = msg.sender.as_ref() else {
        return Ok(());
    };
    if sender.nick.is_empty() || !client.session().is_self(&sender.nick) {
        return Ok(());
    }
    let session = client.session_mut();
    if sender.user.is_some() {
        session.user.clone_from(&sender.user);
    }
    if sender.host.is_some() {
        session.host.clone_from(&sender.host);
    }
    Ok(())
}

/// `396 <me> <host> :is now your displayed host`
fn handle_host_hidden(client: &mut Client, msg: &Message) -> Result<()> {
    if let Some(host) = msg.param(1) {
        tracing::debug!(%host, "host hidden");
        client.session_mut().host = Some(host.to_string());
    }
    Ok(())
}
