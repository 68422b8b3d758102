//! CAP replies from the server.

use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::Message;

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    vec![Hook::inbound(Some("CAP"), Priority::DEFAULT, handle_cap)]
}

fn handle_cap(client: &mut Client, msg: &Message) -> Result<()> {
    let subcmd = msg.param(1).map(str::to_ascii_uppercase);
    match subcmd.as_deref() {
        Some("LS") => client.on_cap_ls(msg),
        Some("ACK") => client.on_cap_ack(msg),
        Some("NAK") => client.on_cap_nak(msg),
        Some("NEW") => client.on_cap_new(msg),
        Some("DEL") => client.on_cap_del(msg),
        other => tracing::debug!(subcommand = ?other, "ignoring CAP reply"),
    }
    Ok(())
}
