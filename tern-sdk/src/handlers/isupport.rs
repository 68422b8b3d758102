use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::{Message, numeric};

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    vec![Hook::inbound(Some(numeric::RPL_ISUPPORT), Priority::FIRST, handle_isupport)]
}

fn handle_isupport(client: &mut Client, msg: &Message) -> Result<()> {
    client.session_mut().isupport.apply(&msg.params);
    Ok(())
}
