use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::{Message, numeric};

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    vec![Hook::inbound(Some(numeric::RPL_WELCOME), Priority::DEFAULT, handle_welcome)]
}

fn handle_welcome(client: &mut Client, msg: &Message) -> Result<()> {
    client.on_welcome(msg);
    Ok(())
}
