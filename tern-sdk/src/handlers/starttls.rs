use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::{Message, numeric};

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    vec![
        Hook::inbound(Some(numeric::RPL_STARTTLS), Priority::DEFAULT, |c: &mut Client, _: &Message| {
            c.on_starttls_ready();
            Ok(())
        }),
        Hook::inbound(Some(numeric::ERR_STARTTLS), Priority::DEFAULT, handle_failed),
    ]
}

fn handle_failed(client: &mut Client, msg: &Message) -> Result<()> {
    client.on_starttls_failed(msg);
    Ok(())
}
