//! SASL exchange: `AUTHENTICATE` prompts and the 90x outcome numerics.

use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::{Message, numeric};

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    let mut hooks = vec![
        Hook::inbound(Some("AUTHENTICATE"), Priority::DEFAULT, handle_authenticate),
        Hook::inbound(Some(numeric::RPL_SASLSUCCESS), Priority::DEFAULT, handle_success),
        // Already authenticated counts as success.
        Hook::inbound(Some(numeric::ERR_SASLALREADY), Priority::DEFAULT, handle_success),
        Hook::inbound(Some(numeric::RPL_SASLMECHS), Priority::DEFAULT, handle_mechs),
    ];
    for failure in [
        numeric::ERR_NICKLOCKED,
        numeric::ERR_SASLFAIL,
        numeric::ERR_SASLTOOLONG,
        numeric::ERR_SASLABORTED,
    ] {
        hooks.push(Hook::inbound(Some(failure), Priority::DEFAULT, handle_failure));
    }
    hooks
}

fn handle_authenticate(client: &mut Client, msg: &Message) -> Result<()> {
    client.on_authenticate(msg);
    Ok(())
}

fn handle_success(client: &mut Client, _msg: &Message) -> Result<()> {
    client.on_sasl_success();
    Ok(())
}

fn handle_failure(client: &mut Client, msg: &Message) -> Result<()> {
    client.on_sasl_failure(msg);
    Ok(())
}

fn handle_mechs(_client: &mut Client, msg: &Message) -> Result<()> {
    tracing::info!(mechanisms = msg.param(1).unwrap_or_default(), "server SASL mechanisms");
    Ok(())
}
