//! Account and away tracking (account-notify, away-notify, 900/901).

use anyhow::Result;

use crate::client::Client;
use crate::dispatch::{Hook, InboundHook, Priority};
use crate::irc::{Message, numeric};

pub(super) fn hooks() -> Vec<InboundHook<Client>> {
    vec![
        Hook::inbound(Some("ACCOUNT"), Priority::DEFAULT, handle_account),
        Hook::inbound(Some("AWAY"), Priority::DEFAULT, handle_away),
        Hook::inbound(Some(numeric::RPL_LOGGEDIN), Priority::DEFAULT, handle_logged_in),
        Hook::inbound(Some(numeric::RPL_LOGGEDOUT), Priority::DEFAULT, handle_logged_out),
    ]
}

fn handle_account(client: &mut Client, msg: &Message) -> Result<()> {
    let (Some(nick), Some(account)) = (msg.source_nick(), msg.param(0)) else {
        return Ok(());
    };
    let account = (account != "*").then(|| account.to_string());
    if client.session().is_self(nick) {
        client.session_mut().account.clone_from(&account);
    }
    if let Some(user) = client.session_mut().user_mut(nick) {
        user.account = account;
    }
    Ok(())
}

fn handle_away(client: &mut Client, msg: &Message) -> Result<()> {
    let Some(nick) = msg.source_nick() else {
        return Ok(());
    };
    let message = msg.param(0).filter(|m| !m.is_empty()).map(str::to_string);
    if let Some(user) = client.session_mut().user_mut(nick) {
        user.away = message.is_some();
        user.away_message = message;
    }
    Ok(())
}

/// `900 <nick> <nick!user@host> <account> :You are now logged in as ...`
fn handle_logged_in(client: &mut Client, msg: &Message) -> Result<()> {
    if let Some(account) = msg.param(2) {
        tracing::info!(%account, "logged in");
        client.session_mut().account = Some(account.to_string());
    }
    Ok(())
}

fn handle_logged_out(client: &mut Client, _msg: &Message) -> Result<()> {
    client.session_mut().account = None;
    Ok(())
}
