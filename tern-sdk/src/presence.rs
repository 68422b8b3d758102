//! Presence expiry: forget users once the server confirms they are gone.
//!
//! When someone's last shared channel membership goes away we cannot tell
//! whether they are still online. With `MONITOR` the server pushes a 731
//! when they leave; without it we poll with `ISON` on a repeating timer.
//! Seeing them join any channel again cancels the watch.

use std::time::Duration;

use crate::client::Client;
use crate::session::PresenceStrategy;

pub const ISON_INTERVAL: Duration = Duration::from_secs(60);

pub fn ison_timer_name(folded_nick: &str) -> String {
    format!("ison_user_{folded_nick}")
}

impl Client {
    /// Start watching `nick` for departure. No-op for ourselves or a nick
    /// already being watched.
    pub fn expire_user(&mut self, nick: &str) {
        if self.session().is_self(nick) || self.session().is_pending(nick) {
            return;
        }
        if self.session().user(nick).is_none() {
            return;
        }

        if self.session().isupport.supports_monitor() {
            tracing::debug!(%nick, "watching departed user via MONITOR");
            self.session_mut().set_pending(nick, PresenceStrategy::Monitor);
            self.send_command("MONITOR", ["+", nick]);
        } else {
            tracing::debug!(%nick, "watching departed user via ISON");
            self.session_mut().set_pending(nick, PresenceStrategy::Ison);
            self.send_ison(nick);
            let name = ison_timer_name(&self.session().fold(nick));
            let nick = nick.to_string();
            self.timers_mut()
                .schedule_repeating(name, ISON_INTERVAL, move |c: &mut Client| c.send_ison(&nick));
        }
    }

    /// Stop watching `nick`, whichever strategy was active. Returns whether
    /// a watch existed. The user record is kept.
    pub fn unexpire_user(&mut self, nick: &str) -> bool {
        match self.session_mut().clear_pending(nick) {
            Some(PresenceStrategy::Monitor) => {
                self.send_command("MONITOR", ["-", nick]);
                true
            }
            Some(PresenceStrategy::Ison) => {
                let name = ison_timer_name(&self.session().fold(nick));
                self.timers_mut().cancel(&name);
                true
            }
            None => false,
        }
    }

    /// The server says `nick` is gone: drop the watch and the user record.
    pub fn confirm_departed(&mut self, nick: &str) {
        if !self.unexpire_user(nick) {
            return;
        }
        tracing::debug!(%nick, "user confirmed gone");
        self.session_mut().remove_user(nick);
    }

    pub(crate) fn send_ison(&mut self, nick: &str) {
        if self.send_command("ISON", [nick]) {
            self.session_mut().push_ison_query(vec![nick.to_string()]);
        }
    }

    /// Forget a user who quit, cleaning up any watch first.
    pub(crate) fn forget_user(&mut self, nick: &str) {
        self.unexpire_user(nick);
        self.session_mut().remove_user(nick);
    }
}
