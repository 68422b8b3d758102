//! Per-connection state: negotiated capabilities, ISUPPORT, own identity,
//! and the channel and user rosters.
//!
//! Channels are owned by the session and keyed by their case-folded name.
//! A [`User`] only records the keys of the channels it is in; every lookup
//! goes back through the session, so a removed channel is simply "not
//! present" to anyone still holding its name.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::isupport::Isupport;

/// Where the handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Disconnected,
    HandshakeStarted,
    CapabilityNegotiating,
    TransportUpgrading,
    Authenticating,
    Registered,
}

#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Advertised by the server in `CAP LS`, with optional values.
    pub available: HashMap<String, Option<String>>,
    /// Sent in `CAP REQ` and not yet answered.
    pub requested: BTreeSet<String>,
    /// Acknowledged by the server.
    pub enabled: BTreeSet<String>,
}

impl Capabilities {
    pub fn is_enabled(&self, cap: &str) -> bool {
        self.enabled.contains(cap)
    }
}

/// Round-trip measurement from keepalive pings.
#[derive(Debug, Clone, Default)]
pub struct Lag {
    pub last_token: Option<String>,
    pub sent_at: Option<Instant>,
    pub rtt: Option<Duration>,
}

/// How a departed user is being watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStrategy {
    /// `MONITOR +nick`; the server pushes 731 when they are gone.
    Monitor,
    /// Periodic `ISON nick` polls.
    Ison,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    /// Channel mode letters (e.g. `o`, `v`) held in this channel.
    pub modes: Vec<char>,
}

impl Membership {
    pub fn add_mode(&mut self, mode: char) {
        if !self.modes.contains(&mode) {
            self.modes.push(mode);
        }
    }

    pub fn remove_mode(&mut self, mode: char) {
        self.modes.retain(|m| *m != mode);
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    /// Folded nick -> membership.
    pub members: HashMap<String, Membership>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct User {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
    pub realname: Option<String>,
    pub account: Option<String>,
    pub away: bool,
    pub away_message: Option<String>,
    /// Folded names of the channels this user is in. Resolve through
    /// [`Session::channel`]; never a strong reference.
    pub channels: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct Session {
    pub state: RegistrationState,
    pub caps: Capabilities,
    pub isupport: Isupport,

    /// Our current nick (the server may have changed it).
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
    pub account: Option<String>,

    /// `CAP LS` (or registration) has been sent.
    pub handshake: bool,
    /// `CAP END` has been sent.
    pub cap_ended: bool,
    /// NICK/USER have been sent.
    pub identity_sent: bool,
    /// 001 has been received.
    pub registered: bool,
    /// SASL completed successfully.
    pub identified: bool,
    /// STARTTLS has been requested or performed.
    pub upgrade_attempted: bool,
    /// `AUTHENTICATE` has been started this session.
    pub sasl_attempted: bool,

    pub lag: Lag,
    pub nick_tries: u32,

    join_seq: u64,
    channels: HashMap<String, Channel>,
    users: HashMap<String, User>,
    pending_presence: HashMap<String, PresenceStrategy>,
    /// Nicks in each outstanding ISON query, oldest first.
    ison_queries: VecDeque<Vec<String>>,
}

impl Session {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            ..Self::default()
        }
    }

    pub fn fold(&self, name: &str) -> String {
        self.isupport.casemapping().fold(name)
    }

    pub fn is_self(&self, nick: &str) -> bool {
        self.fold(nick) == self.fold(&self.nick)
    }

    pub fn next_join_seq(&mut self) -> u64 {
        self.join_seq += 1;
        self.join_seq
    }

    // ── channels ──

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&self.fold(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn member(&self, channel: &str, nick: &str) -> Option<&Membership> {
        self.channel(channel)?.members.get(&self.fold(nick))
    }

    pub fn member_mut(&mut self, channel: &str, nick: &str) -> Option<&mut Membership> {
        let (chan, nick) = (self.fold(channel), self.fold(nick));
        self.channels.get_mut(&chan)?.members.get_mut(&nick)
    }

    /// Channels `nick` is in, resolved through the roster.
    pub fn user_channels(&self, nick: &str) -> Vec<&Channel> {
        self.user(nick)
            .map(|u| {
                u.channels
                    .iter()
                    .filter_map(|key| self.channels.get(key))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop a channel and every membership in it. Returns the nicks that
    /// no longer share any channel with us.
    pub fn remove_channel(&mut self, name: &str) -> Vec<String> {
        let key = self.fold(name);
        let Some(channel) = self.channels.remove(&key) else {
            return Vec::new();
        };
        let mut orphaned = Vec::new();
        for member in channel.members.keys() {
            if let Some(user) = self.users.get_mut(member) {
                user.channels.remove(&key);
                if user.channels.is_empty() {
                    orphaned.push(user.nick.clone());
                }
            }
        }
        orphaned
    }

    // ── users ──

    pub fn user(&self, nick: &str) -> Option<&User> {
        self.users.get(&self.fold(nick))
    }

    pub fn user_mut(&mut self, nick: &str) -> Option<&mut User> {
        let key = self.fold(nick);
        self.users.get_mut(&key)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Get or create the record for `nick`.
    pub fn ensure_user(&mut self, nick: &str) -> &mut User {
        let key = self.fold(nick);
        self.users.entry(key).or_insert_with(|| User {
            nick: nick.to_string(),
            ..User::default()
        })
    }

    /// Record `nick` as a member of `channel`, creating either as needed.
    pub fn attach(&mut self, channel: &str, nick: &str) -> &mut Membership {
        let (chan_key, nick_key) = (self.fold(channel), self.fold(nick));
        self.ensure_user(nick).channels.insert(chan_key.clone());
        self.channels
            .entry(chan_key)
            .or_insert_with(|| Channel::new(channel))
            .members
            .entry(nick_key)
            .or_default()
    }

    /// Remove one membership. Returns how many channels the user is still
    /// in, or `None` if they were not a member.
    pub fn detach(&mut self, channel: &str, nick: &str) -> Option<usize> {
        let (chan_key, nick_key) = (self.fold(channel), self.fold(nick));
        self.channels
            .get_mut(&chan_key)?
            .members
            .remove(&nick_key)?;
        let user = self.users.get_mut(&nick_key)?;
        user.channels.remove(&chan_key);
        Some(user.channels.len())
    }

    /// Delete a user everywhere, including any presence watch.
    pub fn remove_user(&mut self, nick: &str) -> Option<User> {
        let key = self.fold(nick);
        let user = self.users.remove(&key)?;
        for chan in &user.channels {
            if let Some(channel) = self.channels.get_mut(chan) {
                channel.members.remove(&key);
            }
        }
        self.pending_presence.remove(&key);
        Some(user)
    }

    /// Apply a NICK change to the rosters (and to ourselves).
    pub fn rename_user(&mut self, old: &str, new: &str) {
        if self.is_self(old) {
            self.nick = new.to_string();
        }
        let (old_key, new_key) = (self.fold(old), self.fold(new));
        let Some(mut user) = self.users.remove(&old_key) else {
            return;
        };
        user.nick = new.to_string();
        for chan in &user.channels {
            if let Some(channel) = self.channels.get_mut(chan) {
                if let Some(membership) = channel.members.remove(&old_key) {
                    channel.members.insert(new_key.clone(), membership);
                }
            }
        }
        if let Some(strategy) = self.pending_presence.remove(&old_key) {
            self.pending_presence.insert(new_key.clone(), strategy);
        }
        self.users.insert(new_key, user);
    }

    // ── presence watch ──

    pub fn is_pending(&self, nick: &str) -> bool {
        self.pending_presence.contains_key(&self.fold(nick))
    }

    pub fn pending_strategy(&self, nick: &str) -> Option<PresenceStrategy> {
        self.pending_presence.get(&self.fold(nick)).copied()
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending_presence
            .keys()
            .filter_map(|k| self.users.get(k))
            .map(|u| u.nick.as_str())
    }

    pub(crate) fn set_pending(&mut self, nick: &str, strategy: PresenceStrategy) {
        let key = self.fold(nick);
        self.pending_presence.insert(key, strategy);
    }

    pub(crate) fn clear_pending(&mut self, nick: &str) -> Option<PresenceStrategy> {
        let key = self.fold(nick);
        self.pending_presence.remove(&key)
    }

    pub(crate) fn push_ison_query(&mut self, nicks: Vec<String>) {
        self.ison_queries.push_back(nicks);
    }

    pub(crate) fn pop_ison_query(&mut self) -> Option<Vec<String>> {
        self.ison_queries.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        Session::new("me")
    }

    #[test]
    fn attach_and_detach_count_remaining_channels() {
        let mut s = session();
        s.attach("#a", "Wings");
        s.attach("#B", "wings").add_mode('o');

        assert_eq!(s.user_channels("WINGS").len(), 2);
        assert_eq!(s.member("#b", "Wings").unwrap().modes, vec!['o']);
        assert_eq!(s.detach("#a", "wings"), Some(1));
        assert_eq!(s.detach("#a", "wings"), None);
        assert_eq!(s.detach("#b", "wings"), Some(0));
        assert!(s.user("wings").is_some());
    }

    #[test]
    fn removed_channel_is_not_reachable_from_users() {
        let mut s = session();
        s.attach("#a", "alice");
        s.attach("#a", "bob");
        s.attach("#b", "bob");

        let orphaned = s.remove_channel("#A");
        assert_eq!(orphaned, vec!["alice".to_string()]);
        assert!(s.channel("#a").is_none());
        assert!(s.user_channels("alice").is_empty());
        let bob: Vec<_> = s.user_channels("bob").iter().map(|c| c.name.clone()).collect();
        assert_eq!(bob, vec!["#b"]);
    }

    #[test]
    fn rfc1459_folding_matches_equivalent_nicks() {
        let mut s = session();
        s.attach("#a", "Nick[away]");
        assert!(s.user("nick{AWAY}").is_some());
        assert!(s.member("#A", "NICK{away}").is_some());
    }

    #[test]
    fn rename_moves_memberships_and_own_nick() {
        let mut s = session();
        s.attach("#a", "me");
        s.attach("#a", "old").add_mode('v');
        s.set_pending("old", PresenceStrategy::Ison);

        s.rename_user("old", "new");
        s.rename_user("ME", "me2");

        assert_eq!(s.nick, "me2");
        assert!(s.user("old").is_none());
        assert_eq!(s.member("#a", "new").unwrap().modes, vec!['v']);
        assert!(s.is_pending("new"));
        assert!(s.member("#a", "me2").is_some());
    }

    #[test]
    fn remove_user_clears_watch_and_memberships() {
        let mut s = session();
        s.attach("#a", "gone");
        s.set_pending("gone", PresenceStrategy::Monitor);
        let user = s.remove_user("GONE").unwrap();
        assert_eq!(user.nick, "gone");
        assert!(!s.is_pending("gone"));
        assert!(s.channel("#a").unwrap().members.is_empty());
    }

    #[test]
    fn join_sequence_is_per_session() {
        let mut s = session();
        assert_eq!(s.next_join_seq(), 1);
        assert_eq!(s.next_join_seq(), 2);
        assert_eq!(session().next_join_seq(), 1);
    }
}
