//! IRC message type and numeric reply constants.
//!
//! Wire form (without the trailing `\r\n`):
//!
//! ```text
//! [@tags SPACE] [:sender SPACE] command [SPACE middle]* [SPACE :trailing]
//! ```
//!
//! Message tags are accepted on input and discarded; this engine never
//! requests `message-tags`.

use std::fmt;

/// Numeric replies the built-in handlers react to.
pub mod numeric {
    pub const RPL_WELCOME: &str = "001";
    pub const RPL_ISUPPORT: &str = "005";
    pub const RPL_ISON: &str = "303";
    pub const RPL_NAMREPLY: &str = "353";
    pub const RPL_ENDOFNAMES: &str = "366";
    pub const RPL_HOSTHIDDEN: &str = "396";
    pub const ERR_ERRONEUSNICKNAME: &str = "432";
    pub const ERR_NICKNAMEINUSE: &str = "433";
    pub const ERR_NICKCOLLISION: &str = "436";
    pub const RPL_STARTTLS: &str = "670";
    pub const ERR_STARTTLS: &str = "691";
    pub const RPL_MONONLINE: &str = "730";
    pub const RPL_MONOFFLINE: &str = "731";
    pub const RPL_LOGGEDIN: &str = "900";
    pub const RPL_LOGGEDOUT: &str = "901";
    pub const ERR_NICKLOCKED: &str = "902";
    pub const RPL_SASLSUCCESS: &str = "903";
    pub const ERR_SASLFAIL: &str = "904";
    pub const ERR_SASLTOOLONG: &str = "905";
    pub const ERR_SASLABORTED: &str = "906";
    pub const ERR_SASLALREADY: &str = "907";
    pub const RPL_SASLMECHS: &str = "908";
}

/// Origin of a message: `nick[!user][@host]`, or a bare server name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sender {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl Sender {
    pub fn parse(prefix: &str) -> Self {
        let (rest, host) = match prefix.split_once('@') {
            Some((rest, host)) => (rest, Some(host.to_owned())),
            None => (prefix, None),
        };
        let (nick, user) = match rest.split_once('!') {
            Some((nick, user)) => (nick, Some(user.to_owned())),
            None => (rest, None),
        };
        Sender {
            nick: nick.to_owned(),
            user,
            host,
        }
    }

    pub fn nick(nick: impl Into<String>) -> Self {
        Sender {
            nick: nick.into(),
            user: None,
            host: None,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nick)?;
        if let Some(ref user) = self.user {
            write!(f, "!{user}")?;
        }
        if let Some(ref host) = self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}

/// A parsed IRC message. Immutable by convention once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: Option<Sender>,
    /// The command (e.g. `PRIVMSG`, `001`).
    pub command: String,
    /// Parameters; only the last may contain spaces.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

impl Message {
    pub fn new<I, S>(command: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Message {
            sender: None,
            command: command.to_owned(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Parse a single line (a trailing `\r\n` is tolerated).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut rest = input.trim_end_matches(['\r', '\n']);

        if let Some(tagged) = rest.strip_prefix('@') {
            rest = match tagged.split_once(' ') {
                Some((_, after)) => after.trim_start_matches(' '),
                None => return Err(ParseError::MissingCommand),
            };
        }

        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        let sender = match rest.strip_prefix(':') {
            Some(prefixed) => match prefixed.split_once(' ') {
                Some((prefix, after)) => {
                    rest = after.trim_start_matches(' ');
                    Some(Sender::parse(prefix))
                }
                None => return Err(ParseError::MissingCommand),
            },
            None => None,
        };

        let (command, mut remaining) = match rest.split_once(' ') {
            Some((command, params)) => (command, params),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        while !remaining.is_empty() {
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_owned());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, after)) => {
                    if !param.is_empty() {
                        params.push(param.to_owned());
                    }
                    remaining = after;
                }
                None => {
                    params.push(remaining.to_owned());
                    break;
                }
            }
        }

        Ok(Message {
            sender,
            command: command.to_owned(),
            params,
        })
    }

    /// Serialize to wire form without `\r\n`.
    ///
    /// The last parameter gets a `:` only when it needs one: empty, contains
    /// a space, or itself starts with `:`.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(ref sender) = self.sender {
            out.push(':');
            out.push_str(&sender.to_string());
            out.push(' ');
        }
        out.push_str(&self.command);

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                out.push(' ');
                out.push_str(param);
            }
            out.push(' ');
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                out.push(':');
            }
            out.push_str(last);
        }
        out
    }

    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Nick of the sender, if any.
    pub fn source_nick(&self) -> Option<&str> {
        self.sender.as_ref().map(|s| s.nick.as_str())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_with_full_sender() {
        let msg = Message::parse(":wings!user@host PRIVMSG #tern :hey friends").unwrap();
        let sender = msg.sender.as_ref().unwrap();
        assert_eq!(sender.nick, "wings");
        assert_eq!(sender.user.as_deref(), Some("user"));
        assert_eq!(sender.host.as_deref(), Some("host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#tern", "hey friends"]);
    }

    #[test]
    fn parse_server_sender_has_no_user_or_host() {
        let msg = Message::parse(":irc.example.net 001 wings :Welcome").unwrap();
        assert_eq!(msg.sender, Some(Sender::nick("irc.example.net")));
        assert_eq!(msg.params, vec!["wings", "Welcome"]);
    }

    #[test]
    fn parse_drops_tags() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z :a!b@c JOIN #x").unwrap();
        assert_eq!(msg.command, "JOIN");
        assert_eq!(msg.params, vec!["#x"]);
    }

    #[test]
    fn parse_trailing_edge_cases() {
        assert_eq!(Message::parse("TOPIC #t :").unwrap().params, vec!["#t", ""]);
        assert_eq!(
            Message::parse("PRIVMSG #t ::)").unwrap().params,
            vec!["#t", ":)"]
        );
        assert_eq!(
            Message::parse("MODE #t +o  wings").unwrap().params,
            vec!["#t", "+o", "wings"]
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
        assert_eq!(Message::parse("\r\n"), Err(ParseError::Empty));
        assert_eq!(Message::parse(":prefix_only"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn encode_omits_colon_only_when_safe() {
        assert_eq!(Message::new("NICK", ["wings"]).to_wire(), "NICK wings");
        assert_eq!(
            Message::new("PRIVMSG", ["#t", "two words"]).to_wire(),
            "PRIVMSG #t :two words"
        );
        assert_eq!(Message::new("PRIVMSG", ["#t", ":)"]).to_wire(), "PRIVMSG #t ::)");
        assert_eq!(Message::new("TOPIC", ["#t", ""]).to_wire(), "TOPIC #t :");
        assert_eq!(Message::new("QUIT", Vec::<String>::new()).to_wire(), "QUIT");
    }

    #[test]
    fn decode_of_encode_is_identity() {
        let samples = [
            Message::new("PRIVMSG", ["#t", "hello world"])
                .with_sender(Sender::parse("n!u@h")),
            Message::new("JOIN", ["#a,#b", "key"]),
            Message::new("CAP", ["*", "LS", "*", "sasl multi-prefix"]),
            Message::new("PONG", [":colon"]),
            Message::new("AWAY", [""]).with_sender(Sender::parse("n@h")),
        ];
        for msg in samples {
            assert_eq!(Message::parse(&msg.to_wire()).unwrap(), msg);
        }
    }

    #[test]
    fn sender_display_roundtrip() {
        for raw in ["nick", "nick!user", "nick@host", "nick!user@host"] {
            assert_eq!(Sender::parse(raw).to_string(), raw);
        }
    }
}
