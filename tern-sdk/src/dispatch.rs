//! Priority-ordered hook registry for inbound, outbound and CTCP messages.
//!
//! Hooks for a command run in non-decreasing [`Priority`] order; hooks with
//! equal priority run in registration order. Wildcard hooks (registered with
//! no command) are merged into every command's list under the same rule.
//!
//! The registry is generic over the context handed to hooks. The client
//! stores a `Registry<Client>` inside itself, so it takes a snapshot of the
//! hook list (cheap `Arc` clones) before invoking anything; hooks can then
//! freely borrow the client mutably, send messages, or arm timers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::irc::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    /// Runs before everything else.
    pub const FIRST: Priority = Priority(i32::MIN);
    pub const DEFAULT: Priority = Priority(0);
    pub const LAST: Priority = Priority(i32::MAX);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

/// What an outbound hook wants done with the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Cancel,
}

/// A CTCP payload: `\x01TAG args\x01` inside a PRIVMSG (request) or
/// NOTICE (reply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ctcp {
    pub tag: String,
    pub args: Option<String>,
    pub is_reply: bool,
}

impl Ctcp {
    pub fn from_message(msg: &Message) -> Option<Ctcp> {
        let is_reply = match msg.command.as_str() {
            "PRIVMSG" => false,
            "NOTICE" => true,
            _ => return None,
        };
        if msg.params.len() < 2 {
            return None;
        }
        let body = msg.trailing()?.strip_prefix('\x01')?;
        let body = body.strip_suffix('\x01').unwrap_or(body);
        let (tag, args) = match body.split_once(' ') {
            Some((tag, args)) => (tag, Some(args.to_string())),
            None => (body, None),
        };
        if tag.is_empty() {
            return None;
        }
        Some(Ctcp {
            tag: tag.to_ascii_uppercase(),
            args,
            is_reply,
        })
    }

    /// Encode as the trailing parameter of a PRIVMSG/NOTICE.
    pub fn encode(tag: &str, args: Option<&str>) -> String {
        match args {
            Some(args) => format!("\x01{tag} {args}\x01"),
            None => format!("\x01{tag}\x01"),
        }
    }
}

pub type InboundFn<C> = Arc<dyn Fn(&mut C, &Message) -> anyhow::Result<()> + Send + Sync>;
pub type OutboundFn<C> = Arc<dyn Fn(&mut C, &Message) -> Flow + Send + Sync>;
pub type CtcpFn<C> = Arc<dyn Fn(&mut C, &Message, &Ctcp) -> anyhow::Result<()> + Send + Sync>;

/// A `(command-or-wildcard, priority, callback)` triple.
pub struct Hook<F> {
    /// `None` runs for every command (or every CTCP tag).
    pub command: Option<String>,
    pub priority: Priority,
    pub callback: F,
}

pub type InboundHook<C> = Hook<InboundFn<C>>;
pub type OutboundHook<C> = Hook<OutboundFn<C>>;
pub type CtcpHook<C> = Hook<CtcpFn<C>>;

fn key(command: Option<&str>) -> Option<String> {
    command.map(str::to_ascii_uppercase)
}

impl<C> Hook<InboundFn<C>> {
    pub fn inbound<F>(command: Option<&str>, priority: Priority, callback: F) -> Self
    where
        F: Fn(&mut C, &Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Hook {
            command: key(command),
            priority,
            callback: Arc::new(callback),
        }
    }
}

impl<C> Hook<OutboundFn<C>> {
    pub fn outbound<F>(command: Option<&str>, priority: Priority, callback: F) -> Self
    where
        F: Fn(&mut C, &Message) -> Flow + Send + Sync + 'static,
    {
        Hook {
            command: key(command),
            priority,
            callback: Arc::new(callback),
        }
    }
}

impl<C> Hook<CtcpFn<C>> {
    pub fn ctcp<F>(tag: Option<&str>, priority: Priority, callback: F) -> Self
    where
        F: Fn(&mut C, &Message, &Ctcp) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Hook {
            command: key(tag),
            priority,
            callback: Arc::new(callback),
        }
    }
}

/// A bundle of hooks merged into a registry at startup.
pub trait HandlerModule<C>: Send + Sync {
    fn name(&self) -> &str;

    fn inbound(&self) -> Vec<InboundHook<C>> {
        Vec::new()
    }

    fn outbound(&self) -> Vec<OutboundHook<C>> {
        Vec::new()
    }

    fn ctcp(&self) -> Vec<CtcpHook<C>> {
        Vec::new()
    }

    fn register_into(&self, registry: &mut Registry<C>) {
        for hook in self.inbound() {
            registry.add_inbound(hook);
        }
        for hook in self.outbound() {
            registry.add_outbound(hook);
        }
        for hook in self.ctcp() {
            registry.add_ctcp(hook);
        }
        tracing::trace!(module = self.name(), "handler module registered");
    }
}

struct Slot<F> {
    priority: Priority,
    seq: u64,
    callback: F,
}

/// One table: command (or `None` wildcard) → hooks sorted by (priority, seq).
struct Table<F> {
    by_command: HashMap<Option<String>, Vec<Slot<F>>>,
}

impl<F> Default for Table<F> {
    fn default() -> Self {
        Self {
            by_command: HashMap::new(),
        }
    }
}

impl<F: Clone> Table<F> {
    fn insert(&mut self, command: Option<String>, priority: Priority, seq: u64, callback: F) {
        let list = self.by_command.entry(command).or_default();
        let pos = list.partition_point(|s| s.priority <= priority);
        list.insert(
            pos,
            Slot {
                priority,
                seq,
                callback,
            },
        );
    }

    /// Wildcard and command-specific hooks merged by (priority, seq).
    fn snapshot(&self, command: &str) -> Vec<F> {
        let empty = Vec::new();
        let wildcard = self.by_command.get(&None).unwrap_or(&empty);
        let specific = self
            .by_command
            .get(&Some(command.to_ascii_uppercase()))
            .unwrap_or(&empty);

        let mut out = Vec::with_capacity(wildcard.len() + specific.len());
        let (mut w, mut s) = (wildcard.iter().peekable(), specific.iter().peekable());
        loop {
            let take_wildcard = match (w.peek(), s.peek()) {
                (Some(a), Some(b)) => (a.priority, a.seq) <= (b.priority, b.seq),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let slot = if take_wildcard { w.next() } else { s.next() };
            if let Some(slot) = slot {
                out.push(slot.callback.clone());
            }
        }
        out
    }

    fn len(&self) -> usize {
        self.by_command.values().map(Vec::len).sum()
    }
}

pub struct Registry<C> {
    inbound: Table<InboundFn<C>>,
    outbound: Table<OutboundFn<C>>,
    ctcp: Table<CtcpFn<C>>,
    seq: u64,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self {
            inbound: Table::default(),
            outbound: Table::default(),
            ctcp: Table::default(),
            seq: 0,
        }
    }
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .field("ctcp", &self.ctcp.len())
            .finish()
    }
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn register_inbound<F>(&mut self, command: Option<&str>, priority: Priority, callback: F)
    where
        F: Fn(&mut C, &Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_inbound(Hook::inbound(command, priority, callback));
    }

    pub fn register_outbound<F>(&mut self, command: Option<&str>, priority: Priority, callback: F)
    where
        F: Fn(&mut C, &Message) -> Flow + Send + Sync + 'static,
    {
        self.add_outbound(Hook::outbound(command, priority, callback));
    }

    pub fn register_ctcp<F>(&mut self, tag: Option<&str>, priority: Priority, callback: F)
    where
        F: Fn(&mut C, &Message, &Ctcp) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_ctcp(Hook::ctcp(tag, priority, callback));
    }

    pub fn add_inbound(&mut self, hook: InboundHook<C>) {
        let seq = self.next_seq();
        self.inbound.insert(hook.command, hook.priority, seq, hook.callback);
    }

    pub fn add_outbound(&mut self, hook: OutboundHook<C>) {
        let seq = self.next_seq();
        self.outbound.insert(hook.command, hook.priority, seq, hook.callback);
    }

    pub fn add_ctcp(&mut self, hook: CtcpHook<C>) {
        let seq = self.next_seq();
        self.ctcp.insert(hook.command, hook.priority, seq, hook.callback);
    }

    pub fn add_module(&mut self, module: &dyn HandlerModule<C>) {
        module.register_into(self);
    }

    pub fn inbound_hooks(&self, command: &str) -> Vec<InboundFn<C>> {
        self.inbound.snapshot(command)
    }

    pub fn outbound_hooks(&self, command: &str) -> Vec<OutboundFn<C>> {
        self.outbound.snapshot(command)
    }

    pub fn ctcp_hooks(&self, tag: &str) -> Vec<CtcpFn<C>> {
        self.ctcp.snapshot(tag)
    }

    /// Dispatch against a context that does not own this registry.
    pub fn dispatch_inbound(&self, ctx: &mut C, msg: &Message) -> anyhow::Result<()> {
        run_inbound(
            &self.inbound_hooks(&msg.command),
            |tag| self.ctcp_hooks(tag),
            ctx,
            msg,
        )
    }

    /// Returns `true` if any hook asked to cancel the message.
    pub fn dispatch_outbound(&self, ctx: &mut C, msg: &Message) -> bool {
        run_outbound(&self.outbound_hooks(&msg.command), ctx, msg)
    }
}

/// Run inbound hooks in order, then CTCP hooks if the message carries one.
/// The first hook error stops this message's dispatch and is returned.
pub fn run_inbound<C>(
    hooks: &[InboundFn<C>],
    ctcp_hooks: impl FnOnce(&str) -> Vec<CtcpFn<C>>,
    ctx: &mut C,
    msg: &Message,
) -> anyhow::Result<()> {
    for hook in hooks {
        hook(ctx, msg)?;
    }
    if let Some(ctcp) = Ctcp::from_message(msg) {
        for hook in ctcp_hooks(&ctcp.tag) {
            hook(ctx, msg, &ctcp)?;
        }
    }
    Ok(())
}

/// Every hook runs; the result is the OR of their cancel requests.
pub fn run_outbound<C>(hooks: &[OutboundFn<C>], ctx: &mut C, msg: &Message) -> bool {
    hooks
        .iter()
        .fold(false, |cancel, hook| (hook(ctx, msg) == Flow::Cancel) | cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    type Log = Vec<&'static str>;

    fn msg(line: &str) -> Message {
        Message::parse(line).unwrap()
    }

    #[test]
    fn first_runs_before_default_and_ties_keep_registration_order() {
        let mut reg: Registry<Log> = Registry::new();
        reg.register_inbound(Some("PRIVMSG"), Priority::DEFAULT, |log, _| {
            log.push("default-1");
            Ok(())
        });
        reg.register_inbound(Some("PRIVMSG"), Priority::FIRST, |log, _| {
            log.push("first");
            Ok(())
        });
        reg.register_inbound(Some("privmsg"), Priority::DEFAULT, |log, _| {
            log.push("default-2");
            Ok(())
        });

        let mut log = Log::new();
        reg.dispatch_inbound(&mut log, &msg(":a!b@c PRIVMSG #t :hi")).unwrap();
        assert_eq!(log, vec!["first", "default-1", "default-2"]);
    }

    #[test]
    fn wildcard_hooks_merge_by_priority() {
        let mut reg: Registry<Log> = Registry::new();
        reg.register_inbound(Some("JOIN"), Priority(10), |log, _| {
            log.push("join@10");
            Ok(())
        });
        reg.register_inbound(None, Priority(5), |log, _| {
            log.push("any@5");
            Ok(())
        });
        reg.register_inbound(None, Priority(10), |log, _| {
            log.push("any@10");
            Ok(())
        });

        let mut log = Log::new();
        reg.dispatch_inbound(&mut log, &msg("JOIN #t")).unwrap();
        assert_eq!(log, vec!["any@5", "join@10", "any@10"]);

        log.clear();
        reg.dispatch_inbound(&mut log, &msg("PART #t")).unwrap();
        assert_eq!(log, vec!["any@5", "any@10"]);
    }

    #[test]
    fn failing_hook_stops_only_its_own_message() {
        let mut reg: Registry<Log> = Registry::new();
        reg.register_inbound(Some("KICK"), Priority(1), |_, _| anyhow::bail!("broken"));
        reg.register_inbound(Some("KICK"), Priority(2), |log, _| {
            log.push("after-broken");
            Ok(())
        });
        reg.register_inbound(Some("JOIN"), Priority(1), |log, _| {
            log.push("join");
            Ok(())
        });

        let mut log = Log::new();
        assert!(reg.dispatch_inbound(&mut log, &msg("KICK #t n")).is_err());
        reg.dispatch_inbound(&mut log, &msg("JOIN #t")).unwrap();
        assert_eq!(log, vec!["join"]);
    }

    #[test]
    fn outbound_is_an_or_over_all_hooks() {
        let mut reg: Registry<Log> = Registry::new();
        reg.register_outbound(Some("PRIVMSG"), Priority::DEFAULT, |log, _| {
            log.push("veto");
            Flow::Cancel
        });
        reg.register_outbound(None, Priority::LAST, |log, _| {
            log.push("observer");
            Flow::Continue
        });

        let mut log = Log::new();
        assert!(reg.dispatch_outbound(&mut log, &msg("PRIVMSG #t :x")));
        assert_eq!(log, vec!["veto", "observer"]);
        assert!(!reg.dispatch_outbound(&mut log, &msg("NOTICE #t :x")));
    }

    #[test]
    fn ctcp_hooks_dispatch_by_tag() {
        let mut reg: Registry<Vec<String>> = Registry::new();
        reg.register_ctcp(Some("VERSION"), Priority::DEFAULT, |log, _, ctcp| {
            log.push(format!("version reply={}", ctcp.is_reply));
            Ok(())
        });
        reg.register_ctcp(None, Priority::DEFAULT, |log, _, ctcp| {
            log.push(format!("any {}", ctcp.tag));
            Ok(())
        });

        let mut log = Vec::new();
        reg.dispatch_inbound(&mut log, &msg(":a!b@c PRIVMSG me :\x01version\x01"))
            .unwrap();
        reg.dispatch_inbound(&mut log, &msg(":a!b@c NOTICE me :\x01PING 123\x01"))
            .unwrap();
        reg.dispatch_inbound(&mut log, &msg(":a!b@c PRIVMSG me :plain text"))
            .unwrap();
        assert_eq!(log, vec!["version reply=false", "any VERSION", "any PING"]);
    }

    #[test]
    fn ctcp_parse_and_encode() {
        let m = msg(":a!b@c PRIVMSG #t :\x01ACTION waves hello\x01");
        let ctcp = Ctcp::from_message(&m).unwrap();
        assert_eq!(ctcp.tag, "ACTION");
        assert_eq!(ctcp.args.as_deref(), Some("waves hello"));
        assert_eq!(Ctcp::encode("PING", Some("42")), "\x01PING 42\x01");
    }

    struct Greeter;

    impl HandlerModule<Log> for Greeter {
        fn name(&self) -> &str {
            "greeter"
        }

        fn inbound(&self) -> Vec<InboundHook<Log>> {
            vec![
                Hook::inbound(Some("JOIN"), Priority::DEFAULT, |log: &mut Log, _: &Message| {
                    log.push("hello");
                    Ok(())
                }),
                Hook::inbound(Some("JOIN"), Priority::FIRST, |log: &mut Log, _: &Message| {
                    log.push("hi");
                    Ok(())
                }),
            ]
        }
    }

    #[test]
    fn modules_register_in_declaration_order() {
        let mut reg: Registry<Log> = Registry::new();
        reg.add_module(&Greeter);
        let mut log = Log::new();
        reg.dispatch_inbound(&mut log, &msg("JOIN #t")).unwrap();
        assert_eq!(log, vec!["hi", "hello"]);
    }
}
