//! Feature-negotiation table (`RPL_ISUPPORT`, numeric 005).
//!
//! Starts from defaults that match old servers which never send 005, and is
//! updated token by token as the server announces features.

use std::collections::HashMap;

/// How the server compares nicknames and channel names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMapping {
    Ascii,
    #[default]
    Rfc1459,
    Rfc1459Strict,
}

impl CaseMapping {
    pub fn from_token(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ascii" => CaseMapping::Ascii,
            "strict-rfc1459" | "rfc1459-strict" => CaseMapping::Rfc1459Strict,
            _ => CaseMapping::Rfc1459,
        }
    }

    pub fn fold(self, s: &str) -> String {
        s.chars()
            .map(|c| match (self, c) {
                (CaseMapping::Rfc1459 | CaseMapping::Rfc1459Strict, '[') => '{',
                (CaseMapping::Rfc1459 | CaseMapping::Rfc1459Strict, ']') => '}',
                (CaseMapping::Rfc1459 | CaseMapping::Rfc1459Strict, '\\') => '|',
                (CaseMapping::Rfc1459, '~') => '^',
                _ => c.to_ascii_lowercase(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Isupport {
    tokens: HashMap<String, Option<String>>,
}

impl Default for Isupport {
    fn default() -> Self {
        let mut tokens = HashMap::new();
        tokens.insert("PREFIX".to_string(), Some("(ov)@+".to_string()));
        // Old servers tend to use all four.
        tokens.insert("CHANTYPES".to_string(), Some("#&!+".to_string()));
        tokens.insert("NICKLEN".to_string(), Some("8".to_string()));
        tokens.insert("CHANMODES".to_string(), Some("beI,k,l,imntsp".to_string()));
        tokens.insert("CASEMAPPING".to_string(), Some("rfc1459".to_string()));
        Self { tokens }
    }
}

impl Isupport {
    /// Apply the parameters of one 005 reply.
    ///
    /// The first parameter (our nick) and a trailing human-readable text
    /// are skipped.
    pub fn apply(&mut self, params: &[String]) {
        let Some((_, rest)) = params.split_first() else {
            return;
        };
        let tokens = match rest.split_last() {
            Some((last, init)) if last.contains(' ') => init,
            _ => rest,
        };
        for token in tokens {
            self.apply_token(token);
        }
    }

    pub fn apply_token(&mut self, token: &str) {
        if let Some(key) = token.strip_prefix('-') {
            self.tokens.remove(&key.to_ascii_uppercase());
            return;
        }
        match token.split_once('=') {
            Some((key, value)) => {
                self.tokens
                    .insert(key.to_ascii_uppercase(), Some(unescape(value)));
            }
            None if !token.is_empty() => {
                self.tokens.insert(token.to_ascii_uppercase(), None);
            }
            None => {}
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tokens.contains_key(&key.to_ascii_uppercase())
    }

    /// `None` if the key is absent, `Some(None)` if present without a value.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.tokens
            .get(&key.to_ascii_uppercase())
            .map(|v| v.as_deref())
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).flatten()
    }

    /// `(mode, symbol)` pairs, highest rank first, e.g. `[('o','@'), ('v','+')]`.
    pub fn prefix(&self) -> Vec<(char, char)> {
        let Some(value) = self.value("PREFIX") else {
            return Vec::new();
        };
        let Some((modes, symbols)) = value
            .strip_prefix('(')
            .and_then(|rest| rest.split_once(')'))
        else {
            return Vec::new();
        };
        modes.chars().zip(symbols.chars()).collect()
    }

    pub fn mode_for_symbol(&self, symbol: char) -> Option<char> {
        self.prefix()
            .into_iter()
            .find(|(_, s)| *s == symbol)
            .map(|(m, _)| m)
    }

    pub fn chantypes(&self) -> &str {
        self.value("CHANTYPES").unwrap_or("#")
    }

    pub fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .is_some_and(|c| self.chantypes().contains(c))
    }

    pub fn nicklen(&self) -> Option<usize> {
        self.value("NICKLEN").and_then(|v| v.parse().ok())
    }

    /// The four CHANMODES groups (list, always-arg, set-arg, no-arg).
    pub fn chanmodes(&self) -> Vec<String> {
        self.value("CHANMODES")
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn casemapping(&self) -> CaseMapping {
        self.value("CASEMAPPING")
            .map(CaseMapping::from_token)
            .unwrap_or_default()
    }

    pub fn supports_monitor(&self) -> bool {
        self.contains("MONITOR")
    }
}

/// Undo `\xHH` escapes in ISUPPORT values.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(idx) = rest.find("\\x") {
        out.push_str(&rest[..idx]);
        let hex = rest.get(idx + 2..idx + 4);
        match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
            Some(byte) => {
                out.push(char::from(byte));
                rest = &rest[idx + 4..];
            }
            None => {
                out.push_str("\\x");
                rest = &rest[idx + 2..];
            }
        }
    }
    out.push_str(rest);
    out
}
