use crate::session::SessionId;
use indexmap::{IndexMap, IndexSet};
use regex::Regex;

/// Upper bound on accepted pattern length. The wire admits far longer text;
/// the clamp bounds what gets compiled and stored.
pub const MAX_PATTERN_LEN: usize = 512;

/// The one unsubscribe selector that is taken as a regular expression
/// instead of a literal: it detaches the caller from every stored pattern.
const MATCH_ALL_SELECTOR: &str = ".*";

#[derive(Debug, Eq, PartialEq)]
pub enum SubscribeError {
    AlreadySubscribed,
    PatternTooLong,
}

/// The unsubscribe selector failed to compile as a regular expression.
#[derive(Debug, Eq, PartialEq)]
pub struct SelectorError;

struct Entry {
    matcher: Regex,
    subscribers: Vec<SessionId>,
}

/// Pattern → subscriber index. Patterns keep their insertion order (fan-out
/// iterates it, which makes delivery order deterministic), entries are never
/// garbage collected, and disconnected sessions stay attached so a reconnect
/// restores their interest.
pub struct SubscriptionIndex {
    patterns: IndexMap<String, Entry>,
}

impl SubscriptionIndex {
    pub fn new() -> SubscriptionIndex {
        SubscriptionIndex {
            patterns: IndexMap::new(),
        }
    }

    /// Attaches a session to a pattern. The wildcard matcher is compiled once,
    /// on first sight of the pattern.
    pub fn subscribe(&mut self, session: SessionId, pattern: &str) -> Result<(), SubscribeError> {
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(SubscribeError::PatternTooLong);
        }

        if let Some(entry) = self.patterns.get_mut(pattern) {
            if entry.subscribers.contains(&session) {
                return Err(SubscribeError::AlreadySubscribed);
            }

            entry.subscribers.push(session);
            return Ok(());
        }

        self.patterns.insert(
            pattern.to_owned(),
            Entry {
                matcher: compile_pattern(pattern),
                subscribers: vec![session],
            },
        );

        Ok(())
    }

    /// Detaches a session from every stored pattern the selector matches.
    /// `*` and `+` in the selector are escaped, so the selector addresses
    /// patterns containing those characters literally; the reserved selector
    /// `.*` matches everything. Returns the number of patterns the session
    /// was removed from. Emptied patterns are retained.
    pub fn unsubscribe(&mut self, session: SessionId, selector: &str) -> Result<usize, SelectorError> {
        let selector = compile_selector(selector)?;
        let mut removed = 0;

        for (pattern, entry) in self.patterns.iter_mut() {
            if !selector.is_match(pattern) {
                continue;
            }

            if let Some(position) = entry.subscribers.iter().position(|&s| s == session) {
                entry.subscribers.remove(position);
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Ordered union of the subscriber lists of every pattern matching the
    /// concrete topic. Duplicates are suppressed; the first-seen position
    /// wins.
    pub fn match_topic(&self, topic: &str) -> Vec<SessionId> {
        let mut matched = IndexSet::new();

        for entry in self.patterns.values() {
            if entry.matcher.is_match(topic) {
                for &session in &entry.subscribers {
                    matched.insert(session);
                }
            }
        }

        matched.into_iter().collect()
    }

    /// Subscriber list stored under the exact pattern text, if any.
    pub fn subscribers(&self, pattern: &str) -> Option<&[SessionId]> {
        self.patterns.get(pattern).map(|entry| entry.subscribers.as_slice())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}

/// Expands subscription wildcards into an anchored regex: `*` matches any
/// sequence including path separators, `+` any sequence without them, and
/// every other character matches itself.
fn compile_pattern(pattern: &str) -> Regex {
    let mut expanded = String::with_capacity(pattern.len() + 8);
    let mut utf8 = [0u8; 4];

    expanded.push_str("^(?:");
    for ch in pattern.chars() {
        match ch {
            '*' => expanded.push_str(".*"),
            '+' => expanded.push_str("[^/]*"),
            ch => expanded.push_str(&regex::escape(ch.encode_utf8(&mut utf8))),
        }
    }
    expanded.push_str(")$");

    Regex::new(&expanded).expect("escaped wildcard expansion must compile")
}

/// Builds the unsubscribe selector. Apart from the reserved `.*`, wildcard
/// characters are escaped and the rest of the text reaches the regex engine
/// as typed, so a selector that does not compile simply matches nothing.
fn compile_selector(selector: &str) -> Result<Regex, SelectorError> {
    let source = if selector == MATCH_ALL_SELECTOR {
        String::from(MATCH_ALL_SELECTOR)
    } else {
        selector.replace('*', "\\*").replace('+', "\\+")
    };

    Regex::new(&format!("^(?:{})$", source)).map_err(|_| SelectorError)
}
