//! Inbound message routing rules.

use crate::channel::IncomingMessage;
use regex::Regex;

/// A predicate over inbound messages with a priority. The router picks
/// the highest-priority matching rule.
pub trait RoutingRule: Send + Sync {
    fn matches(&self, msg: &IncomingMessage) -> bool;
    fn priority(&self) -> i32;
    fn name(&self) -> &str;
}

/// Matches messages whose text starts with a fixed prefix.
pub struct PrefixRule {
    prefix: String,
    priority: i32,
    name: String,
}

impl PrefixRule {
    pub fn new(prefix: impl Into<String>, priority: i32) -> Self {
        let prefix = prefix.into();
        let name = format!("prefix:{prefix}");
        PrefixRule { prefix, priority, name }
    }
}

impl RoutingRule for PrefixRule {
    fn matches(&self, msg: &IncomingMessage) -> bool {
        msg.text.starts_with(&self.prefix)
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Matches messages whose text matches a regular expression.
pub struct RegexRule {
    pattern: Regex,
    priority: i32,
    name: String,
}

impl RegexRule {
    pub fn new(pattern: &str, priority: i32) -> Result<Self, regex::Error> {
        let compiled = Regex::new(pattern)?;
        Ok(RegexRule {
            name: format!("regex:{pattern}"),
            pattern: compiled,
            priority,
        })
    }
}

impl RoutingRule for RegexRule {
    fn matches(&self, msg: &IncomingMessage) -> bool {
        self.pattern.is_match(&msg.text)
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Matches messages arriving on a specific channel.
pub struct ChannelRule {
    channel: String,
    priority: i32,
    name: String,
}

impl ChannelRule {
    pub fn new(channel: impl Into<String>, priority: i32) -> Self {
        let channel = channel.into();
        let name = format!("channel:{channel}");
        ChannelRule { channel, priority, name }
    }
}

impl RoutingRule for ChannelRule {
    fn matches(&self, msg: &IncomingMessage) -> bool {
        msg.channel == self.channel
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered rule set.
#[derive(Default)]
pub struct Router {
    rules: Vec<Box<dyn RoutingRule>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Box<dyn RoutingRule>) {
        self.rules.push(rule);
        self.rules.sort_by_key(|r| std::cmp::Reverse(r.priority()));
    }

    /// The highest-priority rule matching `msg`, if any.
    pub fn route(&self, msg: &IncomingMessage) -> Option<&dyn RoutingRule> {
        self.rules.iter().find(|r| r.matches(msg)).map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
