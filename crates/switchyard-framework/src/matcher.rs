//! Match specifications for registered handlers.
//!
//! A [`HandlerSpec`] decides whether a handler is interested in an
//! [`Update`]. It combines three things:
//!
//! - a [`HandlerKind`], naming the field of the update that is inspected
//! - a [`MatchRule`], saying how that field is compared
//! - an optional user restriction
//!
//! ```rust,ignore
//! use switchyard_framework::{HandlerKind, HandlerSpec};
//!
//! let start = HandlerSpec::exact(HandlerKind::MessageText, "/start");
//! let pages = HandlerSpec::prefix(HandlerKind::CallbackData, "page:");
//! let digits = HandlerSpec::regexp(HandlerKind::MessageText, r"\d+")?;
//! let admin_only = HandlerSpec::prefix(HandlerKind::MessageText, "/ban").for_user(UserId(1));
//! ```
//!
//! # Missing fields
//!
//! An update that does not carry the inspected field never matches: a
//! callback interaction does not match a `MessageText` spec, and a message
//! without text (a photo, a sticker) does not match one either. Missing data
//! is not treated as an empty string.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use switchyard_core::{Update, UserId};

use crate::error::RegistryResult;

/// A type-erased match predicate.
pub type PredicateFn = Arc<dyn Fn(&Update) -> bool + Send + Sync>;

/// Which field of an update a spec inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// The text of a message update.
    MessageText,
    /// The data payload of a callback update.
    CallbackData,
}

impl HandlerKind {
    /// Extracts the inspected field, or `None` when the update lacks it.
    pub fn extract(self, update: &Update) -> Option<&str> {
        match self {
            Self::MessageText => update.text(),
            Self::CallbackData => update.callback_data(),
        }
    }
}

/// How the extracted field is compared.
#[derive(Clone)]
pub enum MatchRule {
    /// Field equals the pattern (case-sensitive).
    Exact(String),
    /// Field starts with the pattern.
    Prefix(String),
    /// Field contains the pattern. An empty pattern matches any field.
    Contains(String),
    /// The regexp matches anywhere in the field.
    Regexp(Regex),
    /// The predicate alone decides; kind and user restriction are ignored.
    Predicate(PredicateFn),
}

impl MatchRule {
    /// Short name used in log fields.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::Prefix(_) => "prefix",
            Self::Contains(_) => "contains",
            Self::Regexp(_) => "regexp",
            Self::Predicate(_) => "predicate",
        }
    }

    fn test(&self, data: &str) -> bool {
        match self {
            Self::Exact(pattern) => data == pattern,
            Self::Prefix(pattern) => data.starts_with(pattern.as_str()),
            Self::Contains(pattern) => data.contains(pattern.as_str()),
            Self::Regexp(re) => re.is_match(data),
            Self::Predicate(_) => false,
        }
    }
}

impl fmt::Debug for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(p) => f.debug_tuple("Exact").field(p).finish(),
            Self::Prefix(p) => f.debug_tuple("Prefix").field(p).finish(),
            Self::Contains(p) => f.debug_tuple("Contains").field(p).finish(),
            Self::Regexp(re) => f.debug_tuple("Regexp").field(&re.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// The rule deciding whether a handler fires for an update.
#[derive(Debug, Clone)]
pub struct HandlerSpec {
    kind: HandlerKind,
    rule: MatchRule,
    restrict_user: Option<UserId>,
}

impl HandlerSpec {
    /// Creates a spec from its parts.
    pub fn new(kind: HandlerKind, rule: MatchRule) -> Self {
        Self {
            kind,
            rule,
            restrict_user: None,
        }
    }

    /// Matches when the field equals `pattern`.
    pub fn exact(kind: HandlerKind, pattern: impl Into<String>) -> Self {
        Self::new(kind, MatchRule::Exact(pattern.into()))
    }

    /// Matches when the field starts with `pattern`.
    pub fn prefix(kind: HandlerKind, pattern: impl Into<String>) -> Self {
        Self::new(kind, MatchRule::Prefix(pattern.into()))
    }

    /// Matches when the field contains `pattern`.
    pub fn contains(kind: HandlerKind, pattern: impl Into<String>) -> Self {
        Self::new(kind, MatchRule::Contains(pattern.into()))
    }

    /// Compiles `pattern` and matches when it is found anywhere in the field.
    ///
    /// Fails with [`RegistryError::InvalidSpec`](crate::RegistryError::InvalidSpec)
    /// if the pattern does not compile.
    pub fn regexp(kind: HandlerKind, pattern: &str) -> RegistryResult<Self> {
        Ok(Self::regex(kind, Regex::new(pattern)?))
    }

    /// Same as [`regexp`](Self::regexp) with an already compiled pattern.
    pub fn regex(kind: HandlerKind, re: Regex) -> Self {
        Self::new(kind, MatchRule::Regexp(re))
    }

    /// Matches when `predicate` returns `true`.
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Update) -> bool + Send + Sync + 'static,
    {
        // Kind is never consulted for predicate rules.
        Self::new(HandlerKind::MessageText, MatchRule::Predicate(Arc::new(predicate)))
    }

    /// Additionally requires the update to originate from `user`.
    ///
    /// `UserId(0)` means "no restriction". Predicate specs ignore the
    /// restriction.
    pub fn for_user(mut self, user: UserId) -> Self {
        self.restrict_user = (user.get() != 0).then_some(user);
        self
    }

    /// The inspected field.
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// The comparison rule.
    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    /// The user this spec is restricted to, if any.
    pub fn restrict_user(&self) -> Option<UserId> {
        self.restrict_user
    }

    /// Evaluates this spec against `update`. Pure and reentrant.
    pub fn matches(&self, update: &Update) -> bool {
        if let MatchRule::Predicate(predicate) = &self.rule {
            return predicate(update);
        }

        if let Some(user) = self.restrict_user
            && update.user_id() != Some(user)
        {
            return false;
        }

        match self.kind.extract(update) {
            Some(data) => self.rule.test(data),
            None => false,
        }
    }
}
