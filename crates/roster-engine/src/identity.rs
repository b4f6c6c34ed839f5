//! Display label resolution for channel members.
//!
//! A member's label is the first non-empty of:
//! 1. display-name override
//! 2. nickname override
//! 3. account handle with any `#discriminator` suffix stripped
//!
//! Resolution is total: when nothing else is usable the raw handle is
//! returned, even if it is empty.

use std::fmt;

/// Separator between an account handle and its discriminator.
pub const DISCRIMINATOR_SEPARATOR: char = '#';

/// Display string used as the sole identity key for tracking and storage.
///
/// Two accounts that render to the same label are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberLabel(String);

impl MemberLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MemberLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MemberLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemberLabel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MemberLabel {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Structured identity data for a channel member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberIdentity {
    /// Account-level display name override.
    pub display_name: Option<String>,
    /// Per-server nickname override.
    pub nickname: Option<String>,
    /// Account handle, possibly carrying a `#discriminator` suffix.
    pub handle: String,
}

impl MemberIdentity {
    /// Identity with only a handle.
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            display_name: None,
            nickname: None,
            handle: handle.into(),
        }
    }

    /// Degenerate identity for a member whose record could not be fetched.
    ///
    /// The raw member id stands in for the handle so removal still targets
    /// a best-effort label.
    pub fn unresolved(member_id: impl Into<String>) -> Self {
        Self::new(member_id)
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// Resolve this identity to its label.
    pub fn label(&self) -> MemberLabel {
        resolve_label(self)
    }
}

/// Resolve a member identity to its display label. Never fails.
pub fn resolve_label(identity: &MemberIdentity) -> MemberLabel {
    let non_empty = |s: &Option<String>| s.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

    if let Some(name) = non_empty(&identity.display_name) {
        return MemberLabel(name);
    }
    if let Some(nick) = non_empty(&identity.nickname) {
        return MemberLabel(nick);
    }

    let base = strip_discriminator(&identity.handle);
    if base.is_empty() {
        MemberLabel(identity.handle.clone())
    } else {
        MemberLabel(base.to_string())
    }
}

/// Strip a `#discriminator` suffix from a handle.
pub fn strip_discriminator(handle: &str) -> &str {
    handle
        .split_once(DISCRIMINATOR_SEPARATOR)
        .map_or(handle, |(base, _)| base)
}
