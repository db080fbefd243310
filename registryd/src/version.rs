//! Concrete versions and version-rule resolution.

use std::fmt;
use std::str::FromStr;
use shared::protocol::VERSION_RULE_LATEST;
use thiserror::Error;

pub const MAX_COMPONENT: u16 = 32767;
const COMPONENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseVersionError {
    #[error("version is empty")]
    Empty,
    #[error("version has more than 4 components")]
    TooManyComponents,
    #[error("invalid version component '{0}'")]
    BadComponent(String),
}

/// Ordered most-significant component first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version([u16; COMPONENTS]);

impl Version {
    /// Zero-padded form used wherever two versions must compare as strings.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseVersionError::Empty);
        }

        let mut parts = [0u16; COMPONENTS];
        for (i, part) in s.split('.').enumerate() {
            if i >= COMPONENTS {
                return Err(ParseVersionError::TooManyComponents);
            }
            // u16::parse alone would accept a leading '+'
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseVersionError::BadComponent(part.to_string()));
            }
            parts[i] = part
                .parse::<u16>()
                .ok()
                .filter(|n| *n <= MAX_COMPONENT)
                .ok_or_else(|| ParseVersionError::BadComponent(part.to_string()))?;
        }
        Ok(Self(parts))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRule {
    Exact(Version),
    Latest,
    AtLeast(Version),
    Range(Version, Version),
    /// Malformed rule, or a range whose start is above its end
    Unmatchable,
}

impl VersionRule {
    pub fn parse(rule: &str) -> Self {
        let rule = rule.trim();
        if rule == VERSION_RULE_LATEST {
            return Self::Latest;
        }
        if let Some(base) = rule.strip_suffix('+') {
            return base.parse().map(Self::AtLeast).unwrap_or(Self::Unmatchable);
        }
        if let Some((start, end)) = rule.split_once('-') {
            return match (start.parse::<Version>(), end.parse::<Version>()) {
                (Ok(start), Ok(end)) if start <= end => Self::Range(start, end),
                _ => Self::Unmatchable,
            };
        }
        rule.parse().map(Self::Exact).unwrap_or(Self::Unmatchable)
    }

    /// Exact and malformed rules name one version; the others select from a family.
    pub fn is_selector(&self) -> bool {
        matches!(self, Self::Latest | Self::AtLeast(_) | Self::Range(_, _))
    }

    /// Predicate over a single version. `Latest` accepts everything here;
    /// narrowing to the maximum happens in [`VersionRule::select`].
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Exact(v) => version == v,
            Self::Latest => true,
            Self::AtLeast(v) => version >= v,
            Self::Range(start, end) => version >= start && version <= end,
            Self::Unmatchable => false,
        }
    }

    /// Matching candidates, highest version first. `Latest` yields at most one.
    pub fn select<T>(&self, candidates: impl IntoIterator<Item = (Version, T)>) -> Vec<(Version, T)> {
        let mut matched: Vec<(Version, T)> = candidates
            .into_iter()
            .filter(|(v, _)| self.matches(v))
            .collect();
        matched.sort_by(|a, b| b.0.cmp(&a.0));
        if *self == Self::Latest {
            matched.truncate(1);
        }
        matched
    }

    /// Highest matching candidate.
    pub fn best<T>(&self, candidates: impl IntoIterator<Item = (Version, T)>) -> Option<(Version, T)> {
        self.select(candidates).into_iter().next()
    }
}
