//! Cache policy flags.
//!
//! A `CachePolicy` is a bitset of independent switches. Flags compose with
//! `|` and are evaluated order-insensitively; no flag implies another.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitset of caching behaviors applied to a single interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CachePolicy(u32);

impl CachePolicy {
    /// No policy flags.
    pub const NONE: Self = Self(0);
    /// Key cache entries per authenticated caller.
    pub const BY_USER: Self = Self(1);
    /// Serve matching stale content and refresh the store in the background.
    pub const STALE_WHILE_REVALIDATE: Self = Self(1 << 1);
    /// Invalidate related entries after a successful mutating call.
    pub const INVALIDATE_ON_UPDATE: Self = Self(1 << 2);
    /// Vary the key by the Accept-Encoding header.
    pub const VARY_BY_ENCODING: Self = Self(1 << 3);
    /// Gzip stored content above the configured size threshold.
    pub const COMPRESS_CONTENT: Self = Self(1 << 4);
    /// Vary the key by (sorted) query parameters.
    pub const VARY_BY_QUERY: Self = Self(1 << 5);
    /// Allow caching of responses for authenticated callers.
    pub const CACHE_AUTHENTICATED: Self = Self(1 << 6);

    /// Reasonable defaults for most endpoints.
    pub const DEFAULT: Self = Self::INVALIDATE_ON_UPDATE;
    /// Tuned for JSON API responses.
    pub const API: Self = Self(
        Self::INVALIDATE_ON_UPDATE.0 | Self::COMPRESS_CONTENT.0 | Self::VARY_BY_QUERY.0,
    );
    /// Tuned for endpoints serving authenticated callers.
    pub const AUTHENTICATED_USER: Self = Self(
        Self::BY_USER.0 | Self::INVALIDATE_ON_UPDATE.0 | Self::CACHE_AUTHENTICATED.0,
    );
    /// Tuned for hot read paths that tolerate brief staleness.
    pub const HIGH_PERFORMANCE: Self = Self(
        Self::STALE_WHILE_REVALIDATE.0 | Self::COMPRESS_CONTENT.0 | Self::INVALIDATE_ON_UPDATE.0,
    );

    /// Whether every flag in `other` is set on `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CachePolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CachePolicy {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names = [
            (Self::BY_USER, "by-user"),
            (Self::STALE_WHILE_REVALIDATE, "stale-while-revalidate"),
            (Self::INVALIDATE_ON_UPDATE, "invalidate-on-update"),
            (Self::VARY_BY_ENCODING, "vary-by-encoding"),
            (Self::COMPRESS_CONTENT, "compress-content"),
            (Self::VARY_BY_QUERY, "vary-by-query"),
            (Self::CACHE_AUTHENTICATED, "cache-authenticated"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}
