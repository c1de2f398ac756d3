//! Request correlation carried from the originating API call into published events.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;

/// Distributed-trace identifier propagated end to end.
///
/// Ids generated here follow the X-Ray layout `1-<epoch secs, 8 hex>-<96 random bits, 24 hex>`
/// so they line up with ids minted by an upstream gateway. Ids received from
/// elsewhere are carried verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// Wrap an existing trace id.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Mint a fresh trace id stamped with `now`.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let random: u128 = rand::thread_rng().r#gen::<u128>() & ((1u128 << 96) - 1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let epoch = now.timestamp() as u32;
        Self(format!("1-{epoch:08x}-{random:024x}"))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation data for one inbound request.
///
/// `correlation_id` is the caller-visible request id. It may be absent; the
/// publisher then simply omits the attribute and consumers fall back to a
/// sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    /// Caller-supplied request id, if any
    pub correlation_id: Option<String>,
    /// Trace id for this request
    pub trace_id: TraceId,
}

impl RequestContext {
    /// Build a context from an optional request id and a trace id.
    ///
    /// Empty request ids are normalised to `None`.
    #[must_use]
    pub fn new(correlation_id: Option<String>, trace_id: TraceId) -> Self {
        Self {
            correlation_id: correlation_id.filter(|id| !id.is_empty()),
            trace_id,
        }
    }

    /// Request id as a string slice, if present.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generated_trace_id_has_xray_layout() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap();
        let id = TraceId::generate(now);
        let parts: Vec<&str> = id.as_str().split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "1");
        assert_eq!(parts[1], format!("{:08x}", now.timestamp()));
        assert_eq!(parts[2].len(), 24);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_correlation_id_is_dropped() {
        let ctx = RequestContext::new(Some(String::new()), TraceId::new("t"));
        assert_eq!(ctx.correlation_id(), None);

        let ctx = RequestContext::new(Some("req-1".to_string()), TraceId::new("t"));
        assert_eq!(ctx.correlation_id(), Some("req-1"));
    }
}
