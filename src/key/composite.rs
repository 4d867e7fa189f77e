//! Keys built from two other keys.

use crate::key::Key;

/// Joins the bucket names of two strategies as `"{first}{separator}{second}"`.
///
/// Both halves are always present because each inner strategy always yields
/// a name. Pick a separator that cannot appear in the first half, or two
/// distinct pairs may collapse onto one bucket.
///
/// ```ignore
/// use skp_throttle::key::{CompositeKey, SubjectKey, StaticKey};
///
/// // "tenant-a|user:alice", "tenant-a|10.0.0.1", ...
/// let key = CompositeKey::with_separator(StaticKey::new("tenant-a"), SubjectKey::new(), "|");
/// ```
#[derive(Debug, Clone)]
pub struct CompositeKey<K1, K2> {
    first: K1,
    second: K2,
    separator: &'static str,
}

impl<K1, K2> CompositeKey<K1, K2> {
    /// Join with `:`.
    pub fn new(first: K1, second: K2) -> Self {
        Self::with_separator(first, second, ":")
    }

    pub fn with_separator(first: K1, second: K2, separator: &'static str) -> Self {
        Self {
            first,
            second,
            separator,
        }
    }
}

impl<R, K1, K2> Key<R> for CompositeKey<K1, K2>
where
    K1: Key<R>,
    K2: Key<R>,
{
    fn extract(&self, request: &R) -> String {
        let mut bucket = self.first.extract(request);
        bucket.push_str(self.separator);
        bucket.push_str(&self.second.extract(request));
        bucket
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}
