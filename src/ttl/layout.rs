//! Metadata Key Layout
//!
//! Derives the keys that hold expiry metadata for an original key `k`:
//!
//! ```text
//! forward pointer     prefix ++ [k]              ->  e
//! expiry index entry  prefix ++ [tag, e, k]      ->  k
//! sweep range         [prefix ++ [tag, 0], prefix ++ [tag, now + 1])
//! ```
//!
//! Index entries sort by expiry first, so the sweep range yields exactly the
//! entries whose instant is at or before `now`, oldest first. When metadata
//! lives in its own sub-namespace the prefix is empty.

use crate::store::ScanRange;
use crate::ttl::codec::{CodecError, Element, KeyCodec};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct KeyLayout {
    codec: Arc<dyn KeyCodec>,
    namespace: Option<String>,
    expiry_tag: String,
}

impl KeyLayout {
    /// `namespace` of `None` omits the prefix entirely.
    pub fn new(codec: Arc<dyn KeyCodec>, namespace: Option<String>, expiry_tag: String) -> Self {
        Self {
            codec,
            namespace,
            expiry_tag,
        }
    }

    pub fn codec(&self) -> &dyn KeyCodec {
        self.codec.as_ref()
    }

    fn path<'a>(&'a self, tail: &[Element<'a>]) -> Vec<Element<'a>> {
        let mut path = Vec::with_capacity(tail.len() + 1);
        if let Some(ns) = &self.namespace {
            path.push(Element::Tag(ns));
        }
        path.extend_from_slice(tail);
        path
    }

    /// Key of the forward pointer for `key`.
    pub fn forward_key(&self, key: &[u8]) -> Result<Bytes, CodecError> {
        self.codec.encode(&self.path(&[Element::Key(key)]))
    }

    /// Key of the expiry index entry for `key` expiring at `expires_at`.
    pub fn expiry_key(&self, expires_at: u64, key: &[u8]) -> Result<Bytes, CodecError> {
        self.codec.encode(&self.path(&[
            Element::Tag(&self.expiry_tag),
            Element::Timestamp(expires_at),
            Element::Key(key),
        ]))
    }

    /// Range covering every index entry with an expiry at or before `now`.
    pub fn sweep_range(&self, now: u64) -> Result<ScanRange, CodecError> {
        let tag = Element::Tag(&self.expiry_tag);
        let start = self.codec.encode(&self.path(&[tag, Element::Timestamp(0)]))?;
        let end = self
            .codec
            .encode(&self.path(&[tag, Element::Timestamp(now.saturating_add(1))]))?;
        Ok(ScanRange::half_open(start, end))
    }

    /// Value stored in a forward pointer.
    pub fn encode_expiry(&self, expires_at: u64) -> Result<Bytes, CodecError> {
        self.codec.encode_value(Element::Timestamp(expires_at))
    }

    pub fn decode_expiry(&self, raw: &[u8]) -> Result<u64, CodecError> {
        self.codec.decode_timestamp(raw)
    }

    /// Value stored in an expiry index entry.
    pub fn encode_key(&self, key: &[u8]) -> Result<Bytes, CodecError> {
        self.codec.encode_value(Element::Key(key))
    }

    pub fn decode_key(&self, raw: &[u8]) -> Result<Bytes, CodecError> {
        self.codec.decode_key(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttl::codec::{BinaryCodec, SeparatorCodec};

    fn layout() -> KeyLayout {
        KeyLayout::new(
            Arc::new(SeparatorCodec::new('!', true)),
            Some("ttl".into()),
            "x".into(),
        )
    }

    #[test]
    fn test_forward_and_expiry_keys() {
        let layout = layout();
        assert_eq!(layout.forward_key(b"bar").unwrap(), Bytes::from("!ttl!bar"));
        assert_eq!(
            layout.expiry_key(1_700_000_000_100, b"bar").unwrap(),
            Bytes::from("!ttl!x!1700000000100!bar")
        );
    }

    #[test]
    fn test_sub_namespace_omits_prefix() {
        let layout = KeyLayout::new(Arc::new(SeparatorCodec::new('!', false)), None, "x".into());
        assert_eq!(layout.forward_key(b"bar").unwrap(), Bytes::from("bar"));
        assert_eq!(
            layout.expiry_key(42, b"bar").unwrap(),
            Bytes::from("x!0000000000042!bar")
        );
    }

    #[test]
    fn test_sweep_range_bounds_by_now() {
        let layout = layout();
        let range = layout.sweep_range(1_000).unwrap();

        assert!(range.contains(&layout.expiry_key(0, b"a").unwrap()));
        assert!(range.contains(&layout.expiry_key(999, b"zzz").unwrap()));
        assert!(range.contains(&layout.expiry_key(1_000, b"a").unwrap()));
        assert!(!range.contains(&layout.expiry_key(1_001, b"a").unwrap()));
    }

    #[test]
    fn test_sweep_range_skips_forward_pointers() {
        let layout = layout();
        let range = layout.sweep_range(u64::from(u32::MAX)).unwrap();

        for key in [&b"x"[..], b"x ", b"x0", b"xa", b"a", b"zzz"] {
            assert!(!range.contains(&layout.forward_key(key).unwrap()));
        }
    }

    #[test]
    fn test_binary_layout_sweep_range() {
        let layout = KeyLayout::new(Arc::new(BinaryCodec::new()), Some("ttl".into()), "x".into());
        let range = layout.sweep_range(500).unwrap();

        assert!(range.contains(&layout.expiry_key(499, b"k\x00").unwrap()));
        assert!(range.contains(&layout.expiry_key(500, b"k").unwrap()));
        assert!(!range.contains(&layout.expiry_key(501, b"k").unwrap()));
        assert!(!range.contains(&layout.forward_key(b"x").unwrap()));
    }

    #[test]
    fn test_values_round_trip_through_layout() {
        let layout = layout();
        let raw = layout.encode_expiry(1_234).unwrap();
        assert_eq!(layout.decode_expiry(&raw).unwrap(), 1_234);

        let raw = layout.encode_key(b"bar").unwrap();
        assert_eq!(layout.decode_key(&raw).unwrap(), Bytes::from("bar"));
    }
}
