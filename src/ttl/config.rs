//! TTL Configuration
//!
//! Options recognized when wrapping a store with [`TtlDb`](crate::TtlDb).
//! Changing `namespace`, `expiry_namespace`, `separator` or `codec` changes the
//! on-store key format; a store populated under one setting is not readable
//! under another.

use crate::store::OrderedStore;
use crate::ttl::codec::{KeyCodec, SeparatorCodec};
use crate::ttl::error::{TtlError, TtlResult};
use crate::ttl::layout::KeyLayout;
use std::sync::Arc;
use std::time::Duration;

/// Namespace used for metadata when no sub-namespace is configured.
pub const DEFAULT_NAMESPACE: &str = "ttl";

/// Tag separating expiry index entries from forward pointers.
pub const DEFAULT_EXPIRY_NAMESPACE: &str = "x";

pub const DEFAULT_SEPARATOR: char = '!';

pub const DEFAULT_CHECK_FREQUENCY: Duration = Duration::from_secs(10);

/// Configuration for the TTL layer.
#[derive(Clone)]
pub struct TtlOptions {
    /// Metadata key prefix. `None` picks `"ttl"`, or no prefix when `sub` is set.
    pub namespace: Option<String>,

    /// Tag under which expiry index entries are kept (default: `"x"`)
    pub expiry_namespace: String,

    /// Reserved joining character for the default codec (default: `'!'`)
    pub separator: char,

    /// Period between sweeps (default: 10s)
    pub check_frequency: Duration,

    /// TTL applied to writes that do not name one (default: none)
    pub default_ttl: Option<Duration>,

    /// Isolated store for metadata instead of the primary store
    pub sub: Option<Arc<dyn OrderedStore>>,

    /// Replaces the separator codec
    pub codec: Option<Arc<dyn KeyCodec>>,
}

impl Default for TtlOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            expiry_namespace: DEFAULT_EXPIRY_NAMESPACE.to_string(),
            separator: DEFAULT_SEPARATOR,
            check_frequency: DEFAULT_CHECK_FREQUENCY,
            default_ttl: None,
            sub: None,
            codec: None,
        }
    }
}

impl std::fmt::Debug for TtlOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlOptions")
            .field("namespace", &self.namespace)
            .field("expiry_namespace", &self.expiry_namespace)
            .field("separator", &self.separator)
            .field("check_frequency", &self.check_frequency)
            .field("default_ttl", &self.default_ttl)
            .field("sub", &self.sub.is_some())
            .field("codec", &self.codec)
            .finish()
    }
}

impl TtlOptions {
    pub fn with_check_frequency(mut self, period: Duration) -> Self {
        self.check_frequency = period;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_sub(mut self, sub: Arc<dyn OrderedStore>) -> Self {
        self.sub = Some(sub);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn KeyCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// The prefix actually applied to metadata keys.
    pub fn effective_namespace(&self) -> Option<String> {
        match &self.namespace {
            Some(ns) if ns.is_empty() => None,
            Some(ns) => Some(ns.clone()),
            None if self.sub.is_some() => None,
            None => Some(DEFAULT_NAMESPACE.to_string()),
        }
    }

    /// A zero default means "no default".
    pub fn effective_default_ttl(&self) -> Option<Duration> {
        self.default_ttl.filter(|ttl| !ttl.is_zero())
    }

    /// Checks the options for values that would corrupt the key layout.
    pub fn validate(&self) -> TtlResult<()> {
        if self.check_frequency.is_zero() {
            return Err(TtlError::Config("check_frequency must be non-zero".into()));
        }
        if self.expiry_namespace.is_empty() {
            return Err(TtlError::Config("expiry_namespace must not be empty".into()));
        }
        if self.codec.is_none() {
            if !self.separator.is_ascii() {
                return Err(TtlError::Config(format!(
                    "separator {:?} must be an ASCII character",
                    self.separator
                )));
            }
            let tags = self
                .effective_namespace()
                .into_iter()
                .chain(std::iter::once(self.expiry_namespace.clone()));
            for tag in tags {
                if tag.contains(self.separator) {
                    return Err(TtlError::Config(format!(
                        "namespace {:?} contains the separator {:?}",
                        tag, self.separator
                    )));
                }
            }
        }
        Ok(())
    }

    /// Builds the metadata key layout these options describe.
    pub fn layout(&self) -> KeyLayout {
        let codec: Arc<dyn KeyCodec> = match &self.codec {
            Some(codec) => Arc::clone(codec),
            None => Arc::new(SeparatorCodec::new(self.separator, self.sub.is_none())),
        };
        KeyLayout::new(
            codec,
            self.effective_namespace(),
            self.expiry_namespace.clone(),
        )
    }
}

/// Per-call options for writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// `None` falls back to the configured default; `Some(ZERO)` opts out of it.
    pub ttl: Option<Duration>,
}

impl WriteOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }

    /// Writes without a TTL even when a default is configured.
    pub fn no_ttl() -> Self {
        Self {
            ttl: Some(Duration::ZERO),
        }
    }

    /// Resolves the TTL to arm with, if any.
    pub fn resolve(&self, default_ttl: Option<Duration>) -> Option<Duration> {
        match self.ttl {
            Some(ttl) if ttl.is_zero() => None,
            Some(ttl) => Some(ttl),
            None => default_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bytes::Bytes;

    #[test]
    fn test_defaults() {
        let options = TtlOptions::default();
        assert_eq!(options.effective_namespace().as_deref(), Some("ttl"));
        assert_eq!(options.expiry_namespace, "x");
        assert_eq!(options.separator, '!');
        assert_eq!(options.check_frequency, Duration::from_secs(10));
        assert_eq!(options.effective_default_ttl(), None);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_sub_drops_namespace() {
        let options = TtlOptions::default().with_sub(Arc::new(MemoryStore::new()));
        assert_eq!(options.effective_namespace(), None);

        let layout = options.layout();
        assert_eq!(layout.forward_key(b"k").unwrap(), Bytes::from("k"));
    }

    #[test]
    fn test_zero_default_ttl_means_none() {
        let options = TtlOptions::default().with_default_ttl(Duration::ZERO);
        assert_eq!(options.effective_default_ttl(), None);
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let zero = TtlOptions::default().with_check_frequency(Duration::ZERO);
        assert!(matches!(zero.validate(), Err(TtlError::Config(_))));

        let unicode = TtlOptions {
            separator: 'ÿ',
            ..Default::default()
        };
        assert!(unicode.validate().is_err());

        let clash = TtlOptions::default().with_namespace("a!b");
        assert!(clash.validate().is_err());

        let empty_tag = TtlOptions {
            expiry_namespace: String::new(),
            ..Default::default()
        };
        assert!(empty_tag.validate().is_err());
    }

    #[test]
    fn test_write_options_resolve() {
        let default = Some(Duration::from_secs(5));

        assert_eq!(WriteOptions::default().resolve(default), default);
        assert_eq!(WriteOptions::default().resolve(None), None);
        assert_eq!(WriteOptions::no_ttl().resolve(default), None);
        assert_eq!(
            WriteOptions::ttl(Duration::from_millis(100)).resolve(default),
            Some(Duration::from_millis(100))
        );
    }
}
