//! Pluggable authentication: sources, the registry, lockout bookkeeping
//! and the chain that drives one login attempt.

pub mod chain;
pub mod external;
pub mod internal;
pub mod lockout;
pub mod source;

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::source::{
    AuthenticationSource, AuthenticationSourceDescriptor, SourceKind,
};

/// Maps a source identifier to its loaded implementation. Populated once at
/// startup; lookups afterwards are pure reads.
#[derive(Default)]
pub struct AuthSourceRegistry {
    sources: HashMap<SourceKind, Arc<dyn AuthenticationSource>>,
}

impl AuthSourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source under its own kind; a second registration for the
    /// same kind replaces the first.
    pub fn register(&mut self, source: Arc<dyn AuthenticationSource>) {
        self.sources.insert(source.kind(), source);
    }

    #[must_use]
    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn AuthenticationSource>> {
        self.sources.get(&kind).cloned()
    }

    /// Descriptors for the configured sources, in attempt order. Configured
    /// but unloaded sources are skipped.
    #[must_use]
    pub fn descriptors(&self, configured: &[SourceKind]) -> Vec<AuthenticationSourceDescriptor> {
        configured
            .iter()
            .enumerate()
            .filter(|(_, kind)| self.sources.contains_key(kind))
            .map(|(order, kind)| AuthenticationSourceDescriptor {
                kind: *kind,
                friendly_name: kind.friendly_name().to_string(),
                order,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::external::WebserverSource;
    use crate::auth::internal::InternalSource;
    use crate::storage::memory::MemoryUserStore;

    #[test]
    fn register_and_get() {
        let mut registry = AuthSourceRegistry::new();
        assert!(registry.get(SourceKind::Internal).is_none());

        registry.register(Arc::new(InternalSource::new(Arc::new(
            MemoryUserStore::new(),
        ))));
        registry.register(Arc::new(WebserverSource::new()));

        assert!(registry.get(SourceKind::Internal).is_some());
        assert!(registry.get(SourceKind::Webserver).is_some());
        assert!(registry.get(SourceKind::Ldap).is_none());
    }

    #[test]
    fn descriptors_follow_configured_order_and_skip_unloaded() {
        let mut registry = AuthSourceRegistry::new();
        registry.register(Arc::new(InternalSource::new(Arc::new(
            MemoryUserStore::new(),
        ))));
        registry.register(Arc::new(WebserverSource::new()));

        let descriptors = registry.descriptors(&[
            SourceKind::Ldap,
            SourceKind::Webserver,
            SourceKind::Internal,
        ]);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].kind, SourceKind::Webserver);
        assert_eq!(descriptors[0].friendly_name, "Webserver");
        assert_eq!(descriptors[1].kind, SourceKind::Internal);
        assert_eq!(descriptors[1].order, 2);
    }
}
