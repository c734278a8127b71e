//! Tenant/scope identity and its mapping onto storage-layer names
//!
//! Resolution is a pure function of (tenant, scope kind, user, collection):
//! no I/O happens here, so an invalid identity is rejected before any
//! backend is contacted.

mod sanitize;

pub use sanitize::{
    sanitize_collection_name, sanitize_index_component, CollectionRegistry, RegisterOutcome,
    MAX_COLLECTION_SLUG_LEN,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Private scope requires a non-empty user id")]
    MissingUserId,

    #[error("Collection name cannot be empty")]
    EmptyCollectionName,

    #[error("Collection filter '{collection}' must name at least one scope kind")]
    NoScopeKinds { collection: String },
}

/// Visibility partition of a tenant's data
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// One user's data
    Private,
    /// Data visible to every member of the tenant
    Shared,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Shared => "shared",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-scoped identity of one searchable partition.
///
/// Fields are private so the "private scope needs a user" invariant holds
/// for every value in circulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeIdentifier {
    tenant_id: String,
    kind: ScopeKind,
    user_id: Option<String>,
    collection_name: Option<String>,
}

impl ScopeIdentifier {
    pub fn new(
        tenant_id: impl Into<String>,
        kind: ScopeKind,
        user_id: Option<&str>,
        collection_name: Option<&str>,
    ) -> Result<Self, ScopeError> {
        let user_id = user_id.map(str::trim).filter(|u| !u.is_empty());
        if kind == ScopeKind::Private && user_id.is_none() {
            return Err(ScopeError::MissingUserId);
        }

        // Shared scopes are tenant-wide; a user id would only leak into logs.
        let user_id = match kind {
            ScopeKind::Private => user_id.map(str::to_string),
            ScopeKind::Shared => None,
        };

        Ok(Self {
            tenant_id: tenant_id.into(),
            kind,
            user_id,
            collection_name: collection_name
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }

    pub fn private(
        tenant_id: impl Into<String>,
        user_id: &str,
        collection_name: Option<&str>,
    ) -> Result<Self, ScopeError> {
        Self::new(tenant_id, ScopeKind::Private, Some(user_id), collection_name)
    }

    pub fn shared(tenant_id: impl Into<String>, collection_name: Option<&str>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            kind: ScopeKind::Shared,
            user_id: None,
            collection_name: collection_name
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn collection_name(&self) -> Option<&str> {
        self.collection_name.as_deref()
    }
}

/// Restricts a search to one named collection within the listed scope kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionFilter {
    pub collection_name: String,
    pub scope_kinds: BTreeSet<ScopeKind>,
}

impl CollectionFilter {
    pub fn new(
        collection_name: impl Into<String>,
        scope_kinds: impl IntoIterator<Item = ScopeKind>,
    ) -> Result<Self, ScopeError> {
        let collection_name = collection_name.into();
        if collection_name.trim().is_empty() {
            return Err(ScopeError::EmptyCollectionName);
        }
        let scope_kinds: BTreeSet<ScopeKind> = scope_kinds.into_iter().collect();
        if scope_kinds.is_empty() {
            return Err(ScopeError::NoScopeKinds {
                collection: collection_name,
            });
        }
        Ok(Self {
            collection_name,
            scope_kinds,
        })
    }

    pub fn applies_to(&self, kind: ScopeKind) -> bool {
        self.scope_kinds.contains(&kind)
    }
}

/// Storage identifiers for one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    pub scope: ScopeIdentifier,
    /// Vector index (collection) name in the vector store
    pub index_name: String,
    /// Object-store bucket, one per tenant
    pub bucket_name: String,
    /// Key prefix up to (not including) the category segment
    prefix_root: String,
}

impl ResolvedScope {
    /// Object-store key prefix for a document category, e.g. `u1/documents/`
    pub fn key_prefix(&self, category: &str) -> String {
        format!("{}{}/", self.prefix_root, category)
    }

    /// Whether this scope addresses a named collection rather than the default index
    pub fn is_named_collection(&self) -> bool {
        self.scope.collection_name().is_some()
    }
}

/// Maps scope identities to index, bucket and key-prefix names
#[derive(Debug, Clone, Copy)]
pub struct ScopeResolver {
    dimension: usize,
}

impl ScopeResolver {
    /// `dimension` is the embedding dimension baked into index names
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Resolve raw identity parts.
    ///
    /// # Errors
    /// [`ScopeError::MissingUserId`] when `kind` is private and `user_id`
    /// is absent or blank.
    pub fn resolve(
        &self,
        tenant_id: &str,
        kind: ScopeKind,
        user_id: Option<&str>,
        collection_name: Option<&str>,
    ) -> Result<ResolvedScope, ScopeError> {
        let scope = ScopeIdentifier::new(tenant_id, kind, user_id, collection_name)?;
        Ok(self.resolve_identifier(&scope))
    }

    /// Resolve an already-validated identifier; infallible.
    pub fn resolve_identifier(&self, scope: &ScopeIdentifier) -> ResolvedScope {
        let collection_slug = scope.collection_name().map(sanitize_collection_name);
        let owner = match (scope.kind(), scope.user_id()) {
            (ScopeKind::Private, Some(user_id)) => {
                format!("user_{}", sanitize_index_component(user_id))
            }
            _ => format!(
                "org_{}_shared",
                sanitize_index_component(scope.tenant_id())
            ),
        };

        let index_name = match &collection_slug {
            Some(slug) => format!(
                "{owner}_col_{}_chunks_{}",
                sanitize_index_component(slug),
                self.dimension
            ),
            None => format!("{owner}_chunks_{}", self.dimension),
        };

        let base = match (scope.kind(), scope.user_id()) {
            (ScopeKind::Private, Some(user_id)) => format!("{user_id}/"),
            _ => "shared/".to_string(),
        };
        let prefix_root = match &collection_slug {
            Some(slug) => format!("{base}collections/{slug}/"),
            None => base,
        };

        ResolvedScope {
            scope: scope.clone(),
            index_name,
            bucket_name: format!("org-{}", scope.tenant_id()).to_lowercase(),
            prefix_root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_index_name() {
        let resolver = ScopeResolver::new(1024);
        let resolved = resolver
            .resolve("Acme", ScopeKind::Private, Some("user-42"), None)
            .unwrap();
        assert_eq!(resolved.index_name, "user_user_42_chunks_1024");
        assert_eq!(resolved.bucket_name, "org-acme");
        assert_eq!(resolved.key_prefix("documents"), "user-42/documents/");
    }

    #[test]
    fn private_collection_index_name() {
        let resolver = ScopeResolver::new(384);
        let resolved = resolver
            .resolve("acme", ScopeKind::Private, Some("u1"), Some("Café Notes"))
            .unwrap();
        assert_eq!(resolved.index_name, "user_u1_col_cafe_notes_chunks_384");
        assert_eq!(
            resolved.key_prefix("documents"),
            "u1/collections/cafe-notes/documents/"
        );
        assert!(resolved.is_named_collection());
    }

    #[test]
    fn shared_index_names() {
        let resolver = ScopeResolver::new(384);
        let plain = resolver
            .resolve("acme-corp", ScopeKind::Shared, None, None)
            .unwrap();
        assert_eq!(plain.index_name, "org_acme_corp_shared_chunks_384");
        assert_eq!(plain.bucket_name, "org-acme-corp");
        assert_eq!(plain.key_prefix("images"), "shared/images/");

        let named = resolver
            .resolve("acme-corp", ScopeKind::Shared, None, Some("HR-Policies"))
            .unwrap();
        assert_eq!(
            named.index_name,
            "org_acme_corp_shared_col_hr_policies_chunks_384"
        );
        assert_eq!(
            named.key_prefix("documents"),
            "shared/collections/hr-policies/documents/"
        );
    }

    #[test]
    fn shared_scope_ignores_user() {
        let resolver = ScopeResolver::new(8);
        let resolved = resolver
            .resolve("t", ScopeKind::Shared, Some("u1"), None)
            .unwrap();
        assert_eq!(resolved.scope.user_id(), None);
        assert_eq!(resolved.key_prefix("documents"), "shared/documents/");
    }

    #[test]
    fn private_without_user_is_rejected() {
        let resolver = ScopeResolver::new(384);
        assert_eq!(
            resolver.resolve("acme", ScopeKind::Private, Some(""), None),
            Err(ScopeError::MissingUserId)
        );
        assert_eq!(
            resolver.resolve("acme", ScopeKind::Private, None, None),
            Err(ScopeError::MissingUserId)
        );
    }

    #[test]
    fn blank_collection_means_default_index() {
        let resolver = ScopeResolver::new(384);
        let resolved = resolver
            .resolve("acme", ScopeKind::Shared, None, Some("   "))
            .unwrap();
        assert_eq!(resolved.index_name, "org_acme_shared_chunks_384");
        assert!(!resolved.is_named_collection());
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = ScopeResolver::new(384);
        let a = resolver
            .resolve("acme", ScopeKind::Private, Some("u1"), Some("Legal"))
            .unwrap();
        let b = resolver
            .resolve("acme", ScopeKind::Private, Some("u1"), Some("Legal"))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn collection_filter_requires_kinds() {
        assert!(CollectionFilter::new("Legal", []).is_err());
        assert!(CollectionFilter::new("", [ScopeKind::Shared]).is_err());

        let filter = CollectionFilter::new("Legal", [ScopeKind::Shared]).unwrap();
        assert!(filter.applies_to(ScopeKind::Shared));
        assert!(!filter.applies_to(ScopeKind::Private));
    }
}
