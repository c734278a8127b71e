//! Scope authorization, checked before any handler is built

use super::CallerContext;
use crate::retrieval::SourceType;
use std::collections::BTreeSet;

/// Decides whether a caller may search a concrete source.
///
/// Unauthorized sources are dropped silently by the orchestrator; they
/// never show up as handler failures.
pub trait ScopeAuthorizer: Send + Sync {
    fn is_authorized(&self, caller: &CallerContext, source: &SourceType) -> bool;
}

/// Permits everything; for single-tenant deployments and the CLI
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ScopeAuthorizer for AllowAll {
    fn is_authorized(&self, _caller: &CallerContext, _source: &SourceType) -> bool {
        true
    }
}

/// Fixed allow-list of sources, the same for every caller
#[derive(Debug, Clone, Default)]
pub struct ScopeAllowList {
    allowed: BTreeSet<SourceType>,
}

impl ScopeAllowList {
    pub fn new(allowed: impl IntoIterator<Item = SourceType>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn allow(mut self, source: SourceType) -> Self {
        self.allowed.insert(source);
        self
    }
}

impl ScopeAuthorizer for ScopeAllowList {
    fn is_authorized(&self, _caller: &CallerContext, source: &SourceType) -> bool {
        self.allowed.contains(source)
    }
}
