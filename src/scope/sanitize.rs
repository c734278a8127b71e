//! Collection-name sanitization for storage paths and index names

use super::ScopeError;
use std::collections::BTreeMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Maximum length of a sanitized collection slug
pub const MAX_COLLECTION_SLUG_LEN: usize = 64;

/// Length of the hex content-hash suffix appended on overflow
const HASH_SUFFIX_LEN: usize = 8;

/// Sanitize a human-entered collection name into a storage-safe slug.
///
/// The slug alphabet is `[a-z0-9-]`: diacritics are stripped after NFKD
/// decomposition, letters without a decomposition are transliterated,
/// every other run of characters collapses to a single `-`. Slugs longer
/// than [`MAX_COLLECTION_SLUG_LEN`] are cut and suffixed with a BLAKE3
/// hash of the full slug. Names with no ASCII-representable content map
/// to `c-<hash>`.
///
/// Sanitizing an already-sanitized slug returns it unchanged.
pub fn sanitize_collection_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.nfkd() {
        if is_combining_mark(c) {
            continue;
        }

        if c.is_ascii_alphanumeric() {
            push_slug_char(&mut slug, c, &mut pending_separator);
        } else if let Some(ascii) = transliterate(c) {
            for t in ascii.chars() {
                push_slug_char(&mut slug, t, &mut pending_separator);
            }
        } else {
            pending_separator = true;
        }
    }

    if slug.is_empty() {
        let canonical = canonical_name(name);
        if canonical.is_empty() {
            return String::new();
        }
        return format!("c-{}", short_hash(&canonical));
    }

    if slug.len() <= MAX_COLLECTION_SLUG_LEN {
        return slug;
    }

    let hash = short_hash(&slug);
    let keep = MAX_COLLECTION_SLUG_LEN - HASH_SUFFIX_LEN - 1;
    let prefix = slug[..keep].trim_end_matches('-');
    format!("{prefix}-{hash}")
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
///
/// Index names only accept letters, digits and underscores; hyphens in
/// user ids, tenant ids and collection slugs become underscores.
pub fn sanitize_index_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn push_slug_char(slug: &mut String, c: char, pending_separator: &mut bool) {
    if *pending_separator && !slug.is_empty() {
        slug.push('-');
    }
    *pending_separator = false;
    slug.push(c.to_ascii_lowercase());
}

/// ASCII equivalents for letters that survive NFKD unchanged
fn transliterate(c: char) -> Option<&'static str> {
    let ascii = match c {
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'œ' | 'Œ' => "oe",
        'ø' | 'Ø' => "o",
        'đ' | 'Đ' | 'ð' | 'Ð' => "d",
        'ł' | 'Ł' => "l",
        'þ' | 'Þ' => "th",
        'ı' => "i",
        'ŋ' | 'Ŋ' => "n",
        _ => return None,
    };
    Some(ascii)
}

/// Case- and width-insensitive form used to tell "same name" from "collision"
fn canonical_name(name: &str) -> String {
    let composed: String = name.nfkc().collect();
    composed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn short_hash(value: &str) -> String {
    let hex = blake3::hash(value.as_bytes()).to_hex();
    hex[..HASH_SUFFIX_LEN].to_string()
}

/// Outcome of registering a collection name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New collection; `slug` is now reserved for it
    Created { slug: String },

    /// Same collection registered again (names normalize identically)
    AlreadyExists { slug: String },

    /// A different name already owns this slug
    Conflict { slug: String, existing: String },
}

/// Tracks which display name owns each sanitized slug within one namespace
/// (a tenant's shared space or one user's private space).
#[derive(Debug, Default, Clone)]
pub struct CollectionRegistry {
    by_slug: BTreeMap<String, String>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slug for `display_name`, reporting collisions instead of merging.
    pub fn register(&mut self, display_name: &str) -> Result<RegisterOutcome, ScopeError> {
        let canonical = canonical_name(display_name);
        if canonical.is_empty() {
            return Err(ScopeError::EmptyCollectionName);
        }

        let slug = sanitize_collection_name(display_name);
        match self.by_slug.get(&slug) {
            Some(existing) if canonical_name(existing) == canonical => {
                Ok(RegisterOutcome::AlreadyExists { slug })
            }
            Some(existing) => Ok(RegisterOutcome::Conflict {
                slug,
                existing: existing.clone(),
            }),
            None => {
                self.by_slug.insert(slug.clone(), display_name.trim().to_string());
                Ok(RegisterOutcome::Created { slug })
            }
        }
    }

    /// Slug registered for `display_name`, if this exact collection exists
    pub fn slug_for(&self, display_name: &str) -> Option<&str> {
        let canonical = canonical_name(display_name);
        let slug = sanitize_collection_name(display_name);
        self.by_slug
            .get_key_value(&slug)
            .filter(|(_, existing)| canonical_name(existing) == canonical)
            .map(|(slug, _)| slug.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_slug.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slug.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_diacritics_and_lowercases() {
        assert_eq!(sanitize_collection_name("Café Résumé"), "cafe-resume");
        assert_eq!(sanitize_collection_name("Straße"), "strasse");
        assert_eq!(sanitize_collection_name("Ørsted Æble"), "orsted-aeble");
    }

    #[test]
    fn collapses_separator_runs() {
        assert_eq!(sanitize_collection_name("  Q3 -- Reports!!  2024 "), "q3-reports-2024");
        assert_eq!(sanitize_collection_name("a_b.c"), "a-b-c");
    }

    #[test]
    fn idempotent_on_assorted_inputs() {
        let long = "Quarterly Financial Statements ".repeat(6);
        let inputs = [
            "Café Résumé",
            "Team-Docs_2024",
            "日本語のドキュメント",
            "!!!",
            "ﬁnance ①",
            long.as_str(),
            "",
        ];
        for input in inputs {
            let once = sanitize_collection_name(input);
            assert_eq!(sanitize_collection_name(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn long_names_are_capped_with_hash_suffix() {
        let a = format!("{}alpha", "x".repeat(80));
        let b = format!("{}beta", "x".repeat(80));
        let slug_a = sanitize_collection_name(&a);
        let slug_b = sanitize_collection_name(&b);

        assert!(slug_a.len() <= MAX_COLLECTION_SLUG_LEN);
        assert!(slug_b.len() <= MAX_COLLECTION_SLUG_LEN);
        assert_ne!(slug_a, slug_b);
    }

    #[test]
    fn non_latin_names_get_distinct_hash_slugs() {
        let a = sanitize_collection_name("日本");
        let b = sanitize_collection_name("中国");
        assert!(a.starts_with("c-"));
        assert!(b.starts_with("c-"));
        assert_ne!(a, b);
    }

    #[test]
    fn index_component_replaces_hyphens() {
        assert_eq!(sanitize_index_component("user-42"), "user_42");
        assert_eq!(sanitize_index_component("a.b@c"), "a_b_c");
    }

    #[test]
    fn registry_reports_conflicts() {
        let mut registry = CollectionRegistry::new();

        let created = registry.register("Sales Reports").unwrap();
        assert_eq!(
            created,
            RegisterOutcome::Created {
                slug: "sales-reports".to_string()
            }
        );

        let again = registry.register("  sales   REPORTS ").unwrap();
        assert!(matches!(again, RegisterOutcome::AlreadyExists { .. }));

        let clash = registry.register("Sales_Reports").unwrap();
        assert_eq!(
            clash,
            RegisterOutcome::Conflict {
                slug: "sales-reports".to_string(),
                existing: "Sales Reports".to_string(),
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_rejects_empty_names() {
        let mut registry = CollectionRegistry::new();
        assert!(registry.register("   ").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn slug_lookup_requires_matching_name() {
        let mut registry = CollectionRegistry::new();
        registry.register("Legal").unwrap();
        assert_eq!(registry.slug_for("legal"), Some("legal"));
        assert_eq!(registry.slug_for("Legal!"), None);
    }
}
