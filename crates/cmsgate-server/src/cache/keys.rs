//! Cache key construction.
//!
//! Keys are pure functions of the operation, resource type, identifier and
//! query. Query strings are canonicalized before they become part of a key,
//! so logically identical requests always land on the same entry:
//!
//! ```text
//! collection:{type}:{canonical-query}
//! single:{type}:{id}:{canonical-query}
//! page:{slug}
//! ```

use std::fmt;

use url::form_urlencoded;

/// Query parameters in canonical form.
///
/// Pairs are sorted by key. The sort is stable, so repeated keys keep the
/// order in which the client sent them (`tag=b&tag=a` stays distinct from
/// `tag=a&tag=b`). Encoding is `application/x-www-form-urlencoded`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalQuery {
    pairs: Vec<(String, String)>,
}

impl CanonicalQuery {
    /// Parse a raw query string (without the leading `?`).
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        Self::from_pairs(
            form_urlencoded::parse(raw.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    pub fn from_pairs(mut pairs: Vec<(String, String)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Canonical encoded form, empty when there are no parameters.
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

impl fmt::Display for CanonicalQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Key for a collection listing.
pub fn collection_key(content_type: &str, query: &CanonicalQuery) -> String {
    format!("collection:{}:{}", content_type, query.encode())
}

/// Key for a single item looked up by id.
pub fn single_key(content_type: &str, id: &str, query: &CanonicalQuery) -> String {
    format!("single:{}:{}:{}", content_type, id, query.encode())
}

/// Key for a page looked up by slug.
///
/// The slug is form-urlencoded, so a page key never holds a second `:`.
pub fn page_key(slug: &str) -> String {
    let escaped: String = form_urlencoded::byte_serialize(slug.as_bytes()).collect();
    format!("page:{escaped}")
}

/// Glob pattern matching every collection and single-item key of a content type.
///
/// Page keys (`page:{slug}`) have no `:{type}:` segment and are never matched.
pub fn content_type_pattern(content_type: &str) -> String {
    format!("*:{}:*", escape_glob(content_type))
}

/// Escape glob metacharacters so the input only matches itself.
pub fn escape_glob(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_key_includes_encoded_query() {
        let query = CanonicalQuery::parse("limit=10");
        assert_eq!(collection_key("articles", &query), "collection:articles:limit=10");
    }

    #[test]
    fn empty_query_keeps_trailing_separator() {
        let query = CanonicalQuery::parse("");
        assert!(query.is_empty());
        assert_eq!(collection_key("articles", &query), "collection:articles:");
        assert_eq!(single_key("articles", "7", &query), "single:articles:7:");
    }

    #[test]
    fn parameter_order_is_canonicalized() {
        let a = CanonicalQuery::parse("sort=title&limit=10");
        let b = CanonicalQuery::parse("?limit=10&sort=title");
        assert_eq!(a, b);
        assert_eq!(
            single_key("articles", "1", &a),
            single_key("articles", "1", &b)
        );
        assert_eq!(a.encode(), "limit=10&sort=title");
    }

    #[test]
    fn repeated_keys_keep_client_order() {
        let ab = CanonicalQuery::parse("tag=a&tag=b");
        let ba = CanonicalQuery::parse("tag=b&tag=a");
        assert_ne!(ab.encode(), ba.encode());
        assert_eq!(ab.encode(), "tag=a&tag=b");
    }

    #[test]
    fn brackets_and_spaces_are_encoded() {
        let query = CanonicalQuery::parse("filters[slug][$eq]=hello world");
        assert_eq!(query.encode(), "filters%5Bslug%5D%5B%24eq%5D=hello+world");

        // The same logical query, pre-encoded by the client, yields the same key.
        let encoded = CanonicalQuery::parse("filters%5Bslug%5D%5B%24eq%5D=hello%20world");
        assert_eq!(query, encoded);
    }

    #[test]
    fn distinct_values_do_not_collide() {
        let a = CanonicalQuery::parse("a=1&b=2");
        let b = CanonicalQuery::parse("a=1%26b%3D2");
        assert_ne!(collection_key("x", &a), collection_key("x", &b));
    }

    #[test]
    fn page_key_is_slug_only() {
        assert_eq!(page_key("about-us"), "page:about-us");
    }

    #[test]
    fn page_key_escapes_separators_in_slug() {
        let key = page_key("promo:articles:spring");
        assert_eq!(key, "page:promo%3Aarticles%3Aspring");
        assert!(!crate::cache::store::glob_match(&content_type_pattern("articles"), &key));
    }

    #[test]
    fn content_type_pattern_escapes_glob_chars() {
        assert_eq!(content_type_pattern("article"), "*:article:*");
        assert_eq!(content_type_pattern("a*b"), "*:a\\*b:*");
        assert_eq!(escape_glob("[x]?"), "\\[x\\]\\?");
    }
}
