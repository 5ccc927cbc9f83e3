use crate::config::Lang;

/// Canonical form of a source string for caching: surrounding whitespace
/// removed and internal whitespace runs collapsed to one space. Case is kept.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache key for one translated string.
///
/// Keys are opaque MD5 hashes of the normalized text and the lowercased
/// language pair, so:
/// - Whitespace-only differences hit the same entry
/// - Language codes compare case-insensitively
/// - Keys are fixed-length (32 hex chars) for consistent storage
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: String,
    normalized_text: String,
    source_lang: String,
    target_lang: String,
}

impl CacheKey {
    pub fn new(text: &str, source_lang: &Lang, target_lang: &Lang) -> Self {
        let normalized_text = normalize_text(text);
        let source_lang = source_lang.as_str().to_lowercase();
        let target_lang = target_lang.as_str().to_lowercase();

        // Null separators keep ("a b", "c") and ("a", "b c") apart.
        let combined = format!("{normalized_text}\0{source_lang}\0{target_lang}");

        Self {
            hash: format!("{:x}", md5::compute(combined.as_bytes())),
            normalized_text,
            source_lang,
            target_lang,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    pub fn source_lang(&self) -> &str {
        &self.source_lang
    }

    pub fn target_lang(&self) -> &str {
        &self.target_lang
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str, src: &str, tgt: &str) -> CacheKey {
        CacheKey::new(text, &Lang::new(src), &Lang::new(tgt))
    }

    #[test]
    fn test_cache_key_is_fixed_length_hash() {
        let k = key("Hello world", "en", "fr");
        assert_eq!(k.to_string().len(), 32);
        assert!(k.to_string().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  Hello \n\t world  "), "Hello world");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_whitespace_variants_share_key() {
        assert_eq!(key("Hello  world", "en", "fr"), key(" Hello\nworld ", "en", "fr"));
    }

    #[test]
    fn test_case_is_preserved_in_text() {
        assert_ne!(key("Hello", "en", "fr"), key("hello", "en", "fr"));
    }

    #[test]
    fn test_language_codes_are_case_insensitive() {
        assert_eq!(key("Hello", "EN", "Fr"), key("Hello", "en", "fr"));
        assert_eq!(key("Hello", "EN", "Fr").source_lang(), "en");
    }

    #[test]
    fn test_cache_key_differs_by_language() {
        assert_ne!(key("Hello", "en", "fr"), key("Hello", "en", "de"));
        assert_ne!(key("Hello", "en", "fr"), key("Hello", "auto", "fr"));
    }

    #[test]
    fn test_separator_prevents_collisions() {
        assert_ne!(key("a", "b", "c"), key("a\0b", "", "c"));
    }
}
