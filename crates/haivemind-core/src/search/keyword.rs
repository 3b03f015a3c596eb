//! Lexical (FTS5) search support.

/// Sanitize a free-text query for safe use inside an FTS5 `MATCH` clause.
///
/// FTS5 query syntax treats `"`, `*`, `^`, `:`, `(`, `)`, `-` as operators;
/// a raw user query containing them can throw a syntax error or change
/// match semantics unexpectedly. Each whitespace-separated term is stripped
/// of anything but alphanumerics and then individually quoted, which turns
/// the whole query into a plain AND-of-terms phrase match.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| term.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Thin wrapper kept for call sites that want a named searcher rather than
/// calling `Storage::lexical_search` directly (mirrors `HybridSearcher`'s
/// role alongside `linear_combination`).
pub struct KeywordSearcher;

impl KeywordSearcher {
    pub fn sanitize(query: &str) -> String {
        sanitize_fts5_query(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fts5_operator_characters() {
        assert_eq!(sanitize_fts5_query("redis* AND (cluster)"), "\"redis\" \"AND\" \"cluster\"");
    }

    #[test]
    fn empty_query_sanitizes_to_empty() {
        assert_eq!(sanitize_fts5_query("   "), "");
    }

    #[test]
    fn preserves_underscored_identifiers() {
        assert_eq!(sanitize_fts5_query("memory_engine"), "\"memory_engine\"");
    }
}
