//! Search Module
//!
//! Provides the two retrieval legs combined by `Storage::search`:
//! - Vector search using HNSW (USearch) for the semantic leg
//! - FTS5/BM25 keyword search for the lexical leg
//! - Linear-combination fusion of both, weighted by `search.hybrid_alpha`

mod hybrid;
mod keyword;
mod vector;

pub use vector::{
    VectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError, DEFAULT_CONNECTIVITY,
    DEFAULT_DIMENSIONS,
};

pub use keyword::{sanitize_fts5_query, KeywordSearcher};

pub use hybrid::{linear_combination, reciprocal_rank_fusion, HybridSearchConfig, HybridSearcher};
