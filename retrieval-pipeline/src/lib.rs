#![allow(clippy::result_large_err)]

pub mod fts;
pub mod scoring;
pub mod search;
pub mod tokenize;
pub mod vector;

pub use scoring::{FusedHit, RankedList, Signal, SubScores, RRF_K};
pub use search::{SearchEngine, SearchFilters, SearchRequest, SnippetResult};
