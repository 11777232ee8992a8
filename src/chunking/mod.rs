//! Text chunking for indexing and passage compression.

pub mod splitter;

pub use splitter::TextSplitter;
