//! Index-level search primitives shared by the retrieval strategies.

pub mod bm25;
pub mod hybrid;
pub mod mmr;
pub mod parent;
pub mod vector;
