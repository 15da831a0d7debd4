//! Leakage-safe splitting of molecular datasets.
//!
//! Molecules are fingerprinted, linked into clusters of near-duplicates and
//! split at cluster granularity into shadow and target partitions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fingerprint;
pub mod index;
pub mod splitter;
pub mod union_find;

pub use fingerprint::{
    path_fingerprint, tanimoto, tokenize_smiles, Fingerprint, FingerprintEncoder, Token,
};
pub use index::{Cluster, KeyIndex, SimilarityIndex, TanimotoIndex};
pub use splitter::{ClusterSplitter, Partition, SplitAssignment};
pub use union_find::DisjointSet;

/// Common imports for splitting.
pub mod prelude {
    pub use crate::{
        path_fingerprint, tanimoto, Cluster, ClusterSplitter, FingerprintEncoder, KeyIndex,
        Partition, SimilarityIndex, SplitAssignment, TanimotoIndex,
    };
}
