//! # Tempograph - Time-To-Event Prediction Engine
//!
//! A batch analytic engine that learns, from a transactional event stream,
//! how long each client has left until a designated target event.
//!
//! ## Features
//!
//! - **Event Vocabulary**: Bounded code discovery with priority eviction,
//!   or explicit caller-assigned codes
//! - **Timelines**: Per-client event sequences keyed by a stable 64-bit hash
//! - **Prefix Tree Model**: Reverse-suffix tree with confidence-bound
//!   corrected time estimates
//! - **Code Optimizer**: Greedy many-to-one code grouping under an
//!   F1-plus-correlation score
//! - **Persistence**: Deterministic section-framed binary streams
//!
//! ## Architecture
//!
//! - Transactions flow through the vocabulary into per-client timelines
//! - The predictor fits a bounded-depth tree over reversed timelines
//! - Predictions aggregate per-depth estimates (minimax, mean or longest)
//! - The optimizer refits throwaway models over candidate relabelings
//! - A single CLI binary drives the whole batch pipeline

pub mod config;
pub mod driver;
pub mod error;
pub mod hash;
pub mod optimizer;
pub mod predictor;
pub mod report;
pub mod roster;
pub mod stats;
pub mod stream;
pub mod timeline;
pub mod vocabulary;

pub use config::RunConfig;
pub use error::{Result, TempoError};
pub use hash::{hash64, hash_str};
pub use optimizer::{optimize_codes, OptimizeParams};
pub use predictor::{
    Aggregate, ClipInsight, CodeTreeStats, Predictor, TargetMap, Transform, TreeNode,
    MAX_TREE_DEPTH, PREDICT_MAX_TIME,
};
pub use roster::Roster;
pub use stats::{normal_cdf, BinomialBounds};
pub use stream::{BinaryImage, Cursor};
pub use timeline::{parse_time, Timeline, TimelineMap, TimelineStore, DEFAULT_TIME_FORMAT};
pub use vocabulary::{EventEntry, EventKey, Vocabulary, DEFAULT_MAX_EVENTS};
