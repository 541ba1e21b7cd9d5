//! Training samples from quality-controlled records.
//!
//! ```text
//! documents + bbox pages ──▶ SampleBuilder ──▶ BuiltSample* ──▶ DatasetSampler ──▶ samples.jsonl
//!                            (one per task       (task, paper,    (weights, floors,
//!                             and record)         confidence)      per-paper cap)
//! ```
//!
//! Every built sample passes [`crate::quality::ConsistencyChecker::check_sample`]
//! before it is returned; images whose size cannot be read yield no sample.

pub mod builder;
pub mod sampler;

pub use builder::{save_samples, BuildReport, BuiltSample, SampleBuilder, TaskType};
pub use sampler::{DatasetSampler, SampleStats};
