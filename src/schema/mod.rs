//! Typed dataset records.
//!
//! Shape invariants (bbox ordering, section level range, category values
//! only on categorical variables, confidence in `[0, 1]`) are enforced when a
//! record is constructed or deserialised, so a value of these types is always
//! well-formed. Cross-field and page-dependent rules live in
//! [`crate::quality`].

pub mod base;
pub mod document;
pub mod region;
pub mod sample;

pub use base::{AxisScale, BBox, FigureType, PageSpan, VariableRole};
pub use document::{Affiliation, Author, DocumentAnnotation, Reference, Section};
pub use region::{clean_caption, standardize_unit, Axis, BBoxAnnotation, BBoxPage, Variable};
pub use sample::{ConversationSample, SampleImage, Speaker, Turn};
