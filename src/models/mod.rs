//! Core data models for the media delivery service.
//!
//! Objects and buckets map to the metadata tables of the backing store;
//! `media_path` and `range` model the per-request values derived from the
//! incoming URI and headers.

pub mod bucket;
pub mod media_path;
pub mod object;
pub mod range;
