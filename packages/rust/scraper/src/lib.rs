//! Remote page fetching and HTML metadata extraction.
//!
//! This crate provides:
//! - [`Fetcher`]: a pooled HTTP client that only accepts `200 OK` pages
//! - [`htmlmeta`]: title/description/keyword extraction over a parsed tree
//! - [`MetadataSource`]: the seam the enrichment worker fetches through

pub mod fetcher;
pub mod htmlmeta;

pub use fetcher::{Fetcher, MetadataSource};
pub use htmlmeta::{extract, extract_from_str, parse_document};
