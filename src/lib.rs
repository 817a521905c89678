//! Batch data-quality and entity-resolution pipeline for scraped youth
//! soccer results: normalizes raw staging rows, resolves teams, clubs and
//! competitions to canonical entities, deduplicates matches and promotes
//! them into the production tables.

pub mod common;
pub mod config;
pub mod domain;
pub mod normalize;
pub mod observability;
pub mod patterns;
pub mod pipeline;
pub mod promote;
pub mod resolve;
pub mod storage;
