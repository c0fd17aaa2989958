//! API endpoint modules organized by upstream service.
//!
//! Each module wraps an [`ApiClient`](crate::ApiClient) with typed methods
//! for one vendor.

pub mod backend;
pub mod llm;
pub mod speech;
pub mod sentiment;
