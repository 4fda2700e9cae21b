//! Catalog access: retried JSON GETs, paginated badge listings and thumbnails.

pub mod client;
pub mod pager;
pub mod thumbnail;

pub use client::{BackoffClient, FetchFailure};
pub use pager::{BadgeListing, CatalogClient};
