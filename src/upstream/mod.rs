//! Upstream listing access: wire types, the HTTP page source, and the paced
//! retrying fetcher the collector drives.

pub mod client;
pub mod fetcher;
pub mod page;

pub use client::{HttpPageSource, PageSource};
pub use fetcher::{RateLimitedFetcher, RetryPolicy, UPSTREAM_MAX_PAGE_SIZE};
pub use page::{Page, UpstreamRecord};
