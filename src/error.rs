//! Crate-wide result alias.
//!
//! Domain-specific error enums live next to the code that produces them
//! ([`crate::data::tasks::QueueError`], [`crate::crawler::CrawlError`]);
//! everything else propagates through `anyhow`.

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
