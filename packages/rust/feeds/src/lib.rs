//! Syndication feed retrieval for ContentForge.
//!
//! - [`parse_feed`]: RSS 2.0 / Atom documents → normalized [`FeedEntry`] values
//! - [`FeedFetcher`] / [`HttpFeedFetcher`]: HTTP retrieval
//! - [`normalize_text`]: entity decoding, markup stripping, whitespace collapsing
//!
//! [`FeedEntry`]: contentforge_shared::FeedEntry

mod fetcher;
mod normalize;
mod parser;

pub use fetcher::{FeedFetcher, HttpFeedFetcher};
pub use normalize::{fallback_guid, normalize_text};
pub use parser::parse_feed;
