pub mod cycle;
pub mod fetcher;

pub use cycle::Ingestor;
pub use fetcher::FeedFetcher;
