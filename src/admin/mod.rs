pub mod cache;
pub mod handlers;

pub use cache::ListingCache;
