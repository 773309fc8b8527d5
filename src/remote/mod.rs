//! Remote library listing: page decoding and the paginating lister.

pub mod error;
pub mod lister;
pub mod page;

pub use error::{ListingError, RemoteApiError};
pub use lister::{ListOptions, Listing, ListingConfig, RemoteLister, StopReason};
