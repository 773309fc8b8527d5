use thiserror::Error;

use crate::transport::TransportError;

/// The listing endpoint answered, but not with something usable.
#[derive(Debug, Error)]
pub enum RemoteApiError {
    #[error("listing request {url} returned HTTP {status}")]
    Status { status: u16, url: String },

    #[error("listing response from {url} is not JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("listing response from {url} has no item array (found keys: {})", .keys.join(", "))]
    UnrecognizedShape { url: String, keys: Vec<String> },
}

/// Any failure that aborts a listing pass.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Api(#[from] RemoteApiError),
}
