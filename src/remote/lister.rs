//! Paginated walk over the remote listing.
//!
//! Pages are fetched strictly one at a time. The listing is newest-first,
//! so once `early_stop_pages` consecutive pages contain nothing new there is
//! nothing further back worth fetching. Full sync disables that cutoff.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::error::{ListingError, RemoteApiError};
use super::page::parse_page;
use crate::item::{Item, KnownIds};
use crate::transport::RetryingTransport;

/// Pagination tunables.
#[derive(Debug, Clone, Copy)]
pub struct ListingConfig {
    pub page_size: usize,
    /// Consecutive fully-known pages before stopping. Zero disables early stop.
    pub early_stop_pages: u32,
    /// Pause between page fetches, independent of retry backoff.
    pub page_delay: Duration,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            early_stop_pages: 2,
            page_delay: Duration::from_millis(1_000),
        }
    }
}

/// Per-call listing options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub full_sync: bool,
}

/// Why pagination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page came back empty.
    EndOfListing,
    /// Enough consecutive pages held only known ids.
    EarlyStop,
    /// Accumulated items reached the requested limit.
    Limit,
    /// `ceil(limit / page_size)` pages were fetched.
    PageCap,
}

/// Everything fetched by one listing pass, in listing order.
#[derive(Debug)]
pub struct Listing {
    pub items: Vec<Item>,
    pub pages_fetched: u32,
    pub stop: StopReason,
}

pub struct RemoteLister {
    transport: Arc<RetryingTransport>,
    listing_url: String,
    bearer: String,
    config: ListingConfig,
}

impl std::fmt::Debug for RemoteLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteLister")
            .field("listing_url", &self.listing_url)
            .field("bearer", &"<redacted>")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RemoteLister {
    pub fn new(
        transport: Arc<RetryingTransport>,
        listing_url: impl Into<String>,
        bearer: impl Into<String>,
        config: ListingConfig,
    ) -> Self {
        Self {
            transport,
            listing_url: listing_url.into(),
            bearer: bearer.into(),
            config,
        }
    }

    /// Walk the listing from page 0.
    ///
    /// `known` is consulted per page, so ids added by a concurrent download
    /// pass count as known from the next page on.
    pub async fn fetch_all(
        &self,
        known: &KnownIds,
        options: ListOptions,
    ) -> Result<Listing, ListingError> {
        let early_stop = !options.full_sync && self.config.early_stop_pages > 0 && !known.is_empty();
        // A cap too large for the page counter is no cap at all.
        let page_cap = options.limit.map(|limit| {
            u32::try_from(limit.div_ceil(self.config.page_size.max(1))).unwrap_or(u32::MAX)
        });

        let mut items: Vec<Item> = Vec::new();
        let mut pages_fetched: u32 = 0;
        let mut all_known_streak: u32 = 0;

        let stop = loop {
            if page_cap.is_some_and(|cap| pages_fetched >= cap) {
                break StopReason::PageCap;
            }
            if pages_fetched > 0 && !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }

            let url = page_url(&self.listing_url, pages_fetched);
            let response = self.transport.request(&url, &self.bearer).await?;
            if !response.is_success() {
                return Err(RemoteApiError::Status {
                    status: response.status,
                    url,
                }
                .into());
            }
            let page = parse_page(&url, &response.body)?;
            pages_fetched += 1;

            if page.is_empty() {
                debug!(page = pages_fetched - 1, "Empty listing page, end of library");
                break StopReason::EndOfListing;
            }

            let new_count = page.iter().filter(|item| !known.contains(&item.id)).count();
            debug!(
                page = pages_fetched - 1,
                items = page.len(),
                new = new_count,
                "Fetched listing page"
            );
            items.extend(page);

            if options.limit.is_some_and(|limit| items.len() >= limit) {
                break StopReason::Limit;
            }

            if early_stop {
                if new_count == 0 {
                    all_known_streak += 1;
                    if all_known_streak >= self.config.early_stop_pages {
                        break StopReason::EarlyStop;
                    }
                } else {
                    all_known_streak = 0;
                }
            }
        };

        tracing::info!(
            "Listing finished after {} pages ({:?}): {} items",
            pages_fetched,
            stop,
            items.len()
        );
        Ok(Listing {
            items,
            pages_fetched,
            stop,
        })
    }
}

/// Append the page parameter to the listing URL.
pub fn page_url(listing_url: &str, page: u32) -> String {
    let sep = if listing_url.contains('?') { '&' } else { '?' };
    format!("{listing_url}{sep}page={page}")
}
