use std::collections::HashSet;

use serde::Deserialize;

use badgewatch_common::types::Badge;

use crate::client::{BackoffClient, FetchFailure};

/// Page size requested from the listing endpoint (the API maximum).
pub const PAGE_SIZE: u32 = 100;

/// One page of the badge listing endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BadgePage {
    data: Option<Vec<serde_json::Value>>,
    next_page_cursor: Option<String>,
}

/// Every badge a universe currently lists, as far as the walk got.
#[derive(Debug, Clone, Default)]
pub struct BadgeListing {
    pub badges: Vec<Badge>,
    pub pages: u32,
    /// `false` when the walk stopped on a failure rather than the last page.
    pub complete: bool,
    pub failure: Option<FetchFailure>,
}

/// Client for the badge catalog and thumbnail APIs.
#[derive(Clone)]
pub struct CatalogClient {
    pub(crate) http: BackoffClient,
    pub(crate) catalog_base_url: String,
    pub(crate) thumbnail_base_url: String,
}

impl CatalogClient {
    pub fn new(
        http: BackoffClient,
        catalog_base_url: impl Into<String>,
        thumbnail_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            catalog_base_url: catalog_base_url.into().trim_end_matches('/').to_string(),
            thumbnail_base_url: thumbnail_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn listing_url(&self, universe_id: &str, cursor: Option<&str>) -> String {
        let mut url = format!(
            "{}/v1/universes/{}/badges?limit={}&sortOrder=Asc",
            self.catalog_base_url,
            urlencoding::encode(universe_id),
            PAGE_SIZE
        );
        if let Some(cursor) = cursor {
            url.push_str("&cursor=");
            url.push_str(&urlencoding::encode(cursor));
        }
        url
    }

    /// Walk the listing for `universe_id` until the cursor runs out.
    ///
    /// A failed page ends the walk; whatever was collected before it is still
    /// returned. Badges that do not decode are skipped and logged.
    pub async fn fetch_all_badges(&self, universe_id: &str) -> BadgeListing {
        let mut listing = BadgeListing::default();
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();

        loop {
            let url = self.listing_url(universe_id, cursor.as_deref());
            let page: BadgePage = match self.http.fetch_json(&url).await {
                Ok(page) => page,
                Err(failure) => {
                    tracing::warn!(
                        universe_id,
                        pages = listing.pages,
                        badges = listing.badges.len(),
                        error = %failure,
                        "Badge listing incomplete"
                    );
                    listing.failure = Some(failure);
                    return listing;
                }
            };
            listing.pages += 1;

            let Some(items) = page.data else {
                tracing::debug!(universe_id, "Listing page without data, stopping");
                break;
            };

            for item in items {
                match serde_json::from_value::<Badge>(item) {
                    Ok(badge) => listing.badges.push(badge),
                    Err(e) => {
                        tracing::warn!(universe_id, error = %e, "Skipping undecodable badge")
                    }
                }
            }

            match page.next_page_cursor.filter(|c| !c.is_empty()) {
                Some(next) if !seen_cursors.insert(next.clone()) => {
                    tracing::warn!(universe_id, cursor = %next, "Listing cursor repeated, stopping");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        listing.complete = true;
        tracing::debug!(
            universe_id,
            pages = listing.pages,
            badges = listing.badges.len(),
            "Fetched badge listing"
        );
        listing
    }
}
