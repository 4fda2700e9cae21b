use serde::Deserialize;

use badgewatch_common::types::BadgeId;

use crate::pager::CatalogClient;

#[derive(Debug, Deserialize)]
struct ThumbnailResponse {
    #[serde(default)]
    data: Vec<ThumbnailEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThumbnailEntry {
    image_url: Option<String>,
}

impl CatalogClient {
    fn thumbnail_lookup_url(&self, badge_id: &BadgeId) -> String {
        format!(
            "{}/v1/badges/icons?badgeIds={}&size=150x150&format=Png&isCircular=false",
            self.thumbnail_base_url,
            urlencoding::encode(badge_id.as_str())
        )
    }

    /// Icon URL for a badge, or an empty string when there is none or the
    /// lookup failed. Never an error: a missing thumbnail must not hold up
    /// the notification.
    pub async fn thumbnail_url(&self, badge_id: &BadgeId) -> String {
        let url = self.thumbnail_lookup_url(badge_id);
        match self.http.fetch_json::<ThumbnailResponse>(&url).await {
            Ok(response) => response
                .data
                .into_iter()
                .next()
                .and_then(|entry| entry.image_url)
                .unwrap_or_default(),
            Err(failure) => {
                tracing::debug!(badge_id = %badge_id, error = %failure, "No thumbnail");
                String::new()
            }
        }
    }
}
