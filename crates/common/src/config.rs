use serde::Deserialize;

/// Default role mention placed in every batch message's `content`.
const DEFAULT_MENTION: &str = "";

const DEFAULT_EMBED_AUTHOR: &str = "New Badge Uploaded";
const DEFAULT_EMBED_FOOTER: &str = "badgewatch";

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Webhook receiving batched badge notifications (required)
    pub webhook_url: String,

    /// Optional webhook receiving one message per new badge
    pub secondary_webhook_url: Option<String>,

    /// Role/recipient tag sent as the message `content` of each batch
    pub webhook_mention: String,

    /// Newline-delimited list of universe ids (default: games.txt)
    pub universes_path: String,

    /// Snapshot of every badge seen so far (default: badges.json)
    pub snapshot_path: String,

    /// Maximum number of universes fetched concurrently (default: 50)
    pub max_concurrent_universes: usize,

    /// Per-request HTTP timeout in seconds (default: 10)
    pub http_timeout_seconds: u64,

    /// Delay between passes. Unset means run a single pass and exit.
    pub poll_interval_seconds: Option<u64>,

    /// Whether badges of a universe seen for the first time are announced (default: true)
    pub notify_on_first_sight: bool,

    /// Base URL of the badge catalog API
    pub catalog_base_url: String,

    /// Base URL of the thumbnail API
    pub thumbnail_base_url: String,

    /// Embed author line
    pub embed_author: String,

    /// Embed footer text
    pub embed_footer: String,

    /// Embed footer icon URL
    pub embed_footer_icon: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let webhook_url = std::env::var("WEBHOOK_URL")
            .map_err(|_| anyhow::anyhow!("WEBHOOK_URL environment variable is required"))?;
        if webhook_url.trim().is_empty() {
            anyhow::bail!("WEBHOOK_URL must not be empty");
        }

        Ok(Self {
            webhook_url,
            secondary_webhook_url: non_blank(std::env::var("SECONDARY_WEBHOOK_URL").ok()),
            webhook_mention: std::env::var("WEBHOOK_MENTION")
                .unwrap_or_else(|_| DEFAULT_MENTION.to_string()),
            universes_path: std::env::var("UNIVERSES_PATH")
                .unwrap_or_else(|_| "games.txt".to_string()),
            snapshot_path: std::env::var("SNAPSHOT_PATH")
                .unwrap_or_else(|_| "badges.json".to_string()),
            max_concurrent_universes: std::env::var("MAX_CONCURRENT_UNIVERSES")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_CONCURRENT_UNIVERSES must be a valid usize"))?,
            http_timeout_seconds: std::env::var("HTTP_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_TIMEOUT_SECONDS must be a valid u64"))?,
            poll_interval_seconds: match std::env::var("POLL_INTERVAL_SECONDS") {
                Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().parse().map_err(|_| {
                    anyhow::anyhow!("POLL_INTERVAL_SECONDS must be a valid u64")
                })?),
                _ => None,
            },
            notify_on_first_sight: parse_flag(
                "NOTIFY_ON_FIRST_SIGHT",
                std::env::var("NOTIFY_ON_FIRST_SIGHT").ok().as_deref(),
                true,
            )?,
            catalog_base_url: std::env::var("CATALOG_BASE_URL")
                .unwrap_or_else(|_| "https://badges.roblox.com".to_string()),
            thumbnail_base_url: std::env::var("THUMBNAIL_BASE_URL")
                .unwrap_or_else(|_| "https://thumbnails.roblox.com".to_string()),
            embed_author: std::env::var("EMBED_AUTHOR")
                .unwrap_or_else(|_| DEFAULT_EMBED_AUTHOR.to_string()),
            embed_footer: std::env::var("EMBED_FOOTER")
                .unwrap_or_else(|_| DEFAULT_EMBED_FOOTER.to_string()),
            embed_footer_icon: non_blank(std::env::var("EMBED_FOOTER_ICON").ok()),
        })
    }
}

/// Treat a set-but-blank optional variable as unset.
fn non_blank(raw: Option<String>) -> Option<String> {
    raw.filter(|v| !v.trim().is_empty())
}

/// Parse a boolean switch, accepting the usual spellings.
fn parse_flag(name: &str, raw: Option<&str>, default: bool) -> anyhow::Result<bool> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!("{name} must be a boolean, got '{raw}'")),
    }
}
