//! Badge → webhook embed rendering.

use serde::{Deserialize, Serialize};

use badgewatch_common::types::Badge;

/// Embed side colour (a warm orange).
pub const EMBED_COLOR: u32 = 16762779;

pub const NO_DESCRIPTION: &str = "None.";
pub const UNKNOWN_TIME: &str = "Unknown";
pub const UNKNOWN_GAME: &str = "Unknown Game";

// Discord limits.
const MAX_TITLE_CHARS: usize = 256;
const MAX_FIELD_CHARS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

/// One rendered notification for one badge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub thumbnail: EmbedImage,
    pub author: EmbedAuthor,
    pub footer: EmbedFooter,
}

/// Static text around every embed.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedStyle {
    pub author: String,
    pub footer: String,
    pub footer_icon: Option<String>,
}

impl Default for EmbedStyle {
    fn default() -> Self {
        Self {
            author: "New Badge Uploaded".to_string(),
            footer: "badgewatch".to_string(),
            footer_icon: None,
        }
    }
}

/// Render `badge` with the given thumbnail (may be empty).
pub fn render(badge: &Badge, thumbnail_url: &str, style: &EmbedStyle) -> Embed {
    let description = badge
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(NO_DESCRIPTION);

    Embed {
        title: truncate(&badge.name, MAX_TITLE_CHARS),
        url: format!("https://www.roblox.com/badges/{}/", badge.id),
        color: EMBED_COLOR,
        fields: vec![
            field("Badge ID", badge.id.to_string(), true),
            field("Game Name", game_label(badge), true),
            field("Creation Time", creation_label(badge), false),
            field("Description", description.to_string(), false),
        ],
        thumbnail: EmbedImage {
            url: thumbnail_url.to_string(),
        },
        author: EmbedAuthor {
            name: style.author.clone(),
        },
        footer: EmbedFooter {
            text: style.footer.clone(),
            icon_url: style.footer_icon.clone(),
        },
    }
}

fn field(name: &str, value: String, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: truncate(&value, MAX_FIELD_CHARS),
        inline,
    }
}

/// Game name, as a markdown link when the root place is known.
fn game_label(badge: &Badge) -> String {
    let universe = badge.awarding_universe.as_ref();
    let name = universe
        .and_then(|u| u.name.as_deref())
        .filter(|n| !n.is_empty())
        .unwrap_or(UNKNOWN_GAME);

    match universe.and_then(|u| u.place_id()) {
        Some(place_id) => format!("[{name}](https://www.roblox.com/games/{place_id}/game)"),
        None => name.to_string(),
    }
}

/// Discord timestamp markup for the creation time, or "Unknown".
fn creation_label(badge: &Badge) -> String {
    match badge.created_at() {
        Some(ts) => format!("<t:{}:f>", ts.timestamp()),
        None => {
            tracing::warn!(
                badge_id = %badge.id,
                created = badge.created.as_deref().unwrap_or(""),
                "Unparsable badge creation time"
            );
            UNKNOWN_TIME.to_string()
        }
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}
