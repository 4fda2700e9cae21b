//! Notification delivery for newly discovered badges.
//!
//! - `embed`: renders one badge into a webhook embed
//! - `dispatcher`: dedupes, batches (10 embeds per message) and delivers with retry
//! - `secondary`: optional one-message-per-badge channel, best effort

pub mod dispatcher;
pub mod embed;
pub mod secondary;

pub use dispatcher::{BatchOutcome, DispatchStats, DispatcherPhase, EnqueueOutcome, WebhookDispatcher};
pub use embed::{Embed, EmbedStyle};
pub use secondary::{ItemNotifier, NotifyError, SecondaryWebhook};
