//! Removes duplicate lines from the universe id list, in place.
//!
//! Usage: `dedupe-universes [PATH]` (default: `$UNIVERSES_PATH` or `games.txt`).

use anyhow::Context;

use badgewatch_engine::universes::dedupe_lines;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dedupe_universes=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("UNIVERSES_PATH").ok())
        .unwrap_or_else(|| "games.txt".to_string());

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {path}"))?;
    let report = dedupe_lines(&content);

    let mut output = report.unique.join("\n");
    if !output.is_empty() {
        output.push('\n');
    }
    tokio::fs::write(&path, output)
        .await
        .with_context(|| format!("failed to write {path}"))?;

    tracing::info!(
        path = %path,
        kept = report.unique.len(),
        removed = report.removed,
        "Duplicate universe ids removed"
    );
    Ok(())
}
