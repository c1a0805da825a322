//! Background synchronisation of portfolio works from their public pages.
//!
//! Runs as a detached task behind `POST /admin/sync/works`. Each item is
//! fetched, scraped, and upserted independently: one failing page is logged
//! and skipped, never aborting the rest of the batch.

use crate::{entity::work, routes::work::WORKS_CACHE_KEY, state::AppState};
use sea_orm::{ActiveValue::Set, EntityTrait, sea_query::OnConflict};
use std::time::Duration;

const SOURCE_BASE_URL: &str = "https://protopedia.net/prototype";

/// Pause between fetches to stay polite to the source site
const FETCH_PAUSE: Duration = Duration::from_millis(500);

pub struct SyncReport {
    pub total: usize,
    pub synced: usize,
}

pub fn ids_from_env() -> Vec<String> {
    std::env::var("SYNC_WORK_IDS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

pub async fn run_works_sync(state: AppState, ids: Vec<String>) -> SyncReport {
    let total = ids.len();
    let mut synced = 0;

    for (index, id) in ids.iter().enumerate() {
        let url = format!("{}/{}", SOURCE_BASE_URL, id);
        tracing::info!(current = index + 1, total, url = %url, "Fetching work");

        match sync_one(&state, id, &url).await {
            Ok(()) => synced += 1,
            Err(err) => {
                tracing::error!(work_id = %id, "Failed to sync work: {}", err);
            }
        }

        tokio::time::sleep(FETCH_PAUSE).await;
    }

    state.invalidate_cache(WORKS_CACHE_KEY);

    SyncReport { total, synced }
}

async fn sync_one(state: &AppState, id: &str, url: &str) -> archive_os_types::Result<()> {
    let response = state.http_client.get(url).send().await?;
    if !response.status().is_success() {
        archive_os_types::bail!("HTTP {}", response.status());
    }
    let html = response.text().await?;
    let scraped = scrape_work(&html);

    let now = chrono::Utc::now().naive_utc();
    let model = work::ActiveModel {
        id: Set(archive_os_types::create_id()),
        external_id: Set(id.to_string()),
        title: Set(scraped.title),
        summary: Set(scraped.summary),
        url: Set(Some(url.to_string())),
        thumbnail_url: Set(scraped.thumbnail_url),
        like_count: Set(0),
        published_at: Set(Some(now)),
        source: Set("protopedia".to_string()),
        tags: Set(serde_json::json!(["Protopedia"])),
        created_at: Set(now),
        updated_at: Set(now),
    };

    work::Entity::insert(model)
        .on_conflict(
            OnConflict::column(work::Column::ExternalId)
                .update_columns([
                    work::Column::Title,
                    work::Column::Summary,
                    work::Column::ThumbnailUrl,
                    work::Column::Tags,
                    work::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec(&state.db)
        .await?;

    Ok(())
}

struct ScrapedWork {
    title: String,
    summary: Option<String>,
    thumbnail_url: Option<String>,
}

fn scrape_work(html: &str) -> ScrapedWork {
    let title = extract_between(html, "<title>", "</title>")
        // source pages suffix the site name after " | "
        .map(|t| t.split(" | ").next().unwrap_or(t).trim().to_string())
        .unwrap_or_default();

    let summary = extract_between(html, r#"<meta name="description" content=""#, "\"")
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    let thumbnail_url = extract_between(html, r#"<meta property="og:image" content=""#, "\"")
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    ScrapedWork {
        title,
        summary,
        thumbnail_url,
    }
}

fn extract_between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(&text[from..from + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = concat!(
        "<html><head><title>Sushi Piano | Prototype Sharing</title>",
        r#"<meta name="description" content="A gaming piano made of sushi.">"#,
        r#"<meta property="og:image" content="https://example.com/thumb.jpg">"#,
        "</head><body></body></html>",
    );

    #[test]
    fn extracts_marked_sections() {
        assert_eq!(extract_between("a<b>c</b>d", "<b>", "</b>"), Some("c"));
        assert_eq!(extract_between("no markers here", "<b>", "</b>"), None);
        assert_eq!(extract_between("<b>unterminated", "<b>", "</b>"), None);
    }

    #[test]
    fn scrapes_title_summary_and_thumbnail() {
        let scraped = scrape_work(PAGE);
        assert_eq!(scraped.title, "Sushi Piano");
        assert_eq!(
            scraped.summary.as_deref(),
            Some("A gaming piano made of sushi.")
        );
        assert_eq!(
            scraped.thumbnail_url.as_deref(),
            Some("https://example.com/thumb.jpg")
        );
    }

    #[test]
    fn scraping_a_bare_page_yields_empty_fields() {
        let scraped = scrape_work("<html></html>");
        assert!(scraped.title.is_empty());
        assert!(scraped.summary.is_none());
        assert!(scraped.thumbnail_url.is_none());
    }
}
