use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::Result;

use crate::config::DiscoveryConfig;
use crate::database::Database;
use crate::entities::task_status::TaskCounters;
use crate::ports::spotify::SharedSpotifyApi;
use crate::services::playlist::{PlaylistService, Upserted};
use crate::services::tasks::{RunContext, RunOutcome};

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub keywords: Vec<String>,
    /// Search results considered per keyword, duplicates included
    pub max_per_keyword: usize,
    /// Distinct playlists explored over the whole run
    pub max_total: usize,
    pub page_size: u32,
    pub page_delay: Duration,
}

impl From<&DiscoveryConfig> for DiscoveryOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            keywords: config.keywords.clone(),
            max_per_keyword: config.max_per_keyword,
            max_total: config.max_total,
            page_size: config.page_size,
            page_delay: config.page_delay,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryCounters {
    pub created: i64,
    pub updated: i64,
    pub explored: i64,
}

impl From<DiscoveryCounters> for TaskCounters {
    fn from(counters: DiscoveryCounters) -> Self {
        TaskCounters(
            [
                ("created".to_string(), counters.created),
                ("updated".to_string(), counters.updated),
                ("explored".to_string(), counters.explored),
            ]
            .into_iter()
            .collect(),
        )
    }
}

/// Search every keyword for playlists and store the ones found.
///
/// Playlists are only stored here; whether they contain any of our tracks is
/// left to the scan.
#[tracing::instrument(skip_all, fields(keywords = options.keywords.len(), max_total = options.max_total))]
pub async fn run(
    ctx: &RunContext,
    api: SharedSpotifyApi,
    db: Arc<Database>,
    options: &DiscoveryOptions,
) -> Result<RunOutcome> {
    let playlists = PlaylistService::new(db);
    let total = options.max_total as i64;
    let mut counters = DiscoveryCounters::default();
    let mut seen: HashSet<String> = HashSet::new();

    ctx.report(0, total, counters).await;

    'keywords: for keyword in &options.keywords {
        let mut considered = 0usize;
        let mut offset = 0u32;

        while considered < options.max_per_keyword && seen.len() < options.max_total {
            if ctx.should_stop().await {
                return Ok(RunOutcome::Stopped);
            }

            let page = match api
                .search_playlists(keyword, options.page_size, offset)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(%keyword, error = %e, "Playlist search failed, skipping keyword");
                    continue 'keywords;
                }
            };
            if page.fetched == 0 {
                break;
            }
            offset += page.fetched;

            for summary in page.items {
                if considered >= options.max_per_keyword || seen.len() >= options.max_total {
                    break;
                }
                considered += 1;
                if !seen.insert(summary.id.clone()) {
                    continue;
                }
                if ctx.should_stop().await {
                    return Ok(RunOutcome::Stopped);
                }

                let scanned_at = chrono::Utc::now().timestamp();
                let (_, outcome) = playlists
                    .upsert_from_summary(&summary, Some(scanned_at))
                    .await?;
                counters.explored += 1;
                match outcome {
                    Upserted::Created => counters.created += 1,
                    Upserted::Updated => counters.updated += 1,
                }
                ctx.report(counters.explored, total, counters).await;
            }

            ctx.pause(options.page_delay).await;
            if !page.has_more {
                break;
            }
        }

        tracing::debug!(%keyword, considered, "Keyword done");
        if seen.len() >= options.max_total {
            tracing::info!("Reached the discovery limit");
            break;
        }
    }

    tracing::info!(
        created = counters.created,
        updated = counters.updated,
        explored = counters.explored,
        "Discovery finished"
    );
    Ok(RunOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::spotify::{MockSpotifyApi, SearchPage, SpotifyApiError};
    use crate::services::tasks::TaskKind;
    use crate::services::tasks::status::TaskStatusStore;
    use crate::test_utils::{summary, test_db};
    use tokio_util::sync::CancellationToken;

    fn options(keywords: &[&str]) -> DiscoveryOptions {
        DiscoveryOptions {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            max_per_keyword: 200,
            max_total: 1000,
            page_size: 50,
            page_delay: Duration::ZERO,
        }
    }

    fn page(ids: &[&str], has_more: bool) -> SearchPage {
        SearchPage {
            items: ids.iter().map(|id| summary(id, &format!("Playlist {id}"))).collect(),
            fetched: ids.len() as u32,
            has_more,
        }
    }

    async fn context(db: &Arc<Database>, cancel: CancellationToken) -> RunContext {
        let status = TaskStatusStore::new(db.clone());
        status.begin(TaskKind::Discover.name(), 0).await.unwrap();
        RunContext::new(TaskKind::Discover, cancel, status)
    }

    async fn stored_ids(db: &Arc<Database>) -> Vec<String> {
        let mut ids: Vec<_> = PlaylistService::new(db.clone())
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.spotify_id)
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_running_twice_does_not_duplicate_playlists() {
        let db = test_db().await;
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists()
            .returning(|keyword, _, _| match keyword {
                "chill" => Ok(page(&["a", "b"], false)),
                _ => Ok(page(&["b", "c"], false)),
            });
        let api: SharedSpotifyApi = Arc::new(api);

        let ctx = context(&db, CancellationToken::new()).await;
        let outcome = run(&ctx, api.clone(), db.clone(), &options(&["chill", "indie"]))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let view = TaskStatusStore::new(db.clone()).view("discover").await.unwrap();
        assert_eq!(view.extra.get("created"), Some(&3));
        assert_eq!(view.extra.get("explored"), Some(&3));

        let ctx = context(&db, CancellationToken::new()).await;
        run(&ctx, api, db.clone(), &options(&["chill", "indie"]))
            .await
            .unwrap();

        assert_eq!(stored_ids(&db).await, vec!["a", "b", "c"]);
        let view = TaskStatusStore::new(db.clone()).view("discover").await.unwrap();
        assert_eq!(view.extra.get("created"), Some(&0));
        assert_eq!(view.extra.get("updated"), Some(&3));
    }

    #[tokio::test]
    async fn test_pages_until_empty_page() {
        let db = test_db().await;
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists()
            .returning(|_, limit, offset| {
                assert_eq!(limit, 50);
                match offset {
                    0 => Ok(page(&["a", "b"], true)),
                    2 => Ok(page(&["c"], true)),
                    _ => Ok(page(&[], false)),
                }
            })
            .times(3);

        let ctx = context(&db, CancellationToken::new()).await;
        run(&ctx, Arc::new(api), db.clone(), &options(&["chill"]))
            .await
            .unwrap();

        assert_eq!(stored_ids(&db).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_removed_playlists_still_advance_the_offset() {
        let db = test_db().await;
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists()
            .returning(|_, limit, offset| match offset {
                // 48 of the 50 entries were removed playlists
                0 => Ok(SearchPage {
                    fetched: limit,
                    ..page(&["a", "b"], true)
                }),
                // A page holding nothing but removed playlists
                50 => Ok(SearchPage {
                    fetched: limit,
                    ..page(&[], true)
                }),
                100 => Ok(page(&["c"], false)),
                _ => panic!("unexpected offset {offset}"),
            })
            .times(3);

        let ctx = context(&db, CancellationToken::new()).await;
        run(&ctx, Arc::new(api), db.clone(), &options(&["chill"]))
            .await
            .unwrap();

        assert_eq!(stored_ids(&db).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_respects_per_keyword_and_global_limits() {
        let db = test_db().await;
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists()
            .returning(|keyword, _, _| match keyword {
                "chill" => Ok(page(&["a", "b", "c"], true)),
                "indie" => Ok(page(&["d", "e", "f"], true)),
                _ => panic!("global limit should stop before {keyword}"),
            });

        let mut options = options(&["chill", "indie", "rock"]);
        options.max_per_keyword = 2;
        options.max_total = 3;

        let ctx = context(&db, CancellationToken::new()).await;
        run(&ctx, Arc::new(api), db.clone(), &options)
            .await
            .unwrap();

        assert_eq!(stored_ids(&db).await, vec!["a", "b", "d"]);
    }

    #[tokio::test]
    async fn test_failed_search_skips_keyword() {
        let db = test_db().await;
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists()
            .returning(|keyword, _, _| match keyword {
                "chill" => Err(SpotifyApiError::Transient("connection reset".into())),
                _ => Ok(page(&["a"], false)),
            });

        let ctx = context(&db, CancellationToken::new()).await;
        let outcome = run(&ctx, Arc::new(api), db.clone(), &options(&["chill", "indie"]))
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(stored_ids(&db).await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_stop_during_search_processes_no_further_playlists() {
        let db = test_db().await;
        let cancel = CancellationToken::new();
        let mut api = MockSpotifyApi::new();
        {
            let cancel = cancel.clone();
            api.expect_search_playlists()
                .returning(move |keyword, _, _| match keyword {
                    "chill" => Ok(page(&["a", "b"], false)),
                    _ => {
                        // Stop arrives while this call is in flight
                        cancel.cancel();
                        Ok(page(&["c", "d"], false))
                    }
                })
                .times(2);
        }

        let ctx = context(&db, cancel).await;
        let outcome = run(&ctx, Arc::new(api), db.clone(), &options(&["chill", "indie", "rock"]))
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(stored_ids(&db).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_persisted_stop_flag_is_honoured() {
        let db = test_db().await;
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists().never();

        let ctx = context(&db, CancellationToken::new()).await;
        TaskStatusStore::new(db.clone())
            .request_stop("discover")
            .await
            .unwrap();

        let outcome = run(&ctx, Arc::new(api), db.clone(), &options(&["chill"]))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
    }
}
