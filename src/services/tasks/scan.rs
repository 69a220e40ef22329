use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::Result;

use crate::config::ScanConfig;
use crate::database::Database;
use crate::entities;
use crate::entities::task_status::TaskCounters;
use crate::ports::spotify::{PlaylistSummary, SharedSpotifyApi};
use crate::services::appearance::AppearanceService;
use crate::services::playlist::PlaylistService;
use crate::services::spotify::membership::{MembershipError, MembershipService, MembershipSource};
use crate::services::tasks::{RunContext, RunOutcome};
use crate::services::track::TrackService;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Used for tracks stored without an artist name
    pub default_artist_hint: Option<String>,
    pub search_limit: u32,
    pub page_delay: Duration,
}

impl From<&ScanConfig> for ScanOptions {
    fn from(config: &ScanConfig) -> Self {
        Self {
            default_artist_hint: config.default_artist_hint.clone(),
            search_limit: config.search_limit,
            page_delay: config.page_delay,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanCounters {
    pub tracks_scanned: i64,
    pub playlists_checked: i64,
    pub cache_hits: i64,
    pub created: i64,
    pub updated: i64,
}

impl From<ScanCounters> for TaskCounters {
    fn from(counters: ScanCounters) -> Self {
        TaskCounters(
            [
                ("tracks_scanned".to_string(), counters.tracks_scanned),
                ("playlists_checked".to_string(), counters.playlists_checked),
                ("cache_hits".to_string(), counters.cache_hits),
                ("created".to_string(), counters.created),
                ("updated".to_string(), counters.updated),
            ]
            .into_iter()
            .collect(),
        )
    }
}

/// Playlist search queries for a track, most specific first.
pub fn search_queries(track_name: &str, artist_hint: Option<&str>) -> Vec<String> {
    let track_name = track_name.trim();
    let candidates = match artist_hint.map(str::trim).filter(|a| !a.is_empty()) {
        Some(artist) => vec![
            format!("\"{track_name}\" \"{artist}\""),
            format!("{track_name} {artist}"),
            format!("\"{artist}\""),
        ],
        None => vec![format!("\"{track_name}\""), track_name.to_string()],
    };

    let mut queries = Vec::with_capacity(candidates.len());
    for query in candidates {
        if !queries.contains(&query) {
            queries.push(query);
        }
    }
    queries
}

struct Scanner {
    api: SharedSpotifyApi,
    playlists: PlaylistService,
    appearances: AppearanceService,
    membership: MembershipService,
    options: ScanOptions,
}

/// Look for every stored track in the playlists returned by a few searches,
/// recording an appearance for each playlist that really contains it.
#[tracing::instrument(skip_all)]
pub async fn run(
    ctx: &RunContext,
    api: SharedSpotifyApi,
    db: Arc<Database>,
    options: &ScanOptions,
) -> Result<RunOutcome> {
    let tracks = TrackService::new(db.clone()).list().await?;
    let total = tracks.len() as i64;
    let scanner = Scanner {
        membership: MembershipService::new(db.clone(), api.clone()),
        playlists: PlaylistService::new(db.clone()),
        appearances: AppearanceService::new(db),
        api,
        options: options.clone(),
    };

    let mut counters = ScanCounters::default();
    ctx.report(0, total, counters).await;

    for track in &tracks {
        if scanner.scan_track(ctx, track, &mut counters, total).await? == RunOutcome::Stopped {
            return Ok(RunOutcome::Stopped);
        }
        counters.tracks_scanned += 1;
        ctx.report(counters.tracks_scanned, total, counters).await;
    }

    tracing::info!(
        tracks = counters.tracks_scanned,
        created = counters.created,
        updated = counters.updated,
        cache_hits = counters.cache_hits,
        "Scan finished"
    );
    Ok(RunOutcome::Completed)
}

impl Scanner {
    #[tracing::instrument(skip_all, fields(track = %track.spotify_id))]
    async fn scan_track(
        &self,
        ctx: &RunContext,
        track: &entities::track::Model,
        counters: &mut ScanCounters,
        total: i64,
    ) -> Result<RunOutcome> {
        let artist_hint = track
            .artist_name
            .as_deref()
            .or(self.options.default_artist_hint.as_deref());
        let mut seen: HashSet<String> = HashSet::new();

        for query in search_queries(&track.name, artist_hint) {
            if ctx.should_stop().await {
                return Ok(RunOutcome::Stopped);
            }

            let page = match self
                .api
                .search_playlists(&query, self.options.search_limit, 0)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(%query, error = %e, "Playlist search failed, skipping track");
                    return Ok(RunOutcome::Completed);
                }
            };

            for candidate in page.items {
                if !seen.insert(candidate.id.clone()) {
                    continue;
                }
                if ctx.should_stop().await {
                    return Ok(RunOutcome::Stopped);
                }
                self.check_candidate(track, &candidate, counters).await?;
                ctx.report(counters.tracks_scanned, total, *counters).await;
            }

            ctx.pause(self.options.page_delay).await;
        }

        Ok(RunOutcome::Completed)
    }

    async fn check_candidate(
        &self,
        track: &entities::track::Model,
        candidate: &PlaylistSummary,
        counters: &mut ScanCounters,
    ) -> Result<()> {
        counters.playlists_checked += 1;

        let membership = match self.membership.membership(&candidate.id).await {
            Ok(membership) => membership,
            Err(MembershipError::Api(e)) => {
                tracing::warn!(playlist = %candidate.id, error = %e, "Could not list playlist tracks, skipping");
                return Ok(());
            }
            Err(e @ MembershipError::Database(_)) => return Err(e.into()),
        };
        if membership.source == MembershipSource::Cache {
            counters.cache_hits += 1;
        }
        if !membership.contains(&track.spotify_id) {
            return Ok(());
        }

        // Search results lack the follower count, so fetch the full playlist
        let (playlist, _) = match self.api.playlist_details(&candidate.id).await {
            Ok(details) => self.playlists.upsert_from_details(&details).await?,
            Err(e) => {
                tracing::warn!(playlist = %candidate.id, error = %e, "Could not fetch playlist details");
                self.playlists.upsert_from_summary(candidate, None).await?
            }
        };

        if self
            .appearances
            .upsert_confirmed(track.id, playlist.id)
            .await?
        {
            tracing::info!(playlist = %candidate.id, "New appearance");
            counters.created += 1;
        } else {
            counters.updated += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::spotify::{MockSpotifyApi, SearchPage, SpotifyApiError, TrackIdPage};
    use crate::services::tasks::TaskKind;
    use crate::services::tasks::status::TaskStatusStore;
    use crate::test_utils::{details, insert_track, summary, test_db};
    use sea_orm::EntityTrait;
    use tokio_util::sync::CancellationToken;

    fn options() -> ScanOptions {
        ScanOptions {
            default_artist_hint: None,
            search_limit: 50,
            page_delay: Duration::ZERO,
        }
    }

    async fn context(db: &Arc<Database>) -> RunContext {
        cancellable_context(db, CancellationToken::new()).await
    }

    async fn cancellable_context(db: &Arc<Database>, cancel: CancellationToken) -> RunContext {
        let status = TaskStatusStore::new(db.clone());
        status.begin(TaskKind::Scan.name(), 0).await.unwrap();
        RunContext::new(TaskKind::Scan, cancel, status)
    }

    fn track_page(ids: &[&str]) -> TrackIdPage {
        TrackIdPage {
            track_ids: ids.iter().map(|id| id.to_string()).collect(),
            has_more: false,
        }
    }

    async fn appearances(db: &Database) -> Vec<entities::appearance::Model> {
        entities::appearance::Entity::find()
            .all(&db.conn)
            .await
            .unwrap()
    }

    #[test]
    fn test_search_queries_with_artist() {
        assert_eq!(
            search_queries("Song", Some("Artist")),
            vec![
                "\"Song\" \"Artist\"".to_string(),
                "Song Artist".to_string(),
                "\"Artist\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_search_queries_without_artist() {
        assert_eq!(
            search_queries(" Song ", Some("  ")),
            vec!["\"Song\"".to_string(), "Song".to_string()]
        );
    }

    /// Track t1 is in playlist A but not in B.
    fn api_with_a_and_b() -> MockSpotifyApi {
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists()
            .returning(|_, _, _| {
                Ok(SearchPage {
                    items: vec![summary("A", "Playlist A"), summary("B", "Playlist B")],
                    fetched: 2,
                    has_more: false,
                })
            });
        api.expect_playlist_track_ids()
            .returning(|playlist_id, _, _| match playlist_id {
                "A" => Ok(track_page(&["t1", "other"])),
                _ => Ok(track_page(&["unrelated"])),
            });
        api.expect_playlist_snapshot_id()
            .returning(|playlist_id| Ok(format!("{playlist_id}-snap")));
        api.expect_playlist_details()
            .withf(|playlist_id| playlist_id == "A")
            .returning(|_| Ok(details("A", 1200)));
        api
    }

    #[tokio::test]
    async fn test_only_containing_playlist_gets_an_appearance() {
        let db = test_db().await;
        let track = insert_track(&db, "t1", "Song", Some("Artist")).await;

        let ctx = context(&db).await;
        let outcome = run(&ctx, Arc::new(api_with_a_and_b()), db.clone(), &options())
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let rows = appearances(&db).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].track_id, track.id);

        let playlist = PlaylistService::new(db.clone())
            .find_by_spotify_id("A")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rows[0].playlist_id, playlist.id);
        assert_eq!(playlist.followers, 1200);
        assert!(
            PlaylistService::new(db.clone())
                .find_by_spotify_id("B")
                .await
                .unwrap()
                .is_none()
        );

        let view = TaskStatusStore::new(db.clone()).view("scan").await.unwrap();
        assert_eq!(view.current, 1);
        assert_eq!(view.total, 1);
        // Candidates repeat across the three queries but are checked once
        assert_eq!(view.extra.get("playlists_checked"), Some(&2));
        assert_eq!(view.extra.get("created"), Some(&1));
    }

    #[tokio::test]
    async fn test_rescan_updates_and_uses_cache() {
        let db = test_db().await;
        insert_track(&db, "t1", "Song", Some("Artist")).await;
        let api: SharedSpotifyApi = Arc::new(api_with_a_and_b());

        for _ in 0..3 {
            let ctx = context(&db).await;
            run(&ctx, api.clone(), db.clone(), &options()).await.unwrap();
        }

        assert_eq!(appearances(&db).await.len(), 1);
        let view = TaskStatusStore::new(db.clone()).view("scan").await.unwrap();
        assert_eq!(view.extra.get("created"), Some(&0));
        assert_eq!(view.extra.get("updated"), Some(&1));
        // By the third run A is stored and cached under its snapshot
        assert_eq!(view.extra.get("cache_hits"), Some(&1));
    }

    #[tokio::test]
    async fn test_failures_skip_track_or_candidate() {
        let db = test_db().await;
        insert_track(&db, "t1", "Broken search", None).await;
        insert_track(&db, "t2", "Song", None).await;

        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists().returning(|query, _, _| {
            if query.contains("Broken") {
                Err(SpotifyApiError::Transient("timeout".into()))
            } else {
                Ok(SearchPage {
                    items: vec![summary("gone", "Gone"), summary("A", "Playlist A")],
                    fetched: 2,
                    has_more: false,
                })
            }
        });
        api.expect_playlist_track_ids()
            .returning(|playlist_id, _, _| match playlist_id {
                "gone" => Err(SpotifyApiError::NotFound(playlist_id.to_string())),
                _ => Ok(track_page(&["t2"])),
            });
        api.expect_playlist_details()
            .returning(|_| Err(SpotifyApiError::Transient("timeout".into())));

        let ctx = context(&db).await;
        let outcome = run(&ctx, Arc::new(api), db.clone(), &options())
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let rows = appearances(&db).await;
        assert_eq!(rows.len(), 1);
        // Details failed, so the search result was stored instead
        let playlist = PlaylistService::new(db.clone())
            .find_by_spotify_id("A")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(playlist.name, "Playlist A");
        assert_eq!(playlist.followers, 0);
    }

    #[tokio::test]
    async fn test_stop_during_search_writes_nothing_more() {
        let db = test_db().await;
        let first = insert_track(&db, "t1", "A song", None).await;
        insert_track(&db, "t2", "B song", None).await;
        let cancel = CancellationToken::new();

        let mut api = MockSpotifyApi::new();
        {
            let cancel = cancel.clone();
            api.expect_search_playlists().returning(move |query, _, _| {
                if query.contains("B song") {
                    // Stop arrives while this call is in flight
                    cancel.cancel();
                }
                Ok(SearchPage {
                    items: vec![summary("A", "Playlist A")],
                    fetched: 1,
                    has_more: false,
                })
            });
        }
        api.expect_playlist_snapshot_id()
            .returning(|playlist_id| Ok(format!("{playlist_id}-snap")));
        api.expect_playlist_track_ids()
            .times(1)
            .returning(|_, _, _| Ok(track_page(&["t1", "t2"])));
        api.expect_playlist_details()
            .times(1)
            .returning(|_| Ok(details("A", 10)));

        let ctx = cancellable_context(&db, cancel).await;
        let outcome = run(&ctx, Arc::new(api), db.clone(), &options())
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Stopped);
        let rows = appearances(&db).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].track_id, first.id);
        let view = TaskStatusStore::new(db.clone()).view("scan").await.unwrap();
        assert_eq!(view.extra.get("tracks_scanned"), Some(&1));
    }
}
