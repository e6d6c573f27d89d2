//! HTTP 后端集成测试（httpmock 模拟 *arr API）

use std::collections::BTreeSet;
use std::time::Duration;

use arr_reconcile::backend::{
    BackendError, ItemId, LidarrBackend, MediaBackend, RadarrBackend, SearchCommand, SonarrBackend,
    SubUnitId, TagId,
};
use arr_reconcile::config::{OracleSettings, ReconcileLimits};
use arr_reconcile::core::{run_reconcile, ReconcileJob};
use arr_reconcile::memory::HistoryStore;
use arr_reconcile::reconcile::{KeepOrder, MissingOracle, MissingStatus};
use arr_reconcile::ReconcileError;
use chrono::Utc;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

const KEY: &str = "secret";

#[tokio::test]
async fn test_lidarr_wanted_missing_is_paged_to_total() {
    let server = MockServer::start_async().await;
    let page1 = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/wanted/missing")
                .header("x-api-key", KEY)
                .query_param("page", "1")
                .query_param("pageSize", "2");
            then.status(200).json_body(json!({
                "page": 1,
                "pageSize": 2,
                "totalRecords": 3,
                "records": [{"artistId": 1}, {"artistId": 2}]
            }));
        })
        .await;
    let page2 = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/wanted/missing")
                .query_param("page", "2");
            then.status(200).json_body(json!({
                "page": 2,
                "pageSize": 2,
                "totalRecords": 3,
                "records": [{"artistId": 3}]
            }));
        })
        .await;

    let backend = LidarrBackend::new(&server.base_url(), KEY, 5).unwrap();
    let settings = OracleSettings {
        page_size: 2,
        max_pages: 10,
        retries: 0,
        retry_delay: Duration::ZERO,
    };
    let snapshot = MissingOracle::new(&backend, &settings)
        .compute(&[], &[], Utc::now())
        .await
        .unwrap();

    page1.assert_async().await;
    page2.assert_async().await;
    assert_eq!(snapshot.missing_count(), 3);
    assert_eq!(snapshot.status(ItemId(3)), MissingStatus::Missing(vec![]));
    assert_eq!(snapshot.status(ItemId(4)), MissingStatus::Complete);
}

#[tokio::test]
async fn test_lidarr_search_falls_back_to_artist_search() {
    let server = MockServer::start_async().await;
    let missing_album = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/command")
                .json_body_partial(r#"{"name": "MissingAlbumSearch", "artistId": 9}"#);
            then.status(500);
        })
        .await;
    let artist = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/command")
                .json_body_partial(r#"{"name": "ArtistSearch", "artistId": 9}"#);
            then.status(201).json_body(json!({"id": 77}));
        })
        .await;

    let backend = LidarrBackend::new(&server.base_url(), KEY, 5).unwrap();
    backend
        .trigger_search(&SearchCommand::Items(vec![ItemId(9)]))
        .await
        .unwrap();

    missing_album.assert_async().await;
    artist.assert_async().await;
}

#[tokio::test]
async fn test_lidarr_non_array_artist_list_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/artist");
            then.status(200).json_body(json!({"message": "nope"}));
        })
        .await;

    let backend = LidarrBackend::new(&server.base_url(), KEY, 5).unwrap();
    assert!(matches!(
        backend.list_items().await,
        Err(BackendError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_radarr_replaces_tags_on_full_object() {
    let server = MockServer::start_async().await;
    let get = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/movie/5");
            then.status(200)
                .json_body(json!({"id": 5, "title": "Heat", "hasFile": true, "tags": [1, 7]}));
        })
        .await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/api/v3/movie/5")
                .header("x-api-key", KEY)
                .json_body(json!({"id": 5, "title": "Heat", "hasFile": true, "tags": [2, 7]}));
            then.status(202).json_body(json!({"id": 5}));
        })
        .await;

    let backend = RadarrBackend::new(&server.base_url(), KEY, 5).unwrap();
    let tags: BTreeSet<TagId> = BTreeSet::from([TagId(2), TagId(7)]);
    backend.update_item_tags(ItemId(5), &tags).await.unwrap();

    get.assert_async().await;
    put.assert_async().await;
}

#[tokio::test]
async fn test_radarr_status_errors_are_classified() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/tag");
            then.status(401);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/movie");
            then.status(503);
        })
        .await;

    let backend = RadarrBackend::new(&server.base_url(), KEY, 5).unwrap();
    let unauthorized = backend.list_tags().await.unwrap_err();
    assert_eq!(unauthorized, BackendError::Unauthorized);
    assert!(unauthorized.is_fatal());

    let unavailable = backend.list_items().await.unwrap_err();
    assert!(matches!(unavailable, BackendError::Status { status: 503, .. }));
    assert!(unavailable.is_transient());
}

#[tokio::test]
async fn test_slow_response_maps_to_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/tag");
            then.status(200)
                .delay(Duration::from_secs(3))
                .json_body(json!([]));
        })
        .await;

    let backend = RadarrBackend::new(&server.base_url(), KEY, 1).unwrap();
    let err = backend.list_tags().await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_sonarr_episodes_and_episode_search() {
    let server = MockServer::start_async().await;
    let episodes = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v3/episode")
                .query_param("seriesId", "4");
            then.status(200).json_body(json!([
                {"id": 11, "monitored": true, "hasFile": false, "airDateUtc": "2020-01-01T00:00:00Z"},
                {"id": 12, "monitored": false, "hasFile": false, "airDateUtc": "2020-01-08T00:00:00Z"},
                {"id": 0, "monitored": true}
            ]));
        })
        .await;
    let search = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v3/command")
                .json_body(json!({"name": "EpisodeSearch", "episodeIds": [11, 13]}));
            // 空响应体
            then.status(201);
        })
        .await;

    let backend = SonarrBackend::new(&server.base_url(), KEY, 5).unwrap();
    let units = backend.list_sub_units(ItemId(4)).await.unwrap();
    assert_eq!(units.len(), 2);
    assert!(units[0].is_missing(Utc::now()));
    assert!(!units[1].is_missing(Utc::now()));

    backend
        .trigger_search(&SearchCommand::SubUnits {
            item: ItemId(4),
            ids: vec![SubUnitId(11), SubUnitId(13)],
        })
        .await
        .unwrap();

    episodes.assert_async().await;
    search.assert_async().await;
}

fn radarr_job(dir: &TempDir) -> ReconcileJob {
    ReconcileJob {
        search_tag: "search".to_string(),
        done_tag: "done".to_string(),
        limits: ReconcileLimits::default(),
        oracle: OracleSettings {
            retry_delay: Duration::ZERO,
            ..OracleSettings::default()
        },
        state_path: dir.path().join("radarr_missing_done_state.json"),
    }
}

#[tokio::test]
async fn test_radarr_full_reconcile_run() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/tag");
            then.status(200)
                .json_body(json!([{"id": 1, "label": "search"}, {"id": 2, "label": "done"}]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/movie");
            then.status(200).json_body(json!([
                {"id": 5, "title": "Heat", "hasFile": true, "tags": [1]},
                {"id": 6, "title": "Ronin", "hasFile": false, "tags": [2]},
                {"id": 7, "title": "Thief", "hasFile": false, "tags": []}
            ]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/movie/5");
            then.status(200)
                .json_body(json!({"id": 5, "title": "Heat", "hasFile": true, "tags": [1]}));
        })
        .await;
    let promote = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/api/v3/movie/5")
                .json_body(json!({"id": 5, "title": "Heat", "hasFile": true, "tags": [2]}));
            then.status(202);
        })
        .await;
    let search = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v3/command")
                .json_body(json!({"name": "MoviesSearch", "movieIds": [6]}));
            then.status(201).json_body(json!({"id": 1}));
        })
        .await;

    let backend = RadarrBackend::new(&server.base_url(), KEY, 5).unwrap();
    let job = radarr_job(&dir);
    let now = Utc::now();
    let summary = run_reconcile(&backend, &job, &mut KeepOrder, now, false)
        .await
        .unwrap();

    promote.assert_async().await;
    search.assert_async().await;
    assert_eq!(summary.promoted, 1);
    assert_eq!(summary.searched, 1);

    let history = HistoryStore::load(&job.state_path).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.last_searched_at(ItemId(6)), Some(now));
}

#[tokio::test]
async fn test_rejected_api_key_aborts_run() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/tag");
            then.status(401);
        })
        .await;

    let backend = RadarrBackend::new(&server.base_url(), "wrong", 5).unwrap();
    let job = radarr_job(&dir);
    let err = run_reconcile(&backend, &job, &mut KeepOrder, Utc::now(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Unauthorized(_)));
    assert!(!job.state_path.exists());
}
