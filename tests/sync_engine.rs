mod common;

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use movieguru_sync::{
    error::{RemoteError, RemoteErrorKind, SyncError},
    models::{is_local_id, FavoriteStatus, PostPatch, DEFAULT_ICON},
    remote::RemoteAdapter,
    sync::{CacheEvent, Phase},
    TargetKey,
};

use common::{comment, draft, eventually, movie, Harness};

const ANA: &str = "ana@example.com";
const BO: &str = "bo@example.com";

#[tokio::test]
async fn test_toggle_favorite_confirms() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    let heat = movie("949", "Heat");

    let pending = harness.engine.toggle_favorite(&heat).unwrap();
    assert!(harness.engine.is_favorite("949"));

    let toggle = assert_ok!(pending.outcome().await);
    assert_eq!(toggle.status, FavoriteStatus::Added);
    assert_eq!(harness.engine.favorites(), vec![heat.clone()]);
    assert_eq!(
        harness.adapter.documents().get_favorites(ANA).await.unwrap(),
        vec![heat]
    );
}

#[tokio::test]
async fn test_toggle_favorite_reverts_on_network_error() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    let mut events = harness.engine.subscribe();
    harness
        .adapter
        .fail_next("toggle_favorite", RemoteError::Network("connection reset".to_string()));

    let pending = harness.engine.toggle_favorite(&movie("949", "Heat")).unwrap();
    assert!(harness.engine.is_favorite("949"));

    let err = assert_err!(pending.outcome().await);
    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Network));
    assert!(!harness.engine.is_favorite("949"));

    let key = TargetKey::Favorite("949".to_string());
    assert_eq!(
        events.recv().await.unwrap(),
        CacheEvent {
            key: key.clone(),
            phase: Phase::Applied
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        CacheEvent {
            key,
            phase: Phase::Reverted
        }
    );
}

#[tokio::test]
async fn test_rapid_toggles_resolve_in_issue_order() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    harness.adapter.gate("toggle_favorite");
    let heat = movie("949", "Heat");

    let first = harness.engine.toggle_favorite(&heat).unwrap();
    let second = harness.engine.toggle_favorite(&heat).unwrap();
    let third = harness.engine.toggle_favorite(&heat).unwrap();
    assert!(harness.engine.is_favorite("949"));

    harness.adapter.wait_for_calls("toggle_favorite", 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.adapter.call_count("toggle_favorite"), 1);

    harness.adapter.release("toggle_favorite", 3);
    let statuses = vec![
        first.outcome().await.unwrap().status,
        second.outcome().await.unwrap().status,
        third.outcome().await.unwrap().status,
    ];

    assert_eq!(
        statuses,
        vec![FavoriteStatus::Added, FavoriteStatus::Removed, FavoriteStatus::Added]
    );
    assert!(harness.engine.is_favorite("949"));
    assert_eq!(harness.adapter.documents().get_favorites(ANA).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_toggle_does_not_disturb_other_targets() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    harness
        .adapter
        .fail_next("toggle_favorite", RemoteError::Network("timeout".to_string()));

    // Both are applied before either call runs; the first call takes the failure
    let failing = harness.engine.toggle_favorite(&movie("949", "Heat")).unwrap();
    let succeeding = harness.engine.toggle_favorite(&movie("680", "Pulp Fiction")).unwrap();
    assert!(harness.engine.is_favorite("949") && harness.engine.is_favorite("680"));

    assert_err!(failing.outcome().await);
    assert_ok!(succeeding.outcome().await);

    assert!(!harness.engine.is_favorite("949"));
    assert!(harness.engine.is_favorite("680"));
}

#[tokio::test]
async fn test_invalid_rating_is_rejected_before_any_change() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    let before = harness.engine.snapshot();

    let result = harness.engine.create_post(draft("Heat", 6));

    assert!(matches!(result, Err(SyncError::Validation(_))));
    assert_eq!(harness.engine.snapshot(), before);
    assert_eq!(harness.adapter.call_count("create_post"), 0);
    assert_eq!(harness.engine.pending_targets(), 0);
}

#[tokio::test]
async fn test_unauthenticated_mutations_fail_fast() {
    let harness = Harness::new();

    let toggle = harness.engine.toggle_favorite(&movie("949", "Heat"));
    let post = harness.engine.create_post(draft("Heat", 4));

    assert!(matches!(toggle, Err(SyncError::Unauthenticated)));
    assert!(matches!(post, Err(SyncError::Unauthenticated)));
    assert!(harness.engine.favorites().is_empty());
    assert!(harness.adapter.calls().is_empty());
    assert!(matches!(harness.engine.load().await, Err(SyncError::Unauthenticated)));
}

#[tokio::test]
async fn test_create_post_replaces_placeholder() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    harness
        .adapter
        .documents()
        .seed_catalog(&[movie("949", "Heat")])
        .await
        .unwrap();
    harness.adapter.gate("create_post");

    let pending = harness.engine.create_post(draft("Heat", 4)).unwrap();
    let placeholder = harness.engine.posts()[0].clone();
    assert!(is_local_id(&placeholder.id));
    assert_eq!(placeholder.movie_poster, None);

    // A placeholder cannot be edited until the server knows it
    let edit = harness.engine.edit_post(
        &placeholder.id,
        PostPatch::new(None, Some("Changed".to_string()), None).unwrap(),
    );
    assert!(matches!(edit, Err(SyncError::Unconfirmed(_))));

    harness.adapter.release("create_post", 1);
    let created = pending.outcome().await.unwrap();

    let posts = harness.engine.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0], created);
    assert!(!is_local_id(&created.id));
    assert_eq!(created.movie_poster.as_deref(), Some("/949.jpg"));
}

#[tokio::test]
async fn test_delete_post_waits_for_pending_comment() {
    let harness = Harness::new();
    let ana = harness.sign_in(ANA).await;
    let post = harness
        .adapter
        .documents()
        .create_post(&ana, &draft("Heat", 4))
        .await
        .unwrap();
    harness.engine.load().await.unwrap();
    harness.adapter.gate("add_comment");

    let added = harness.engine.add_comment(&post.id, comment("First!")).unwrap();
    let deleted = harness.engine.delete_post(&post.id).unwrap();
    assert!(harness.engine.post(&post.id).is_none());

    harness.adapter.wait_for_calls("add_comment", 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.adapter.call_count("delete_post"), 0);

    harness.adapter.release("add_comment", 1);
    assert_ok!(added.outcome().await);
    assert_ok!(deleted.outcome().await);

    let calls = harness.adapter.calls();
    let comment_at = calls.iter().position(|c| *c == "add_comment").unwrap();
    let delete_at = calls.iter().position(|c| *c == "delete_post").unwrap();
    assert!(comment_at < delete_at);
    assert!(harness.adapter.documents().list_posts().await.unwrap().is_empty());
    assert!(harness.engine.posts().is_empty());
}

#[tokio::test]
async fn test_failed_post_delete_restores_post_with_confirmed_comment() {
    let harness = Harness::new();
    let ana = harness.sign_in(ANA).await;
    let post = harness
        .adapter
        .documents()
        .create_post(&ana, &draft("Heat", 4))
        .await
        .unwrap();
    harness.engine.load().await.unwrap();
    harness
        .adapter
        .fail_next("delete_post", RemoteError::Network("unreachable".to_string()));

    let added = harness.engine.add_comment(&post.id, comment("Still here")).unwrap();
    let deleted = harness.engine.delete_post(&post.id).unwrap();

    let confirmed = added.outcome().await.unwrap();
    assert_err!(deleted.outcome().await);

    let restored = harness.engine.post(&post.id).unwrap();
    assert_eq!(restored.comments, vec![confirmed]);
}

#[tokio::test]
async fn test_editing_someone_elses_post_rolls_back_exactly() {
    let harness = Harness::new();
    let bo = harness.account(BO).await;
    let post = harness
        .adapter
        .documents()
        .create_post(&bo, &draft("Heat", 4))
        .await
        .unwrap();
    harness.sign_in(ANA).await;
    let before = harness.engine.snapshot();

    let patch = PostPatch::new(None, Some("Hijacked".to_string()), Some(1)).unwrap();
    let pending = harness.engine.edit_post(&post.id, patch).unwrap();
    assert_eq!(harness.engine.post(&post.id).unwrap().content, "Hijacked");

    let err = pending.outcome().await.unwrap_err();
    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Authorization));
    assert_eq!(harness.engine.snapshot(), before);
}

#[tokio::test]
async fn test_deleting_someone_elses_comment_rolls_back_in_place() {
    let harness = Harness::new();
    let bo = harness.account(BO).await;
    let documents = harness.adapter.documents();
    let post = documents.create_post(&bo, &draft("Heat", 4)).await.unwrap();
    documents.add_comment(&bo, &post.id, &comment("one")).await.unwrap();
    let middle = documents.add_comment(&bo, &post.id, &comment("two")).await.unwrap();
    documents.add_comment(&bo, &post.id, &comment("three")).await.unwrap();
    harness.sign_in(ANA).await;
    let before = harness.engine.snapshot();

    let pending = harness.engine.delete_comment(&post.id, &middle.id).unwrap();
    assert_eq!(harness.engine.post(&post.id).unwrap().comments.len(), 2);

    let err = pending.outcome().await.unwrap_err();
    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Authorization));
    assert_eq!(harness.engine.snapshot(), before);
}

#[tokio::test]
async fn test_comment_edit_confirms() {
    let harness = Harness::new();
    let ana = harness.sign_in(ANA).await;
    let post = harness
        .adapter
        .documents()
        .create_post(&ana, &draft("Heat", 4))
        .await
        .unwrap();
    harness.engine.load().await.unwrap();

    let added = harness.engine.add_comment(&post.id, comment("Fist!")).unwrap();
    let created = added.outcome().await.unwrap();

    let edited = harness
        .engine
        .edit_comment(&post.id, &created.id, "First!")
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert_eq!(edited.content, "First!");
    assert_eq!(harness.engine.post(&post.id).unwrap().comments, vec![edited]);
}

#[tokio::test]
async fn test_operations_on_unknown_targets_are_rejected() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;

    let result = harness.engine.delete_post("missing");
    assert!(matches!(
        result,
        Err(SyncError::Remote(RemoteError::NotFound(_)))
    ));
    assert_eq!(harness.adapter.call_count("delete_post"), 0);
}

#[tokio::test]
async fn test_timeout_reverts_with_network_error() {
    let harness = Harness::with_timeout(Duration::from_millis(50));
    harness.sign_in(ANA).await;
    harness.adapter.gate("toggle_favorite");

    let pending = harness.engine.toggle_favorite(&movie("949", "Heat")).unwrap();
    let err = pending.outcome().await.unwrap_err();

    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Network));
    assert!(!harness.engine.is_favorite("949"));
    assert_eq!(harness.engine.pending_targets(), 0);
}

#[tokio::test]
async fn test_dropped_handle_still_resolves() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    harness
        .adapter
        .fail_next("toggle_favorite", RemoteError::Network("gone".to_string()));

    drop(harness.engine.toggle_favorite(&movie("949", "Heat")).unwrap());

    eventually("revert without a listener", || {
        !harness.engine.is_favorite("949") && harness.engine.pending_targets() == 0
    })
    .await;
}

#[tokio::test]
async fn test_history_delete_reappears_on_failure() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    harness.engine.recommend("cozy rain").await.unwrap();
    let entry = harness.engine.history()[0].clone();
    harness
        .adapter
        .fail_next("delete_history", RemoteError::Network("down".to_string()));

    let pending = harness.engine.delete_history(&entry.id).unwrap();
    assert!(harness.engine.history().is_empty());

    assert_err!(pending.outcome().await);
    assert_eq!(harness.engine.history(), vec![entry.clone()]);

    assert_ok!(harness.engine.delete_history(&entry.id).unwrap().outcome().await);
    assert!(harness.engine.history().is_empty());
    assert!(harness.adapter.documents().get_history(ANA).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recommend_refreshes_history() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;

    let recommendation = harness.engine.recommend("  rainy sunday ").await.unwrap();

    assert_eq!(recommendation.mood, "rainy sunday");
    assert!(!recommendation.movies.is_empty());
    assert_eq!(harness.engine.history().len(), 1);
    assert_eq!(harness.engine.history()[0].query, "rainy sunday");
    assert!(matches!(
        harness.engine.recommend(" ").await,
        Err(SyncError::Validation(_))
    ));
}

#[tokio::test]
async fn test_watch_providers_pass_through() {
    let harness = Harness::new();
    let providers = harness.engine.watch_providers("949").await.unwrap();
    assert!(providers.is_empty());
}

#[tokio::test]
async fn test_load_replaces_cache_and_keeps_pending_work() {
    let harness = Harness::new();
    let ana = harness.sign_in(ANA).await;
    let documents = harness.adapter.documents();
    documents.toggle_favorite(ANA, &movie("949", "Heat")).await.unwrap();
    documents.create_post(&ana, &draft("Heat", 5)).await.unwrap();
    harness.adapter.gate("toggle_favorite");

    let pending = harness.engine.toggle_favorite(&movie("680", "Pulp Fiction")).unwrap();
    harness.engine.load().await.unwrap();

    assert!(harness.engine.is_favorite("949"));
    assert!(harness.engine.is_favorite("680"));
    assert_eq!(harness.engine.posts().len(), 1);

    harness.adapter.release("toggle_favorite", 1);
    assert_ok!(pending.outcome().await);
    assert_eq!(harness.engine.favorites().len(), 2);
}

#[tokio::test]
async fn test_engine_follows_identity() {
    let harness = Harness::new();
    harness.account(ANA).await;
    let bo = harness.account(BO).await;
    let documents = harness.adapter.documents();
    documents.toggle_favorite(ANA, &movie("949", "Heat")).await.unwrap();
    let post = documents.create_post(&bo, &draft("Ronin", 4)).await.unwrap();
    documents.add_comment(&bo, &post.id, &comment("mine")).await.unwrap();
    let _follower = harness.engine.follow_identity();

    harness.identity.login(ANA, common::PASSWORD).await.unwrap();
    eventually("ana's collections", || harness.engine.favorites().len() == 1).await;
    assert_eq!(harness.engine.posts().len(), 1);

    harness.identity.logout().await;
    eventually("cleared cache", || {
        harness.engine.favorites().is_empty() && harness.engine.posts().is_empty()
    })
    .await;

    harness.identity.login(BO, common::PASSWORD).await.unwrap();
    eventually("bo's posts", || harness.engine.posts().len() == 1).await;
    assert!(harness.engine.favorites().is_empty());

    harness.identity.update_profile_icon("🦊").await.unwrap();
    eventually("rewritten icons", || {
        harness
            .engine
            .post(&post.id)
            .map(|p| p.display_icon == "🦊" && p.comments[0].display_icon == "🦊")
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn test_toggle_right_after_login_stays_in_cache() {
    let harness = Harness::new();
    harness.account(ANA).await;
    let _follower = harness.engine.follow_identity();

    harness.identity.login(ANA, common::PASSWORD).await.unwrap();
    let pending = harness.engine.toggle_favorite(&movie("949", "Heat")).unwrap();

    let toggle = assert_ok!(pending.outcome().await);
    assert_eq!(toggle.status, FavoriteStatus::Added);
    eventually("login load", || harness.adapter.call_count("list_posts") >= 1).await;
    eventually("settled favorite", || {
        harness.engine.pending_targets() == 0 && harness.engine.is_favorite("949")
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.engine.is_favorite("949"));
    assert_eq!(harness.adapter.documents().get_favorites(ANA).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_load_refetches_when_a_confirmation_lands_mid_fetch() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    harness.adapter.gate("list_posts");

    let engine = harness.engine.clone();
    let load = tokio::spawn(async move { engine.load().await });
    harness.adapter.wait_for_calls("list_posts", 1).await;

    // Favorites were already fetched without this one
    let pending = harness.engine.toggle_favorite(&movie("949", "Heat")).unwrap();
    assert_ok!(pending.outcome().await);

    harness.adapter.release("list_posts", 2);
    assert_ok!(load.await.unwrap());

    assert!(harness.engine.is_favorite("949"));
    assert_eq!(harness.adapter.call_count("get_favorites"), 3);
}

#[tokio::test]
async fn test_anonymous_post_hides_icon() {
    let harness = Harness::new();
    harness.sign_in(ANA).await;
    harness.identity.update_profile_icon("🦊").await.unwrap();

    let mut secret = draft("Heat", 3);
    secret.anonymous = true;
    let pending = harness.engine.create_post(secret).unwrap();
    assert_eq!(harness.engine.posts()[0].display_icon, DEFAULT_ICON);

    let created = pending.outcome().await.unwrap();
    assert_eq!(created.display_icon, DEFAULT_ICON);
}
