mod common;

use common::{document, eventually, start_of_test_day, unique_uid};
use hexpresso_lib::application::ports::{FieldUpdate, KeyValueStore, RemoteDocumentStore};
use hexpresso_lib::domain::entities::{DataSource, Identity, Seer};
use hexpresso_lib::domain::value_objects::{DatasetKey, Theme, UserId};
use hexpresso_lib::infrastructure::{ChannelIdentityProvider, InMemoryDocumentStore, ManualClock};
use hexpresso_lib::shared::config::{AppConfig, DatabaseConfig, TimedRecordConfig};
use hexpresso_lib::{AppCollaborators, AppState};
use serde_json::json;
use std::sync::Arc;

struct Harness {
    state: AppState,
    identity: Arc<ChannelIdentityProvider>,
    remote: Arc<InMemoryDocumentStore>,
    _dir: tempfile::TempDir,
}

async fn start_app() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("data").join("hexpresso.db");
    let config = AppConfig {
        database: DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", db_path.display()),
            ..DatabaseConfig::default()
        },
        timed_records: TimedRecordConfig {
            resubscribe_secs: 1,
            ..TimedRecordConfig::default()
        },
        ..AppConfig::default()
    };

    let clock = Arc::new(ManualClock::new(start_of_test_day()));
    let remote = Arc::new(InMemoryDocumentStore::new(clock.clone()));
    let identity = Arc::new(ChannelIdentityProvider::new());
    let collaborators = AppCollaborators::new(remote.clone(), identity.clone())
        .expect("collaborators")
        .with_clock(clock);

    let state = AppState::initialize(config, collaborators)
        .await
        .expect("initialize app state");
    Harness {
        state,
        identity,
        remote,
        _dir: dir,
    }
}

async fn wait_for_user(state: &AppState, expected: Option<&UserId>) {
    eventually("session follows identity", || async {
        state.session.current_user().await.as_ref() == expected
    })
    .await;
}

#[tokio::test]
async fn first_sign_in_bootstraps_account_and_streams_records() {
    let app = start_app().await;
    let uid = unique_uid();

    app.identity.sign_in(Identity::first_session(uid.clone()));
    wait_for_user(&app.state, Some(&uid)).await;

    let account = app
        .remote
        .get_document("users", uid.as_str())
        .await
        .expect("read account")
        .expect("account created");
    assert_eq!(account.data["coins"], 250);
    assert_eq!(account.data["newUser"], true);
    assert_eq!(account.data["lastDailyRewardDate"], "1970-01-01");
    assert!(app.state.timed_records.is_subscribed(&uid).await);

    assert!(app.state.rewards.auto_claim(&uid).await);
    let records = app.state.session.records();
    app.remote
        .update_fields(
            "users",
            uid.as_str(),
            vec![(
                "fortunerecord".to_string(),
                FieldUpdate::ArrayUnion(vec![json!({
                    "id": "f1",
                    "status": "pending",
                    "createdAt": "2024-01-02T09:55:00Z",
                    "estimatedCompletionTime": "2024-01-02T10:30:00Z"
                })]),
            )],
        )
        .await
        .expect("append record");

    eventually("records published to the session", || async {
        records.borrow().iter().any(|record| record.id == "f1")
    })
    .await;

    app.state.shutdown().await;
}

#[tokio::test]
async fn switching_users_moves_the_subscription() {
    let app = start_app().await;
    let first = unique_uid();
    let second = unique_uid();
    app.remote
        .put_document("users", second.as_str(), document(json!({ "coins": 10 })))
        .await;

    app.identity.sign_in(Identity::new(first.clone()));
    wait_for_user(&app.state, Some(&first)).await;
    // 既存アカウントは初期化しない
    assert!(
        app.remote
            .get_document("users", first.as_str())
            .await
            .expect("read")
            .is_none()
    );

    app.identity.sign_in(Identity::new(second.clone()));
    wait_for_user(&app.state, Some(&second)).await;
    assert!(!app.state.timed_records.is_subscribed(&first).await);
    assert!(app.state.timed_records.is_subscribed(&second).await);
    eventually("first user's listener released", || async {
        app.remote.listener_count("users", first.as_str()).await == 0
    })
    .await;

    app.state.shutdown().await;
}

#[tokio::test]
async fn sign_out_clears_datasets_but_keeps_theme() {
    let app = start_app().await;
    let uid = unique_uid();

    assert_eq!(
        app.state.theme.load_theme(Theme::Dark).await.expect("theme"),
        Theme::Dark
    );
    app.state
        .theme
        .update_theme(Theme::Light)
        .await
        .expect("update theme");

    app.identity.sign_in(Identity::new(uid.clone()));
    wait_for_user(&app.state, Some(&uid)).await;

    let seers = app
        .state
        .reconciler
        .load::<Seer>(&DatasetKey::seers())
        .await
        .expect("load seers");
    assert_eq!(seers.source, DataSource::BundledFallback);
    assert_eq!(seers.data.len(), 3);
    assert!(
        app.state
            .cache_store
            .get("seers_data", "seers_data")
            .await
            .expect("cache read")
            .is_some()
    );

    app.identity.sign_out();
    wait_for_user(&app.state, None).await;
    eventually("listener released", || async {
        app.remote.listener_count("users", uid.as_str()).await == 0
    })
    .await;

    assert!(
        app.state
            .cache_store
            .get("seers_data", "seers_data")
            .await
            .expect("cache read")
            .is_none()
    );
    assert!(!app.state.reconciler.snapshot(&DatasetKey::seers()).expect("snapshot").has_data());
    assert_eq!(
        app.state.theme.load_theme(Theme::Dark).await.expect("theme"),
        Theme::Light
    );

    app.state.shutdown().await;
}

#[tokio::test]
async fn sign_in_while_offline_recovers_once_remote_returns() {
    let app = start_app().await;
    let uid = unique_uid();
    app.remote.set_offline(true);

    app.identity.sign_in(Identity::first_session(uid.clone()));
    wait_for_user(&app.state, Some(&uid)).await;
    assert!(!app.state.timed_records.is_subscribed(&uid).await);

    app.remote.set_offline(false);
    eventually("subscription restored", || async {
        app.state.timed_records.is_subscribed(&uid).await
    })
    .await;

    let account = app
        .remote
        .get_document("users", uid.as_str())
        .await
        .expect("read account")
        .expect("account created after reconnect");
    assert_eq!(account.data["coins"], 250);
    assert_eq!(app.remote.listener_count("users", uid.as_str()).await, 1);

    app.state.shutdown().await;
}
