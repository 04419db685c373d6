use chrono::Duration;
use cinder_store::models::now;
use cinder_store::{
    IncidentRecord, LogSeverity, MessageRecord, SessionKeyRecord, SqliteStore, Store, StoreError,
    SystemLogEntry,
};
use tempfile::TempDir;

async fn open_temp() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::open(&dir.path().join("cinder.db"))
        .await
        .expect("open store");
    (dir, store)
}

fn message_due_in(secs: i64) -> MessageRecord {
    let mut msg = MessageRecord::new("alice", "bob", vec![0xAB; 64], vec![0xCD; 512]);
    msg.created_at = msg.created_at - Duration::hours(1);
    msg.destruct_at = Some(now() + Duration::seconds(secs));
    msg
}

#[tokio::test]
async fn message_roundtrips_exactly() {
    let (_dir, store) = open_temp().await;
    let mut msg = message_due_in(120);
    msg.read_once = true;
    store.insert_message(&msg).await.unwrap();

    let loaded = store.get_message(&msg.id).await.unwrap().expect("stored");
    assert_eq!(loaded, msg);
    assert!(store.get_message("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn deadline_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cinder.db");
    let msg = message_due_in(-1);
    {
        let store = SqliteStore::open(&path).await.unwrap();
        store.insert_message(&msg).await.unwrap();
        store.close().await;
    }

    let store = SqliteStore::open(&path).await.unwrap();
    let expired = store.expired_messages(now()).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, msg.id);
}

#[tokio::test]
async fn conditional_updates_flip_once() {
    let (_dir, store) = open_temp().await;
    let msg = message_due_in(30);
    store.insert_message(&msg).await.unwrap();

    assert!(store.mark_read(&msg.id).await.unwrap());
    assert!(!store.mark_read(&msg.id).await.unwrap());

    let at = now();
    assert!(store.mark_deleted(&msg.id, at).await.unwrap());
    assert!(!store.mark_deleted(&msg.id, at).await.unwrap());
    assert!(!store.set_destruction(&msg.id, None, false).await.unwrap());

    let loaded = store.get_message(&msg.id).await.unwrap().unwrap();
    assert!(loaded.is_deleted);
    assert_eq!(loaded.deleted_at, Some(at));
    assert!(loaded.ciphertext.is_empty());
    assert!(loaded.wrapped_key.is_empty());

    assert!(matches!(
        store.mark_deleted("missing", at).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn sweep_queries_split_on_deadline() {
    let (_dir, store) = open_temp().await;
    let past = message_due_in(-10);
    let soon = message_due_in(10);
    let later = message_due_in(9999);
    let mut unscheduled = message_due_in(0);
    unscheduled.destruct_at = None;
    for msg in [&later, &unscheduled, &soon, &past] {
        store.insert_message(msg).await.unwrap();
    }
    let t = now();

    let expired = store.expired_messages(t).await.unwrap();
    assert_eq!(expired.iter().map(|m| &m.id).collect::<Vec<_>>(), vec![&past.id]);
    assert_eq!(store.count_expired_messages(t).await.unwrap(), 1);

    let scheduled = store.scheduled_messages(t).await.unwrap();
    assert_eq!(
        scheduled.iter().map(|m| &m.id).collect::<Vec<_>>(),
        vec![&soon.id, &later.id]
    );

    assert!(store.set_destruction(&later.id, None, false).await.unwrap());
    assert_eq!(store.scheduled_messages(t).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rescheduling_keeps_read_once_and_key_expiry_in_step() {
    let (_dir, store) = open_temp().await;
    let mut msg = message_due_in(60);
    msg.read_once = true;
    let key = SessionKeyRecord::new(&msg.id, vec![0xCD; 512]).with_expiry(msg.destruct_at.unwrap());
    store.insert_message_with_key(&msg, &key).await.unwrap();

    let later = now() + Duration::hours(3);
    assert!(store.set_destruction(&msg.id, Some(later), false).await.unwrap());
    let loaded = store.get_message(&msg.id).await.unwrap().unwrap();
    assert!(loaded.read_once);
    assert_eq!(loaded.destruct_at, Some(later));
    assert_eq!(
        store.get_session_key(&msg.id).await.unwrap().unwrap().expires_at,
        Some(later)
    );

    assert!(store.set_destruction(&msg.id, None, false).await.unwrap());
    assert_eq!(store.get_session_key(&msg.id).await.unwrap().unwrap().expires_at, None);
    assert!(store
        .expired_session_keys(now() + Duration::days(1))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn combined_insert_rolls_back_when_key_write_fails() {
    let (_dir, store) = open_temp().await;
    let msg = message_due_in(60);
    store
        .insert_session_key(&SessionKeyRecord::new(&msg.id, vec![1; 512]))
        .await
        .unwrap();

    let key = SessionKeyRecord::new(&msg.id, vec![2; 512]);
    assert!(matches!(
        store.insert_message_with_key(&msg, &key).await,
        Err(StoreError::Constraint(_))
    ));
    assert!(store.get_message(&msg.id).await.unwrap().is_none());
    assert!(store.scheduled_messages(now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn backdated_deadline_is_a_constraint_error() {
    let (_dir, store) = open_temp().await;
    let mut msg = message_due_in(60);
    msg.destruct_at = Some(msg.created_at - Duration::seconds(1));
    assert!(matches!(
        store.insert_message(&msg).await,
        Err(StoreError::Constraint(_))
    ));

    msg.destruct_at = None;
    store.insert_message(&msg).await.unwrap();
    assert!(matches!(
        store.insert_message(&msg).await,
        Err(StoreError::Constraint(_))
    ));
    assert!(matches!(
        store.set_destruction(&msg.id, Some(msg.created_at), false).await,
        Err(StoreError::Constraint(_))
    ));
    assert_eq!(store.get_message(&msg.id).await.unwrap().unwrap().destruct_at, None);
}

#[tokio::test]
async fn session_keys_expire_and_destroy_once() {
    let (_dir, store) = open_temp().await;
    let stale = SessionKeyRecord::new("stale", vec![1; 512]).with_expiry(now() - Duration::minutes(5));
    let live = SessionKeyRecord::new("live", vec![2; 512]).with_expiry(now() + Duration::minutes(5));
    store.insert_session_key(&stale).await.unwrap();
    store.insert_session_key(&live).await.unwrap();

    let expired = store.expired_session_keys(now()).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, "stale");

    assert!(store.destroy_session_key("stale", now()).await.unwrap());
    assert!(!store.destroy_session_key("stale", now()).await.unwrap());
    assert_eq!(store.count_expired_session_keys(now()).await.unwrap(), 0);

    let loaded = store.get_session_key("stale").await.unwrap().unwrap();
    assert!(loaded.is_destroyed);
    assert!(loaded.wrapped_key.is_empty());
}

#[tokio::test]
async fn logs_are_newest_first_and_purgeable() {
    let (_dir, store) = open_temp().await;
    let t = now();
    for (i, age_days) in [9i64, 3, 0].into_iter().enumerate() {
        let entry = SystemLogEntry::new(
            format!("EVENT_{i}"),
            LogSeverity::Info,
            serde_json::json!({ "n": i }),
        )
        .for_message(format!("m{i}"))
        .at(t - Duration::days(age_days));
        store.append_system_log(&entry).await.unwrap();
    }

    let recent = store.recent_system_logs(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].event_type, "EVENT_2");
    assert_eq!(recent[0].data["n"], 2);
    assert_eq!(recent[1].message_id.as_deref(), Some("m1"));

    assert_eq!(store.purge_system_logs(t - Duration::days(7)).await.unwrap(), 1);
    assert_eq!(store.recent_system_logs(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn only_old_resolved_incidents_are_purged() {
    let (_dir, store) = open_temp().await;
    let t = now();
    let old_resolved = IncidentRecord::new("u1", 0.9, "burst").at(t - Duration::days(40));
    let old_open = IncidentRecord::new("u2", 0.7, "burst").at(t - Duration::days(40));
    let new_resolved = IncidentRecord::new("u3", 0.6, "burst").at(t - Duration::days(1));
    for incident in [&old_resolved, &old_open, &new_resolved] {
        store.insert_incident(incident).await.unwrap();
    }
    assert!(store.resolve_incident(&old_resolved.id, "ops", t).await.unwrap());
    assert!(store.resolve_incident(&new_resolved.id, "ops", t).await.unwrap());
    assert!(!store.resolve_incident("missing", "ops", t).await.unwrap());

    let purged = store
        .purge_resolved_incidents(t - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(store.get_incident(&old_resolved.id).await.unwrap().is_none());
    assert!(store.get_incident(&old_open.id).await.unwrap().is_some());

    let kept = store.get_incident(&new_resolved.id).await.unwrap().unwrap();
    assert_eq!(kept.resolved_by.as_deref(), Some("ops"));
    assert_eq!(kept.resolved_at, Some(t));
}
