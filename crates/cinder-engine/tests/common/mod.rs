#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration, Utc};
use cinder_crypto::RecipientKeyPair;
use cinder_engine::{DestructionScheduler, SecureMessenger};
use cinder_store::models::now;
use cinder_store::{MemoryStore, MessageRecord, Store};

/// RSA-4096 generation is slow; one pair per test binary.
pub fn alice() -> &'static RecipientKeyPair {
    static PAIR: OnceLock<RecipientKeyPair> = OnceLock::new();
    PAIR.get_or_init(|| RecipientKeyPair::generate().expect("keygen"))
}

pub fn bob() -> &'static RecipientKeyPair {
    static PAIR: OnceLock<RecipientKeyPair> = OnceLock::new();
    PAIR.get_or_init(|| RecipientKeyPair::generate().expect("keygen"))
}

pub fn memory_messenger() -> (Arc<MemoryStore>, Arc<DestructionScheduler>, SecureMessenger) {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(DestructionScheduler::new(store.clone()));
    let messenger = SecureMessenger::new(scheduler.clone());
    (store, scheduler, messenger)
}

/// A message created an hour ago whose deadline is `deadline`. Bypasses the
/// cipher: the blobs have the right shapes but decrypt to nothing.
pub async fn insert_due_at(store: &dyn Store, deadline: DateTime<Utc>) -> MessageRecord {
    let mut msg = MessageRecord::new("alice", "bob", vec![0x11; 60], vec![0x22; 512]);
    msg.created_at = now() - Duration::hours(1);
    msg.destruct_at = Some(deadline);
    store.insert_message(&msg).await.expect("insert");
    msg
}
