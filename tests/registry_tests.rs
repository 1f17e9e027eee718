// Dedup registry and identity-allocation tests.

use avatar_bridge::registry::{StreamInfo, TaskInfo, TaskRegistry, AVATAR_UID_BASE};
use chrono::Utc;

fn task(task_id: &str, channel: &str, speaker: &str, lang: &str) -> TaskInfo {
    TaskInfo {
        task_id: task_id.to_string(),
        channel: channel.to_string(),
        speaker_uid: speaker.to_string(),
        target_language: lang.to_string(),
        streams: vec![StreamInfo {
            uid: "4000".to_string(),
            language: lang.to_string(),
        }],
        created_at: Utc::now(),
    }
}

#[test]
fn test_key_format() {
    assert_eq!(TaskRegistry::key("room-1", "100", "fr"), "room-1:100:fr");
}

#[tokio::test]
async fn test_insert_and_get() {
    let registry = TaskRegistry::new();
    let key = TaskRegistry::key("C", "100", "fr");

    assert!(registry.get(&key).await.is_none());

    registry.insert(key.clone(), task("T", "C", "100", "fr")).await;
    let found = registry.get(&key).await.expect("entry stored");
    assert_eq!(found.task_id, "T");
    assert_eq!(found.streams.len(), 1);
}

#[tokio::test]
async fn test_at_most_one_entry_per_key() {
    let registry = TaskRegistry::new();
    let key = TaskRegistry::key("C", "100", "fr");

    registry.insert(key.clone(), task("T1", "C", "100", "fr")).await;
    registry.insert(key.clone(), task("T2", "C", "100", "fr")).await;

    assert_eq!(registry.snapshot().await.len(), 1);
    assert_eq!(registry.get(&key).await.unwrap().task_id, "T2");
}

#[tokio::test]
async fn test_remove_task_sweeps_every_key() {
    let registry = TaskRegistry::new();
    // One task registered under two target languages, plus an unrelated one.
    registry
        .insert(TaskRegistry::key("C", "100", "fr"), task("T", "C", "100", "fr"))
        .await;
    registry
        .insert(TaskRegistry::key("C", "100", "de"), task("T", "C", "100", "de"))
        .await;
    registry
        .insert(TaskRegistry::key("C", "200", "fr"), task("X", "C", "200", "fr"))
        .await;

    let removed = registry.remove_task("T").await;
    assert_eq!(removed, 2);

    let remaining = registry.snapshot().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].task_id, "X");

    // Removing again is a no-op.
    assert_eq!(registry.remove_task("T").await, 0);
}

#[tokio::test]
async fn test_avatar_uid_allocation_is_monotone_per_channel() {
    let registry = TaskRegistry::new();

    assert_eq!(registry.allocate_avatar_uid("C").await, AVATAR_UID_BASE);
    assert_eq!(registry.allocate_avatar_uid("C").await, AVATAR_UID_BASE + 1);
    assert_eq!(registry.allocate_avatar_uid("C").await, AVATAR_UID_BASE + 2);

    // A different channel starts over.
    assert_eq!(registry.allocate_avatar_uid("D").await, AVATAR_UID_BASE);
    assert_eq!(registry.allocate_avatar_uid("C").await, AVATAR_UID_BASE + 3);
}

#[tokio::test]
async fn test_tasks_for_channel_filters() {
    let registry = TaskRegistry::new();
    registry
        .insert(TaskRegistry::key("C", "100", "fr"), task("T", "C", "100", "fr"))
        .await;
    registry
        .insert(TaskRegistry::key("D", "100", "fr"), task("U", "D", "100", "fr"))
        .await;

    let tasks = registry.tasks_for_channel("C").await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id, "T");
    assert!(registry.tasks_for_channel("E").await.is_empty());
}

#[tokio::test]
async fn test_identity_triple_is_disjoint() {
    use avatar_bridge::registry::{BOT_UID_BASE, TRANSLATOR_UID_BASE};

    // The per-session identities must never collide inside one channel:
    // translators 3000+, avatars 4000+, bots 4500+.
    let registry = TaskRegistry::new();
    for index in 0..100u32 {
        let avatar_uid = registry.allocate_avatar_uid("C").await;
        let bot_uid = BOT_UID_BASE + index;
        let translator_uid = TRANSLATOR_UID_BASE + index;
        assert!(avatar_uid != bot_uid);
        assert!(avatar_uid != translator_uid);
        assert!(bot_uid != translator_uid);
        assert!((4000..4500).contains(&avatar_uid));
    }
}
