use std::sync::Arc;

use greenhills_security::db::{MemStore, Store};
use greenhills_security::policy::{Policies, PolicyError, TopicPolicy};

fn policies() -> Policies {
    Policies::new(Arc::new(MemStore::new()))
}

#[test]
fn defaults_match_the_documented_policy() {
    let p = TopicPolicy::new(0);
    assert!(p.enabled);
    assert_eq!(p.block_days, 5);
    assert_eq!(p.warnings_limit, 3);
    assert_eq!(p.repeat_window_days, 5);
    assert_eq!(p.repeat_window_secs(), 5 * 86_400);
}

#[tokio::test]
async fn get_creates_the_row_lazily_exactly_once() {
    let p = policies();

    let policy = p.get(42).await.unwrap();
    assert_eq!(policy.thread_id, 42);
    assert!(policy.enabled);

    // a second read does not create a duplicate
    p.get(42).await.unwrap();
    let topics = p.list().await.unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0].thread_id, 42);
}

#[tokio::test]
async fn setters_reject_values_out_of_bounds() {
    let p = policies();
    p.get(1).await.unwrap();

    assert!(matches!(
        p.set_block_days(1, 366).await,
        Err(PolicyError::OutOfRange { .. })
    ));
    assert!(matches!(
        p.set_warnings_limit(1, 0).await,
        Err(PolicyError::OutOfRange { .. })
    ));
    assert!(matches!(
        p.set_warnings_limit(1, 11).await,
        Err(PolicyError::OutOfRange { .. })
    ));
    assert!(matches!(
        p.set_repeat_window_days(1, 0).await,
        Err(PolicyError::OutOfRange { .. })
    ));
    assert!(matches!(
        p.set_repeat_window_days(1, 11).await,
        Err(PolicyError::OutOfRange { .. })
    ));

    // boundary values are fine
    p.set_block_days(1, 0).await.unwrap();
    p.set_block_days(1, 365).await.unwrap();
    p.set_warnings_limit(1, 1).await.unwrap();
    p.set_repeat_window_days(1, 10).await.unwrap();
}

#[tokio::test]
async fn setters_report_unseen_threads() {
    let p = policies();

    assert!(matches!(
        p.set_block_days(99, 5).await,
        Err(PolicyError::TopicNotFound(99))
    ));
    assert!(matches!(
        p.set_enabled(99, false).await,
        Err(PolicyError::TopicNotFound(99))
    ));
}

#[tokio::test]
async fn updates_are_visible_through_the_cache() {
    let p = policies();

    // prime the cache, then mutate
    assert_eq!(p.get(7).await.unwrap().warnings_limit, 3);
    p.set_warnings_limit(7, 9).await.unwrap();
    assert_eq!(p.get(7).await.unwrap().warnings_limit, 9);

    p.set_enabled(7, false).await.unwrap();
    assert!(!p.get(7).await.unwrap().enabled);
}

#[tokio::test]
async fn store_keeps_one_row_per_thread() {
    let store = Arc::new(MemStore::new());
    let p = Policies::new(store.clone());

    p.get(0).await.unwrap();
    p.get(1).await.unwrap();
    p.get(0).await.unwrap();

    assert_eq!(store.list_topics().await.unwrap().len(), 2);
}
