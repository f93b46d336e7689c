use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;

use greenhills_security::AppContext;
use greenhills_security::adguard::{Enforcer, PostEvent, ReviewFlag, Verdict};
use greenhills_security::config::Settings;
use greenhills_security::db::{MemStore, Store as _};
use greenhills_security::normalize::normalize;

const SOFA_AD: &str = "Selling blue sofa, call 555-1234, price negotiable today";
// one word swapped -> similarity ~0.78, above the duplicate threshold
const SOFA_AD_PARAPHRASE: &str = "Selling blue sofa, call 555-1234, price negotiable now";
// half the vocabulary shared -> similarity ~0.46, review band only
const SOFA_AD_LOOSE: &str = "Selling blue sofa, call! Price offers welcome anytime";

#[derive(Default)]
struct MockEnforcer {
    fail_restrict: bool,
    restricted: Mutex<Vec<(i64, i64)>>,
    reviews: Mutex<Vec<ReviewFlag>>,
}

impl MockEnforcer {
    fn failing() -> Self {
        Self {
            fail_restrict: true,
            ..Self::default()
        }
    }

    fn restrictions(&self) -> Vec<(i64, i64)> {
        self.restricted.lock().unwrap().clone()
    }

    fn reviews(&self) -> Vec<ReviewFlag> {
        self.reviews.lock().unwrap().clone()
    }
}

#[async_trait]
impl Enforcer for MockEnforcer {
    async fn restrict_member(&self, user_id: i64, until_unix: i64) -> Result<()> {
        if self.fail_restrict {
            anyhow::bail!("chat platform rejected the restriction call");
        }
        self.restricted.lock().unwrap().push((user_id, until_unix));
        Ok(())
    }

    async fn notify_review(&self, flag: &ReviewFlag) -> Result<()> {
        self.reviews.lock().unwrap().push(flag.clone());
        Ok(())
    }
}

fn setup() -> (Arc<AppContext>, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let ctx = AppContext::assemble(Settings::for_tests(), store.clone());
    (ctx, store)
}

fn text_event(user_id: i64, thread_id: i64, text: &str) -> PostEvent {
    PostEvent {
        user_id,
        first_name: "Anna".into(),
        thread_id,
        message_id: 100,
        text: Some(text.into()),
        caption: None,
        photo_fingerprint: None,
    }
}

fn photo_event(user_id: i64, thread_id: i64, fingerprint: &str, caption: Option<&str>) -> PostEvent {
    PostEvent {
        user_id,
        first_name: "Anna".into(),
        thread_id,
        message_id: 100,
        text: None,
        caption: caption.map(Into::into),
        photo_fingerprint: Some(fingerprint.into()),
    }
}

async fn eval(ctx: &Arc<AppContext>, enforcer: &MockEnforcer, ev: &PostEvent) -> Verdict {
    ctx.adguard().evaluate(ev, enforcer).await.unwrap()
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[tokio::test]
async fn first_post_is_recorded_and_allowed() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();

    let verdict = eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    assert_eq!(verdict, Verdict::Allowed);

    let ads = store.all_ads();
    assert_eq!(ads.len(), 1);
    assert_eq!(ads[0].text, normalize(SOFA_AD));
    assert_eq!(ads[0].thread_id, 1);
}

#[tokio::test]
async fn exact_repeat_walks_the_warning_ladder_then_bans() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();
    let key = normalize(SOFA_AD);

    // default policy: warnings_limit = 3, block_days = 5, window = 5 days
    assert_eq!(eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await, Verdict::Allowed);

    match eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await {
        Verdict::Warned { reason, count, limit } => {
            assert_eq!((count, limit), (1, 3));
            assert!(reason.contains("w tym wątku"), "reason: {reason}");
        }
        other => panic!("expected first warning, got {other:?}"),
    }
    assert_eq!(store.warning_count(7, &key).await.unwrap(), 1);
    assert!(store.last_warning_at(7, &key).is_some());

    match eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await {
        Verdict::Warned { count, limit, .. } => assert_eq!((count, limit), (2, 3)),
        other => panic!("expected second warning, got {other:?}"),
    }

    let before = now_unix();
    match eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await {
        Verdict::Banned { banned_until, block_days, .. } => {
            assert_eq!(block_days, 5);
            assert!(banned_until >= before + 5 * 86_400);
            assert!(banned_until <= now_unix() + 5 * 86_400);
        }
        other => panic!("expected ban, got {other:?}"),
    }

    // restriction went out, ban got recorded, ladder reset
    assert_eq!(enforcer.restrictions().len(), 1);
    let bans = store.list_active_bans().await.unwrap();
    assert_eq!(bans.len(), 1);
    assert_eq!(bans[0].user_id, 7);
    assert_eq!(store.warning_count(7, &key).await.unwrap(), 0);
    assert!(store.last_warning_at(7, &key).is_none());

    // re-offending after the ban starts the ladder from 1 again
    match eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await {
        Verdict::Warned { count, .. } => assert_eq!(count, 1),
        other => panic!("expected ladder restart, got {other:?}"),
    }
}

#[tokio::test]
async fn repeat_in_another_thread_relocates_the_record() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();

    eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    match eval(&ctx, &enforcer, &text_event(7, 2, SOFA_AD)).await {
        Verdict::Warned { reason, .. } => {
            assert!(reason.contains("w innym wątku"), "reason: {reason}");
        }
        other => panic!("expected warning, got {other:?}"),
    }

    // "ostatnio widziano" wanders with the duplicate
    let ads = store.all_ads();
    assert_eq!(ads.len(), 1);
    assert_eq!(ads[0].thread_id, 2);
}

#[tokio::test]
async fn paraphrase_above_threshold_warns_with_the_earlier_key() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();
    let earlier_key = normalize(SOFA_AD);

    eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    match eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD_PARAPHRASE)).await {
        Verdict::Warned { reason, count, .. } => {
            assert_eq!(count, 1);
            assert!(reason.contains("zbieżność"), "reason: {reason}");
        }
        other => panic!("expected fuzzy warning, got {other:?}"),
    }

    // the ledger key is the earlier stored text, not the new paraphrase
    assert_eq!(store.warning_count(7, &earlier_key).await.unwrap(), 1);
    assert_eq!(
        store
            .warning_count(7, &normalize(SOFA_AD_PARAPHRASE))
            .await
            .unwrap(),
        0
    );
    // the offending post itself was not recorded
    assert_eq!(store.all_ads().len(), 1);
}

#[tokio::test]
async fn review_band_allows_but_notifies_admins() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();

    eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    let verdict = eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD_LOOSE)).await;
    assert_eq!(verdict, Verdict::Allowed);

    let reviews = enforcer.reviews();
    assert_eq!(reviews.len(), 1);
    assert!(reviews[0].score >= 0.35 && reviews[0].score < 0.75);
    assert_eq!(reviews[0].matched_text, normalize(SOFA_AD));

    // allowed post still lands in history, ladder untouched
    assert_eq!(store.all_ads().len(), 2);
    assert_eq!(
        store.warning_count(7, &normalize(SOFA_AD)).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn fuzzy_scan_skips_photo_records() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();

    // prior post carries a photo, so it is not a fuzzy-text candidate
    eval(&ctx, &enforcer, &photo_event(7, 1, "fp-1", Some(SOFA_AD))).await;
    let verdict = eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD_PARAPHRASE)).await;

    assert_eq!(verdict, Verdict::Allowed);
    assert!(enforcer.reviews().is_empty());
    assert_eq!(store.all_ads().len(), 2);
}

#[tokio::test]
async fn short_text_without_photo_is_ignored_entirely() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();

    let verdict = eval(&ctx, &enforcer, &text_event(7, 1, "too short to be ad")).await;
    assert_eq!(verdict, Verdict::Allowed);
    assert!(store.all_ads().is_empty());

    // exactly 20 characters is already an ad
    let verdict = eval(&ctx, &enforcer, &text_event(7, 1, "aaaaaaaaaaaaaaaaaaaa")).await;
    assert_eq!(verdict, Verdict::Allowed);
    assert_eq!(store.all_ads().len(), 1);
}

#[tokio::test]
async fn disabled_topic_lets_duplicates_through() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();

    eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    ctx.adguard().policies().set_enabled(1, false).await.unwrap();

    let verdict = eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    assert_eq!(verdict, Verdict::Allowed);
    // no processing at all: nothing recorded, nothing counted
    assert_eq!(store.all_ads().len(), 1);
    assert_eq!(
        store.warning_count(7, &normalize(SOFA_AD)).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn photo_fingerprint_repeat_is_a_violation() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();

    // bare photo: no caption, passes the length pre-filter anyway
    assert_eq!(
        eval(&ctx, &enforcer, &photo_event(7, 1, "AgACAgIAAxk", None)).await,
        Verdict::Allowed
    );

    match eval(&ctx, &enforcer, &photo_event(7, 1, "AgACAgIAAxk", None)).await {
        Verdict::Warned { reason, count, .. } => {
            assert_eq!(count, 1);
            assert!(reason.contains("zdjęcie"), "reason: {reason}");
        }
        other => panic!("expected photo warning, got {other:?}"),
    }
    assert_eq!(store.warning_count(7, "AgACAgIAAxk").await.unwrap(), 1);
}

#[tokio::test]
async fn caption_of_a_photo_matches_like_text() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();
    let key = normalize(SOFA_AD);

    eval(&ctx, &enforcer, &photo_event(7, 1, "fp-1", Some(SOFA_AD))).await;

    // different photo, same caption: the text check wins and keys the ledger
    match eval(&ctx, &enforcer, &photo_event(7, 1, "fp-2", Some(SOFA_AD))).await {
        Verdict::Warned { count, .. } => assert_eq!(count, 1),
        other => panic!("expected caption warning, got {other:?}"),
    }
    assert_eq!(store.warning_count(7, &key).await.unwrap(), 1);
}

#[tokio::test]
async fn records_outside_the_repeat_window_do_not_count() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();

    eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    let id = store.all_ads()[0].id;
    // push the record past the 5-day window
    store.backdate_ad(id, now_unix() - 6 * 86_400);

    let verdict = eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    assert_eq!(verdict, Verdict::Allowed);
    assert_eq!(store.all_ads().len(), 2);
}

#[tokio::test]
async fn zero_block_days_means_permanent_ban() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::default();

    eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    let adguard = ctx.adguard();
    adguard.policies().set_block_days(1, 0).await.unwrap();
    adguard.policies().set_warnings_limit(1, 1).await.unwrap();

    match eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await {
        Verdict::Banned { banned_until, block_days, .. } => {
            assert_eq!(banned_until, 0);
            assert_eq!(block_days, 0);
        }
        other => panic!("expected permanent ban, got {other:?}"),
    }

    assert_eq!(enforcer.restrictions(), vec![(7, 0)]);
    let bans = store.list_active_bans().await.unwrap();
    assert_eq!(bans.len(), 1);
    assert_eq!(bans[0].banned_until, 0);
}

#[tokio::test]
async fn failed_restriction_still_resets_the_ladder() {
    let (ctx, store) = setup();
    let enforcer = MockEnforcer::failing();
    let key = normalize(SOFA_AD);

    eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    ctx.adguard().policies().set_warnings_limit(1, 1).await.unwrap();

    match eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await {
        Verdict::Banned { .. } => {}
        other => panic!("expected ban verdict despite platform failure, got {other:?}"),
    }

    // no ban record without a successful restriction, but the ladder resets
    assert!(store.list_active_bans().await.unwrap().is_empty());
    assert_eq!(store.warning_count(7, &key).await.unwrap(), 0);
}

#[tokio::test]
async fn ban_listing_tracks_unban_and_expiry() {
    let (_ctx, store) = setup();

    store.insert_ban(1, "Anna", 0, "ręczna blokada").await.unwrap();
    store
        .insert_ban(2, "Borys", now_unix() - 10, "wygasła")
        .await
        .unwrap();
    store
        .insert_ban(3, "Celina", now_unix() + 3_600, "terminowa")
        .await
        .unwrap();

    // permanent + still-running are active, the expired one is not
    let active = store.list_active_bans().await.unwrap();
    assert_eq!(active.len(), 2);

    store.remove_ban(1).await.unwrap();
    let active = store.list_active_bans().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].user_id, 3);
}

#[tokio::test]
async fn different_users_do_not_share_history() {
    let (ctx, _store) = setup();
    let enforcer = MockEnforcer::default();

    eval(&ctx, &enforcer, &text_event(7, 1, SOFA_AD)).await;
    let verdict = eval(&ctx, &enforcer, &text_event(8, 1, SOFA_AD)).await;
    assert_eq!(verdict, Verdict::Allowed);
}
