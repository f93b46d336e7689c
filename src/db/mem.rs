//! src/db/mem.rs
//! `MemStore` – pamięciowa implementacja `Store` o semantyce identycznej
//! z `PgStore` (okna czasowe, upsert licznika, kolejność "najnowsze najpierw").
//! Używana w testach i przy osadzaniu silnika bez Postgresa.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::policy::TopicPolicy;

use super::{AdRecord, BanRecord, Store, now_unix};

#[derive(Default)]
struct Inner {
    ads: Vec<AdRecord>,
    next_ad_id: i64,
    warnings: HashMap<(i64, String), i64>,
    last_warning: HashMap<(i64, String), i64>,
    topics: HashMap<i64, TopicPolicy>,
    bans: Vec<BanRecord>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Podgląd pełnej historii (bez okna) – przydatny w asercjach testowych.
    pub fn all_ads(&self) -> Vec<AdRecord> {
        self.inner.lock().unwrap().ads.clone()
    }

    /// Cofnij timestamp rekordu – testy okna czasowego nie mogą czekać dniami.
    pub fn backdate_ad(&self, record_id: i64, posted_at: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(rec) = inner.ads.iter_mut().find(|r| r.id == record_id) {
            rec.posted_at = posted_at;
        }
    }

    /// Timestamp ostatniego ostrzeżenia dla pary (user, klucz), jeśli istnieje.
    pub fn last_warning_at(&self, user_id: i64, ad_key: &str) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .last_warning
            .get(&(user_id, ad_key.to_string()))
            .copied()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_or_create_topic(&self, thread_id: i64) -> Result<TopicPolicy> {
        let mut inner = self.inner.lock().unwrap();
        let topic = inner
            .topics
            .entry(thread_id)
            .or_insert_with(|| TopicPolicy::new(thread_id));
        Ok(topic.clone())
    }

    async fn list_topics(&self) -> Result<Vec<TopicPolicy>> {
        let inner = self.inner.lock().unwrap();
        let mut topics: Vec<TopicPolicy> = inner.topics.values().cloned().collect();
        topics.sort_by_key(|t| t.thread_id);
        Ok(topics)
    }

    async fn set_topic_enabled(&self, thread_id: i64, enabled: bool) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.topics.get_mut(&thread_id) {
            Some(t) => {
                t.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_topic_block_days(&self, thread_id: i64, days: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.topics.get_mut(&thread_id) {
            Some(t) => {
                t.block_days = days;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_topic_warnings_limit(&self, thread_id: i64, limit: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.topics.get_mut(&thread_id) {
            Some(t) => {
                t.warnings_limit = limit;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_topic_repeat_window_days(&self, thread_id: i64, days: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.topics.get_mut(&thread_id) {
            Some(t) => {
                t.repeat_window_days = days;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_recent_ad(
        &self,
        user_id: i64,
        photo_id: Option<&str>,
        text: Option<&str>,
        since_unix: i64,
    ) -> Result<Option<AdRecord>> {
        let inner = self.inner.lock().unwrap();

        if let Some(photo) = photo_id.filter(|p| !p.is_empty()) {
            let hit = inner
                .ads
                .iter()
                .filter(|r| r.user_id == user_id && r.posted_at >= since_unix && r.photo_id == photo)
                .max_by_key(|r| (r.posted_at, r.id))
                .cloned();
            if hit.is_some() {
                return Ok(hit);
            }
        }
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            let hit = inner
                .ads
                .iter()
                .filter(|r| r.user_id == user_id && r.posted_at >= since_unix && r.text == text)
                .max_by_key(|r| (r.posted_at, r.id))
                .cloned();
            if hit.is_some() {
                return Ok(hit);
            }
        }
        Ok(None)
    }

    async fn list_recent_ads(&self, user_id: i64, since_unix: i64) -> Result<Vec<AdRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<AdRecord> = inner
            .ads
            .iter()
            .filter(|r| r.user_id == user_id && r.posted_at >= since_unix)
            .cloned()
            .collect();
        out.sort_by_key(|r| std::cmp::Reverse((r.posted_at, r.id)));
        Ok(out)
    }

    async fn insert_ad(
        &self,
        user_id: i64,
        thread_id: i64,
        text: &str,
        photo_id: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_ad_id += 1;
        let id = inner.next_ad_id;
        inner.ads.push(AdRecord {
            id,
            user_id,
            thread_id,
            text: text.to_string(),
            photo_id: photo_id.to_string(),
            posted_at: now_unix(),
        });
        Ok(())
    }

    async fn relocate_ad(&self, record_id: i64, new_thread_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(rec) = inner.ads.iter_mut().find(|r| r.id == record_id) {
            rec.thread_id = new_thread_id;
            rec.posted_at = now_unix();
        }
        Ok(())
    }

    async fn warning_count(&self, user_id: i64, ad_key: &str) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .warnings
            .get(&(user_id, ad_key.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn bump_warning(&self, user_id: i64, ad_key: &str) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let key = (user_id, ad_key.to_string());
        let count = inner.warnings.entry(key.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        inner.last_warning.insert(key, now_unix());
        Ok(count)
    }

    async fn reset_warnings(&self, user_id: i64, ad_key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let key = (user_id, ad_key.to_string());
        inner.warnings.remove(&key);
        inner.last_warning.remove(&key);
        Ok(())
    }

    async fn insert_ban(
        &self,
        user_id: i64,
        first_name: &str,
        banned_until: i64,
        reason: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.bans.push(BanRecord {
            user_id,
            first_name: first_name.to_string(),
            banned_until,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn remove_ban(&self, user_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.bans.retain(|b| b.user_id != user_id);
        Ok(())
    }

    async fn list_active_bans(&self) -> Result<Vec<BanRecord>> {
        let now = now_unix();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .bans
            .iter()
            .filter(|b| b.banned_until == 0 || b.banned_until > now)
            .cloned()
            .collect())
    }
}
