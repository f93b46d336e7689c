//! src/policy.rs
//! Polityka per wątek: flaga włączenia, czas blokady, limit ostrzeżeń i okno
//! powtórek. Wiersz powstaje leniwie (get-or-create z domyślnymi wartościami)
//! przy pierwszym poście w nieznanym wątku; mutacje tylko przez settery
//! z walidacją zakresów.

use std::sync::Arc;

use anyhow::Result;
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::db::Store;

pub const BLOCK_DAYS_MIN: i64 = 0; // 0 = blokada bezterminowa
pub const BLOCK_DAYS_MAX: i64 = 365;
pub const WARNINGS_LIMIT_MIN: i64 = 1; // 1 = ban przy pierwszym naruszeniu
pub const WARNINGS_LIMIT_MAX: i64 = 10;
pub const REPEAT_WINDOW_MIN: i64 = 1;
pub const REPEAT_WINDOW_MAX: i64 = 10;

/// Ustawienia moderacji jednego wątku (0 = wątek General).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicPolicy {
    pub thread_id: i64,
    pub enabled: bool,
    /// Dni blokady po przekroczeniu limitu; 0 = bezterminowo.
    pub block_days: i64,
    /// Ostrzeżenie nr `warnings_limit` zamienia się w ban.
    pub warnings_limit: i64,
    /// Okno (w dniach), w którym powtórka tej samej treści jest naruszeniem.
    pub repeat_window_days: i64,
}

impl TopicPolicy {
    pub fn new(thread_id: i64) -> Self {
        Self {
            thread_id,
            enabled: true,
            block_days: 5,
            warnings_limit: 3,
            repeat_window_days: 5,
        }
    }

    /// Okno powtórek w sekundach.
    pub fn repeat_window_secs(&self) -> i64 {
        self.repeat_window_days * 86_400
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("{what} poza zakresem {min}..={max}: {value}")]
    OutOfRange {
        what: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },
    #[error("wątek {0} nie był jeszcze obserwowany")]
    TopicNotFound(i64),
    /// Magazyn niedostępny – stan nieznany, operację można powtórzyć.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

fn check_range(what: &'static str, min: i64, max: i64, value: i64) -> Result<(), PolicyError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(PolicyError::OutOfRange {
            what,
            min,
            max,
            value,
        })
    }
}

/// Serwis polityk: get-or-create z cache (odczyt leci raz na każdą wiadomość
/// w grupie) i settery z jawnym unieważnieniem wpisu.
pub struct Policies {
    store: Arc<dyn Store>,
    cache: Cache<i64, TopicPolicy>,
}

impl Policies {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: Cache::new(1024),
        }
    }

    /// Polityka wątku; nieznany wątek dostaje wiersz z domyślnymi ustawieniami.
    pub async fn get(&self, thread_id: i64) -> Result<TopicPolicy> {
        if let Some(policy) = self.cache.get(&thread_id).await {
            return Ok(policy);
        }
        let policy = self.store.get_or_create_topic(thread_id).await?;
        self.cache.insert(thread_id, policy.clone()).await;
        Ok(policy)
    }

    /// Sumaryczny widok wszystkich obserwowanych wątków.
    pub async fn list(&self) -> Result<Vec<TopicPolicy>> {
        self.store.list_topics().await
    }

    pub async fn set_enabled(&self, thread_id: i64, enabled: bool) -> Result<(), PolicyError> {
        let found = self.store.set_topic_enabled(thread_id, enabled).await?;
        self.finish_update(thread_id, found).await
    }

    pub async fn set_block_days(&self, thread_id: i64, days: i64) -> Result<(), PolicyError> {
        check_range("block_days", BLOCK_DAYS_MIN, BLOCK_DAYS_MAX, days)?;
        let found = self.store.set_topic_block_days(thread_id, days).await?;
        self.finish_update(thread_id, found).await
    }

    pub async fn set_warnings_limit(&self, thread_id: i64, limit: i64) -> Result<(), PolicyError> {
        check_range(
            "warnings_limit",
            WARNINGS_LIMIT_MIN,
            WARNINGS_LIMIT_MAX,
            limit,
        )?;
        let found = self.store.set_topic_warnings_limit(thread_id, limit).await?;
        self.finish_update(thread_id, found).await
    }

    pub async fn set_repeat_window_days(
        &self,
        thread_id: i64,
        days: i64,
    ) -> Result<(), PolicyError> {
        check_range(
            "repeat_window_days",
            REPEAT_WINDOW_MIN,
            REPEAT_WINDOW_MAX,
            days,
        )?;
        let found = self
            .store
            .set_topic_repeat_window_days(thread_id, days)
            .await?;
        self.finish_update(thread_id, found).await
    }

    async fn finish_update(&self, thread_id: i64, found: bool) -> Result<(), PolicyError> {
        if !found {
            return Err(PolicyError::TopicNotFound(thread_id));
        }
        self.cache.invalidate(&thread_id).await;
        Ok(())
    }
}
