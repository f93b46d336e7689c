//! src/db/mod.rs
//! Warstwa trwałości: jeden wstrzykiwany interfejs `Store` nad czterema
//! tabelami (ads / ad_warnings / topics / bans) + pomocniki połączenia.
//!
//! Silnik decyzyjny nie trzyma żadnego globalnego uchwytu do bazy – dostaje
//! `Arc<dyn Store>` i nic więcej. Implementacje: `PgStore` (produkcja) oraz
//! `MemStore` (testy / embedding bez Postgresa, feature `test-utils`).

pub mod pg;

#[cfg(any(test, feature = "test-utils"))]
pub mod mem;

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};

use crate::policy::TopicPolicy;

pub use pg::PgStore;

#[cfg(any(test, feature = "test-utils"))]
pub use mem::MemStore;

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str, max: Option<u32>) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(max.unwrap_or(10))
        .connect(url)
        .await?;

    Ok(pool)
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Zapisane ogłoszenie (tylko posty zaakceptowane trafiają do historii).
/// Pusty string w `text`/`photo_id` oznacza brak danej treści.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdRecord {
    pub id: i64,
    pub user_id: i64,
    pub thread_id: i64,
    pub text: String,
    pub photo_id: String,
    pub posted_at: i64,
}

/// Wpis na liście blokad – wyłącznie do raportowania; stanem restrykcji
/// zarządza platforma czatu.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub user_id: i64,
    pub first_name: String,
    /// 0 = blokada bezterminowa.
    pub banned_until: i64,
    pub reason: String,
}

/// Interfejs trwałości wstrzykiwany do silnika.
///
/// Błąd z dowolnej metody znaczy "magazyn niedostępny": bieżąca ewaluacja
/// zostaje przerwana i event można bezpiecznie dostarczyć ponownie.
#[async_trait]
pub trait Store: Send + Sync {
    /* ---------- topics ---------- */

    /// Polityka wątku; nieznany wątek dostaje wiersz z domyślnymi ustawieniami.
    async fn get_or_create_topic(&self, thread_id: i64) -> Result<TopicPolicy>;

    /// Wszystkie obserwowane wątki (panel administracyjny).
    async fn list_topics(&self) -> Result<Vec<TopicPolicy>>;

    /// Każdy setter zwraca `false`, gdy wątek nigdy nie był obserwowany.
    async fn set_topic_enabled(&self, thread_id: i64, enabled: bool) -> Result<bool>;
    async fn set_topic_block_days(&self, thread_id: i64, days: i64) -> Result<bool>;
    async fn set_topic_warnings_limit(&self, thread_id: i64, limit: i64) -> Result<bool>;
    async fn set_topic_repeat_window_days(&self, thread_id: i64, days: i64) -> Result<bool>;

    /* ---------- ads history ---------- */

    /// Dokładne dopasowanie w oknie: najpierw fingerprint zdjęcia (jeśli jest),
    /// potem znormalizowany tekst. Zwraca najnowszy pasujący rekord.
    async fn find_recent_ad(
        &self,
        user_id: i64,
        photo_id: Option<&str>,
        text: Option<&str>,
        since_unix: i64,
    ) -> Result<Option<AdRecord>>;

    /// Kandydaci do skanu rozmytego: wszystkie rekordy użytkownika w oknie.
    async fn list_recent_ads(&self, user_id: i64, since_unix: i64) -> Result<Vec<AdRecord>>;

    /// Nowy wpis historii – wołane tylko, gdy nie stwierdzono naruszenia.
    async fn insert_ad(&self, user_id: i64, thread_id: i64, text: &str, photo_id: &str)
    -> Result<()>;

    /// Odśwież wątek + timestamp istniejącego rekordu ("ostatnio widziano").
    async fn relocate_ad(&self, record_id: i64, new_thread_id: i64) -> Result<()>;

    /* ---------- warning ledger ---------- */

    /// Stan drabinki dla (user, klucz treści); 0 gdy brak wpisu.
    async fn warning_count(&self, user_id: i64, ad_key: &str) -> Result<i64>;

    /// Atomowy insert-albo-inkrement; zwraca licznik PO podbiciu.
    async fn bump_warning(&self, user_id: i64, ad_key: &str) -> Result<i64>;

    /// Usuń wpis drabinki (no-op gdy brak – reset po banie musi być idempotentny).
    async fn reset_warnings(&self, user_id: i64, ad_key: &str) -> Result<()>;

    /* ---------- bans ---------- */

    async fn insert_ban(
        &self,
        user_id: i64,
        first_name: &str,
        banned_until: i64,
        reason: &str,
    ) -> Result<()>;

    async fn remove_ban(&self, user_id: i64) -> Result<()>;

    /// Blokady bezterminowe oraz te, które jeszcze nie wygasły.
    async fn list_active_bans(&self) -> Result<Vec<BanRecord>>;
}
