//! src/adguard.rs
//! AdGuard – silnik decyzyjny moderacji ogłoszeń.
//!
//! Jeden post wchodzi, jeden werdykt wychodzi: `Allowed` / `Warned` / `Banned`.
//! Po drodze: prefiltr długości, polityka wątku, dokładne dopasowanie tekstu,
//! skan rozmyty TF-IDF, dokładne dopasowanie fingerprinta zdjęcia, drabinka
//! ostrzeżeń i – po przekroczeniu limitu – restrykcja przez port `Enforcer`.
//!
//! Transport czatu (kasowanie wiadomości, odpowiedzi, powiadomienia) żyje poza
//! crate'em: konsumuje werdykt. Silnik sam wykonuje wyłącznie samą restrykcję,
//! bo jej niepowodzenie zmienia semantykę drabinki (reset i tak następuje).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::AppContext;
use crate::db::{AdRecord, Store as _, now_unix};
use crate::normalize::normalize;
use crate::policy::Policies;
use crate::similarity::{DUPLICATE_THRESHOLD, REVIEW_THRESHOLD, Similarity, similarity};

/// Posty bez zdjęcia i krótsze niż tyle znaków nie są ogłoszeniami.
/// Twardy prefiltr, celowo niekonfigurowalny per wątek.
const MIN_AD_CHARS: usize = 20;

const BAN_REASON: &str = "Powtarzające się naruszenia";

/* =========================================
   Zdarzenie wejściowe i werdykty
   ========================================= */

/// Post przychodzący z transportu czatu.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostEvent {
    pub user_id: i64,
    pub first_name: String,
    /// 0 = wątek General.
    pub thread_id: i64,
    pub message_id: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// Nieprzezroczysty fingerprint zdjęcia od platformy.
    pub photo_fingerprint: Option<String>,
}

impl PostEvent {
    /// Treść brana do oceny: tekst wiadomości albo podpis zdjęcia.
    pub fn raw_text(&self) -> &str {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.caption.as_deref())
            .unwrap_or("")
    }
}

/// Wynik ewaluacji – transport wykonuje z niego resztę skutków ubocznych.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    /// Bez akcji.
    Allowed,
    /// Transport kasuje post i odpowiada ostrzeżeniem nr `count`/`limit`.
    Warned { reason: String, count: i64, limit: i64 },
    /// Transport kasuje post i powiadamia użytkownika oraz administrację;
    /// restrykcja została już podjęta przez silnik. 0 = bezterminowo.
    Banned {
        reason: String,
        banned_until: i64,
        block_days: i64,
    },
}

/// Pasmo [0.35, 0.75): nie naruszenie, ale administracja dostaje sygnał.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFlag {
    pub user_id: i64,
    pub first_name: String,
    pub thread_id: i64,
    pub message_id: i64,
    pub score: f64,
    pub text: String,
    pub matched_text: String,
}

/// Port do platformy czatu. Obie operacje są best-effort z perspektywy
/// silnika: błąd jest logowany i nie przerywa ewaluacji.
#[async_trait]
pub trait Enforcer: Send + Sync {
    /// Odbierz użytkownikowi prawo pisania do `until_unix` (0 = na zawsze).
    async fn restrict_member(&self, user_id: i64, until_unix: i64) -> Result<()>;

    /// Powiadom administrację o podejrzanie podobnej wiadomości.
    async fn notify_review(&self, flag: &ReviewFlag) -> Result<()>;
}

struct Violation {
    ad_key: String,
    reason: String,
}

/* =========================================
   Silnik
   ========================================= */

pub struct AdGuard {
    ctx: Arc<AppContext>,
    policies: Policies,
    // serializacja per user: dwie wiadomości tego samego autora nie mogą
    // równolegle czytać i podbijać tej samej drabinki
    eval_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl AdGuard {
    pub fn new(ctx: Arc<AppContext>) -> Arc<Self> {
        let policies = Policies::new(ctx.store.clone());
        Arc::new(Self {
            ctx,
            policies,
            eval_locks: DashMap::new(),
        })
    }

    /// Serwis polityk wątków (również dla powierzchni administracyjnej).
    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    /// Pełna ewaluacja jednego posta. Błąd oznacza niedostępny magazyn –
    /// event nie został przetworzony i można go dostarczyć ponownie.
    pub async fn evaluate(&self, ev: &PostEvent, platform: &dyn Enforcer) -> Result<Verdict> {
        let raw = ev.raw_text();
        let photo = ev
            .photo_fingerprint
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("");

        // 1. prefiltr: krótki tekst bez zdjęcia to nie ogłoszenie
        if photo.is_empty() && raw.chars().count() < MIN_AD_CHARS {
            debug!(user = ev.user_id, "post below ad length, ignored");
            return Ok(Verdict::Allowed);
        }

        // 2. polityka wątku (leniwie tworzona przy pierwszym poście)
        let policy = self.policies.get(ev.thread_id).await?;
        if !policy.enabled {
            return Ok(Verdict::Allowed);
        }

        let lock = self.user_lock(ev.user_id);
        let _guard = lock.lock().await;

        let store = &self.ctx.store;
        let now = now_unix();
        let since = now - policy.repeat_window_secs();
        let norm = normalize(raw);

        let mut violation: Option<Violation> = None;

        // 4. dokładne dopasowanie tekstu w oknie
        if !norm.is_empty() {
            if let Some(rec) = store
                .find_recent_ad(ev.user_id, None, Some(&norm), since)
                .await?
            {
                let reason = reason_exact_text(&rec, ev.thread_id);
                store.relocate_ad(rec.id, ev.thread_id).await?;
                violation = Some(Violation {
                    ad_key: norm.clone(),
                    reason,
                });
            } else {
                // 5. skan rozmyty: pierwszy kandydat nad progiem wygrywa
                violation = self.fuzzy_scan(ev, &norm, since, platform).await?;
            }
        }

        // 6. dokładne dopasowanie fingerprinta zdjęcia
        if violation.is_none() && !photo.is_empty() {
            if let Some(rec) = store
                .find_recent_ad(ev.user_id, Some(photo), None, since)
                .await?
            {
                let reason = reason_exact_photo(&rec, ev.thread_id);
                store.relocate_ad(rec.id, ev.thread_id).await?;
                violation = Some(Violation {
                    ad_key: photo.to_string(),
                    reason,
                });
            }
        }

        // 7. czysto – zapisz post do historii i przepuść
        let Some(violation) = violation else {
            store
                .insert_ad(ev.user_id, ev.thread_id, &norm, photo)
                .await?;
            debug!(user = ev.user_id, thread = ev.thread_id, "post accepted");
            return Ok(Verdict::Allowed);
        };

        // 8. drabinka ostrzeżeń
        let count = store.bump_warning(ev.user_id, &violation.ad_key).await?;
        if count < policy.warnings_limit {
            info!(
                user = ev.user_id,
                count,
                limit = policy.warnings_limit,
                "duplicate ad, warning issued"
            );
            return Ok(Verdict::Warned {
                reason: violation.reason,
                count,
                limit: policy.warnings_limit,
            });
        }

        let banned_until = if policy.block_days > 0 {
            now + policy.block_days * 86_400
        } else {
            0
        };
        match platform.restrict_member(ev.user_id, banned_until).await {
            Ok(()) => {
                store
                    .insert_ban(ev.user_id, &ev.first_name, banned_until, BAN_REASON)
                    .await?;
                info!(
                    user = ev.user_id,
                    banned_until, "warnings limit reached, user restricted"
                );
            }
            Err(e) => {
                // restrykcja jest best-effort: bez retry, bez wpisu na listę
                // blokad, ale drabinka i tak się resetuje
                warn!(error = ?e, user = ev.user_id, "restriction failed");
            }
        }
        store.reset_warnings(ev.user_id, &violation.ad_key).await?;

        Ok(Verdict::Banned {
            reason: violation.reason,
            banned_until,
            block_days: policy.block_days,
        })
    }

    /// Skan kandydatów tekstowych (bez zdjęcia) w oknie. Short-circuit na
    /// pierwszym wyniku >= progu duplikatu – koszt ograniczony rozmiarem okna,
    /// nie szukamy najlepszego dopasowania. Pasmo przeglądowe nie przerywa
    /// skanu, a błąd pojedynczego kandydata liczy się jak brak dopasowania.
    async fn fuzzy_scan(
        &self,
        ev: &PostEvent,
        norm: &str,
        since: i64,
        platform: &dyn Enforcer,
    ) -> Result<Option<Violation>> {
        for rec in self.ctx.store.list_recent_ads(ev.user_id, since).await? {
            if rec.text.is_empty() || !rec.photo_id.is_empty() {
                continue;
            }
            match similarity(norm, &rec.text) {
                Similarity::Score(score) if score >= DUPLICATE_THRESHOLD => {
                    return Ok(Some(Violation {
                        ad_key: rec.text.clone(),
                        reason: reason_fuzzy(&rec, ev.thread_id, score),
                    }));
                }
                Similarity::Score(score) if score >= REVIEW_THRESHOLD => {
                    let flag = ReviewFlag {
                        user_id: ev.user_id,
                        first_name: ev.first_name.clone(),
                        thread_id: ev.thread_id,
                        message_id: ev.message_id,
                        score,
                        text: ev.raw_text().to_string(),
                        matched_text: rec.text.clone(),
                    };
                    if let Err(e) = platform.notify_review(&flag).await {
                        warn!(error = ?e, user = ev.user_id, "review notification failed");
                    }
                }
                Similarity::Score(_) => {}
                Similarity::NotComputable => {
                    debug!(candidate = rec.id, "similarity not computable, skipped");
                }
            }
        }
        Ok(None)
    }

    fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        if self.eval_locks.len() > 4096 {
            // zostaw tylko wpisy aktualnie trzymane przez ewaluacje
            self.eval_locks.retain(|_, l| Arc::strong_count(l) > 1);
        }
        self.eval_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/* =========================================
   Teksty powodów
   ========================================= */

fn seen_at(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|d| d.format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_default()
}

fn thread_phrase(rec: &AdRecord, current_thread: i64) -> &'static str {
    if rec.thread_id == current_thread {
        "w tym wątku"
    } else {
        "w innym wątku"
    }
}

fn reason_exact_text(rec: &AdRecord, current_thread: i64) -> String {
    format!(
        "to ogłoszenie zostało już opublikowane {} {}.",
        thread_phrase(rec, current_thread),
        seen_at(rec.posted_at)
    )
}

fn reason_exact_photo(rec: &AdRecord, current_thread: i64) -> String {
    format!(
        "to zdjęcie zostało już opublikowane {} {}.",
        thread_phrase(rec, current_thread),
        seen_at(rec.posted_at)
    )
}

fn reason_fuzzy(rec: &AdRecord, current_thread: i64, score: f64) -> String {
    format!(
        "wiadomość jest zbyt podobna (zbieżność {}%) do ogłoszenia opublikowanego {} {}.",
        (score * 100.0) as i64,
        thread_phrase(rec, current_thread),
        seen_at(rec.posted_at)
    )
}
