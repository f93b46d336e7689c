// src/lib.rs

pub mod adguard;
pub mod config;
pub mod db;
pub mod logging;
pub mod normalize;
pub mod policy;
pub mod similarity;

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use config::Settings;
use db::{PgStore, Store};

/// Globalny kontekst aplikacji.
/// Tu trzymamy magazyn, konfigurację i gotowy serwis AdGuard.
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<dyn Store>,
    adguard: OnceCell<Arc<adguard::AdGuard>>,
}

impl AppContext {
    /// Bootstrap całej aplikacji:
    /// - logi
    /// - połączenie z DB + idempotentny DDL
    /// - stworzenie i wstrzyknięcie AdGuard do OnceCell
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        // 1) logi
        logging::init(&settings);

        // 2) DB
        let pool = db::connect(&settings.database.url, settings.database.max_connections).await?;
        PgStore::ensure_tables(&pool).await?;

        // 3) kontekst + serwisy
        Ok(Self::assemble(settings, Arc::new(PgStore::new(pool))))
    }

    /// Złóż kontekst na gotowym magazynie – ta ścieżka nie dotyka logów ani
    /// bazy, więc nadaje się też do osadzania silnika na własnym `Store`.
    pub fn assemble(settings: Settings, store: Arc<dyn Store>) -> Arc<Self> {
        let ctx = Arc::new(Self {
            settings,
            store,
            adguard: OnceCell::new(),
        });

        let ag = adguard::AdGuard::new(ctx.clone());
        let _ = ctx.adguard.set(ag); // set() można wołać tylko raz

        ctx
    }

    /// Wygodny getter: daj mi AdGuarda (Arc).
    pub fn adguard(&self) -> Arc<adguard::AdGuard> {
        self.adguard.get().expect("AdGuard not initialized").clone()
    }

    /// Środowisko: "production" | "development".
    /// Czytamy z ENV `GHS_ENV`; brak → "development".
    #[inline]
    pub fn env(&self) -> String {
        std::env::var("GHS_ENV").unwrap_or_else(|_| "development".to_string())
    }
}
