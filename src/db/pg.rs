//! src/db/pg.rs
//! `PgStore` – produkcyjna implementacja `Store` na sqlx/Postgres.
//!
//! DDL idempotentny, trzymany w kodzie (schemat `ghs`). Timestampy to unix
//! sekundy w BIGINT – cała matematyka okien w silniku liczy w sekundach.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

use crate::policy::TopicPolicy;

use super::{AdRecord, BanRecord, Db, Store, now_unix};

pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &Db {
        &self.db
    }

    pub async fn ensure_tables(db: &Db) -> Result<()> {
        sqlx::query(r#"CREATE SCHEMA IF NOT EXISTS ghs;"#)
            .execute(db)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ghs.ads (
              id         BIGSERIAL PRIMARY KEY,
              user_id    BIGINT NOT NULL,
              thread_id  BIGINT NOT NULL,
              text       TEXT   NOT NULL DEFAULT '',
              photo_id   TEXT   NOT NULL DEFAULT '',
              posted_at  BIGINT NOT NULL
            );
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ghs.ad_warnings (
              id             BIGSERIAL PRIMARY KEY,
              user_id        BIGINT NOT NULL,
              ad_key         TEXT   NOT NULL,
              warning_count  BIGINT NOT NULL,
              last_warning   BIGINT NOT NULL
            );
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ghs.topics (
              thread_id           BIGINT PRIMARY KEY,
              enabled             BOOLEAN NOT NULL DEFAULT TRUE,
              block_days          BIGINT  NOT NULL DEFAULT 5,
              warnings_limit      BIGINT  NOT NULL DEFAULT 3,
              repeat_window_days  BIGINT  NOT NULL DEFAULT 5
            );
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ghs.bans (
              id            BIGSERIAL PRIMARY KEY,
              user_id       BIGINT NOT NULL,
              first_name    TEXT   NOT NULL DEFAULT '',
              banned_until  BIGINT NOT NULL DEFAULT 0,
              reason        TEXT   NOT NULL DEFAULT 'Nie podano'
            );
            "#,
        )
        .execute(db)
        .await?;

        for ddl in [
            r#"CREATE INDEX IF NOT EXISTS idx_ads_user_posted
                 ON ghs.ads (user_id, posted_at DESC);"#,
            r#"CREATE INDEX IF NOT EXISTS idx_ads_user_photo
                 ON ghs.ads (user_id, photo_id, posted_at DESC);"#,
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_ad_warnings_user_key
                 ON ghs.ad_warnings (user_id, ad_key);"#,
            r#"CREATE INDEX IF NOT EXISTS idx_bans_user
                 ON ghs.bans (user_id);"#,
        ] {
            sqlx::query(ddl).execute(db).await?;
        }

        Ok(())
    }
}

fn topic_from_row(row: &sqlx::postgres::PgRow) -> Result<TopicPolicy> {
    Ok(TopicPolicy {
        thread_id: row.try_get("thread_id")?,
        enabled: row.try_get("enabled")?,
        block_days: row.try_get("block_days")?,
        warnings_limit: row.try_get("warnings_limit")?,
        repeat_window_days: row.try_get("repeat_window_days")?,
    })
}

fn ad_from_row(row: &sqlx::postgres::PgRow) -> Result<AdRecord> {
    Ok(AdRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        thread_id: row.try_get("thread_id")?,
        text: row.try_get("text")?,
        photo_id: row.try_get("photo_id")?,
        posted_at: row.try_get("posted_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn get_or_create_topic(&self, thread_id: i64) -> Result<TopicPolicy> {
        let defaults = TopicPolicy::new(thread_id);
        sqlx::query(
            r#"
            INSERT INTO ghs.topics (thread_id, enabled, block_days, warnings_limit, repeat_window_days)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (thread_id) DO NOTHING
            "#,
        )
        .bind(thread_id)
        .bind(defaults.enabled)
        .bind(defaults.block_days)
        .bind(defaults.warnings_limit)
        .bind(defaults.repeat_window_days)
        .execute(&self.db)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT thread_id, enabled, block_days, warnings_limit, repeat_window_days
            FROM ghs.topics
            WHERE thread_id = $1
            "#,
        )
        .bind(thread_id)
        .fetch_one(&self.db)
        .await?;

        topic_from_row(&row)
    }

    async fn list_topics(&self) -> Result<Vec<TopicPolicy>> {
        let rows = sqlx::query(
            r#"
            SELECT thread_id, enabled, block_days, warnings_limit, repeat_window_days
            FROM ghs.topics
            ORDER BY thread_id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(topic_from_row).collect()
    }

    async fn set_topic_enabled(&self, thread_id: i64, enabled: bool) -> Result<bool> {
        let res = sqlx::query(r#"UPDATE ghs.topics SET enabled = $1 WHERE thread_id = $2"#)
            .bind(enabled)
            .bind(thread_id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_topic_block_days(&self, thread_id: i64, days: i64) -> Result<bool> {
        let res = sqlx::query(r#"UPDATE ghs.topics SET block_days = $1 WHERE thread_id = $2"#)
            .bind(days)
            .bind(thread_id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_topic_warnings_limit(&self, thread_id: i64, limit: i64) -> Result<bool> {
        let res = sqlx::query(r#"UPDATE ghs.topics SET warnings_limit = $1 WHERE thread_id = $2"#)
            .bind(limit)
            .bind(thread_id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_topic_repeat_window_days(&self, thread_id: i64, days: i64) -> Result<bool> {
        let res =
            sqlx::query(r#"UPDATE ghs.topics SET repeat_window_days = $1 WHERE thread_id = $2"#)
                .bind(days)
                .bind(thread_id)
                .execute(&self.db)
                .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_recent_ad(
        &self,
        user_id: i64,
        photo_id: Option<&str>,
        text: Option<&str>,
        since_unix: i64,
    ) -> Result<Option<AdRecord>> {
        if let Some(photo) = photo_id.filter(|p| !p.is_empty()) {
            let row = sqlx::query(
                r#"
                SELECT id, user_id, thread_id, text, photo_id, posted_at
                FROM ghs.ads
                WHERE user_id = $1 AND photo_id = $2 AND posted_at >= $3
                ORDER BY posted_at DESC
                LIMIT 1
                "#,
            )
            .bind(user_id)
            .bind(photo)
            .bind(since_unix)
            .fetch_optional(&self.db)
            .await?;

            if let Some(row) = row {
                return Ok(Some(ad_from_row(&row)?));
            }
        }

        if let Some(text) = text.filter(|t| !t.is_empty()) {
            let row = sqlx::query(
                r#"
                SELECT id, user_id, thread_id, text, photo_id, posted_at
                FROM ghs.ads
                WHERE user_id = $1 AND text = $2 AND posted_at >= $3
                ORDER BY posted_at DESC
                LIMIT 1
                "#,
            )
            .bind(user_id)
            .bind(text)
            .bind(since_unix)
            .fetch_optional(&self.db)
            .await?;

            if let Some(row) = row {
                return Ok(Some(ad_from_row(&row)?));
            }
        }

        Ok(None)
    }

    async fn list_recent_ads(&self, user_id: i64, since_unix: i64) -> Result<Vec<AdRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, thread_id, text, photo_id, posted_at
            FROM ghs.ads
            WHERE user_id = $1 AND posted_at >= $2
            ORDER BY posted_at DESC
            "#,
        )
        .bind(user_id)
        .bind(since_unix)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(ad_from_row).collect()
    }

    async fn insert_ad(
        &self,
        user_id: i64,
        thread_id: i64,
        text: &str,
        photo_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ghs.ads (user_id, thread_id, text, photo_id, posted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(thread_id)
        .bind(text)
        .bind(photo_id)
        .bind(now_unix())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn relocate_ad(&self, record_id: i64, new_thread_id: i64) -> Result<()> {
        sqlx::query(r#"UPDATE ghs.ads SET posted_at = $1, thread_id = $2 WHERE id = $3"#)
            .bind(now_unix())
            .bind(new_thread_id)
            .bind(record_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn warning_count(&self, user_id: i64, ad_key: &str) -> Result<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"SELECT warning_count FROM ghs.ad_warnings WHERE user_id = $1 AND ad_key = $2"#,
        )
        .bind(user_id)
        .bind(ad_key)
        .fetch_optional(&self.db)
        .await?;
        Ok(count.unwrap_or(0))
    }

    async fn bump_warning(&self, user_id: i64, ad_key: &str) -> Result<i64> {
        // pojedynczy upsert: dwie równoległe ewaluacje nie podbiją z tego
        // samego stanu
        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ghs.ad_warnings (user_id, ad_key, warning_count, last_warning)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (user_id, ad_key) DO UPDATE
               SET warning_count = ghs.ad_warnings.warning_count + 1,
                   last_warning  = $3
            RETURNING warning_count
            "#,
        )
        .bind(user_id)
        .bind(ad_key)
        .bind(now_unix())
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn reset_warnings(&self, user_id: i64, ad_key: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM ghs.ad_warnings WHERE user_id = $1 AND ad_key = $2"#)
            .bind(user_id)
            .bind(ad_key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_ban(
        &self,
        user_id: i64,
        first_name: &str,
        banned_until: i64,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ghs.bans (user_id, first_name, banned_until, reason)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(first_name)
        .bind(banned_until)
        .bind(reason)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn remove_ban(&self, user_id: i64) -> Result<()> {
        sqlx::query(r#"DELETE FROM ghs.bans WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn list_active_bans(&self) -> Result<Vec<BanRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, first_name, banned_until, reason
            FROM ghs.bans
            WHERE banned_until = 0 OR banned_until > $1
            ORDER BY id DESC
            "#,
        )
        .bind(now_unix())
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(BanRecord {
                    user_id: r.try_get("user_id")?,
                    first_name: r.try_get("first_name")?,
                    banned_until: r.try_get("banned_until")?,
                    reason: r.try_get("reason")?,
                })
            })
            .collect()
    }
}
