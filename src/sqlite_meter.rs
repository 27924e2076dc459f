//! SQLite-backed [`UsageMeter`].
//!
//! Each record is a single upsert that adds to the existing counters, so
//! concurrent writers for the same user, project and month never lose
//! increments.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use ragline_core::clock::{Clock, SystemClock};
use ragline_core::metering::{
    evaluate_limits, month_key, PlanType, UsageCounter, UsageDecision, UsageKind, UsageMeter,
    UsageRecord, UsageScope,
};

pub struct SqliteUsageMeter {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteUsageMeter {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl UsageMeter for SqliteUsageMeter {
    async fn check_limits(
        &self,
        scope: &UsageScope,
        plan: PlanType,
        kind: UsageKind,
    ) -> Result<UsageDecision> {
        let month = month_key(self.clock.now());
        let counter = self.usage(scope, &month).await?;
        Ok(evaluate_limits(plan, &counter, kind))
    }

    async fn record_usage(&self, scope: &UsageScope, record: &UsageRecord) -> Result<()> {
        let month = month_key(self.clock.now());
        let mut delta = UsageCounter::empty(&month);
        delta.apply(record);

        sqlx::query(
            r#"
            INSERT INTO usage_counters (user_id, project_id, month, mini_messages,
                                        premium_messages, indexed_pages, tokens)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, project_id, month) DO UPDATE SET
                mini_messages = mini_messages + excluded.mini_messages,
                premium_messages = premium_messages + excluded.premium_messages,
                indexed_pages = indexed_pages + excluded.indexed_pages,
                tokens = tokens + excluded.tokens
            "#,
        )
        .bind(&scope.user_id)
        .bind(&scope.project_id)
        .bind(&month)
        .bind(delta.mini_messages as i64)
        .bind(delta.premium_messages as i64)
        .bind(delta.indexed_pages as i64)
        .bind(delta.tokens as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn usage(&self, scope: &UsageScope, month: &str) -> Result<UsageCounter> {
        let row = sqlx::query(
            r#"
            SELECT mini_messages, premium_messages, indexed_pages, tokens
            FROM usage_counters
            WHERE user_id = ? AND project_id = ? AND month = ?
            "#,
        )
        .bind(&scope.user_id)
        .bind(&scope.project_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => UsageCounter {
                month: month.to_string(),
                mini_messages: row.get::<i64, _>("mini_messages") as u64,
                premium_messages: row.get::<i64, _>("premium_messages") as u64,
                indexed_pages: row.get::<i64, _>("indexed_pages") as u64,
                tokens: row.get::<i64, _>("tokens") as u64,
            },
            None => UsageCounter::empty(month),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use chrono::{TimeZone, Utc};
    use ragline_core::clock::ManualClock;

    async fn meter() -> (Arc<SqliteUsageMeter>, Arc<ManualClock>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("usage.sqlite"))
            .await
            .unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap(),
        ));
        (
            Arc::new(SqliteUsageMeter::with_clock(pool, clock.clone())),
            clock,
            dir,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_message_tracking_loses_nothing() {
        let (meter, _clock, _dir) = meter().await;
        let scope = UsageScope::new("u1", "p1");

        let mut handles = Vec::new();
        for i in 0..40u64 {
            let meter = meter.clone();
            let scope = scope.clone();
            handles.push(tokio::spawn(async move {
                let kind = if i % 4 == 0 {
                    UsageKind::PremiumMessage
                } else {
                    UsageKind::MiniMessage
                };
                meter
                    .record_usage(
                        &scope,
                        &UsageRecord {
                            kind,
                            amount: 1,
                            tokens: 7,
                        },
                    )
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let counter = meter.usage(&scope, "2026-03").await.unwrap();
        assert_eq!(counter.mini_messages, 30);
        assert_eq!(counter.premium_messages, 10);
        assert_eq!(counter.tokens, 280);
    }

    #[tokio::test]
    async fn test_limits_follow_plan_and_month() {
        let (meter, clock, _dir) = meter().await;
        let scope = UsageScope::new("u1", "p1");
        meter
            .record_usage(
                &scope,
                &UsageRecord {
                    kind: UsageKind::IndexedPage,
                    amount: 50,
                    tokens: 0,
                },
            )
            .await
            .unwrap();

        let d = meter
            .check_limits(&scope, PlanType::Free, UsageKind::IndexedPage)
            .await
            .unwrap();
        assert!(!d.allowed);
        assert!(meter
            .check_limits(&scope, PlanType::Pro, UsageKind::IndexedPage)
            .await
            .unwrap()
            .allowed);

        clock.set(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
        assert!(meter
            .check_limits(&scope, PlanType::Free, UsageKind::IndexedPage)
            .await
            .unwrap()
            .allowed);
        assert_eq!(
            meter
                .usage(&UsageScope::new("u1", "p2"), "2026-03")
                .await
                .unwrap(),
            UsageCounter::empty("2026-03")
        );
    }
}
