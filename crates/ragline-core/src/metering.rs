//! Usage metering contract consumed by the orchestrators.
//!
//! The pipeline asks [`UsageMeter::check_limits`] before doing billable
//! work and calls [`UsageMeter::record_usage`] only after the work
//! succeeded. Counters are kept per user, project and calendar month
//! (`YYYY-MM`), and increments must be atomic so concurrent records are
//! never lost.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};

/// Who is being metered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageScope {
    pub user_id: String,
    pub project_id: String,
}

impl UsageScope {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
        }
    }
}

/// Subscription plan of the project owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Free,
    Pro,
    Business,
}

impl FromStr for PlanType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(PlanType::Free),
            "pro" => Ok(PlanType::Pro),
            "business" => Ok(PlanType::Business),
            other => anyhow::bail!("unknown plan type: {}", other),
        }
    }
}

/// Which class of chat model a turn uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    Mini,
    Premium,
}

impl ModelTier {
    pub fn usage_kind(self) -> UsageKind {
        match self {
            ModelTier::Mini => UsageKind::MiniMessage,
            ModelTier::Premium => UsageKind::PremiumMessage,
        }
    }
}

impl FromStr for ModelTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mini" => Ok(ModelTier::Mini),
            "premium" => Ok(ModelTier::Premium),
            other => anyhow::bail!("unknown model tier: {}", other),
        }
    }
}

/// A billable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageKind {
    MiniMessage,
    PremiumMessage,
    IndexedPage,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::MiniMessage => "mini_message",
            UsageKind::PremiumMessage => "premium_message",
            UsageKind::IndexedPage => "indexed_page",
        }
    }
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monthly allowances. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub mini_messages: Option<u64>,
    pub premium_messages: Option<u64>,
    pub indexed_pages: Option<u64>,
}

impl PlanLimits {
    pub fn for_plan(plan: PlanType) -> Self {
        match plan {
            PlanType::Free => Self {
                mini_messages: Some(100),
                premium_messages: Some(0),
                indexed_pages: Some(50),
            },
            PlanType::Pro => Self {
                mini_messages: Some(2_000),
                premium_messages: Some(500),
                indexed_pages: Some(1_000),
            },
            PlanType::Business => Self {
                mini_messages: None,
                premium_messages: Some(5_000),
                indexed_pages: Some(10_000),
            },
        }
    }

    pub fn limit_for(&self, kind: UsageKind) -> Option<u64> {
        match kind {
            UsageKind::MiniMessage => self.mini_messages,
            UsageKind::PremiumMessage => self.premium_messages,
            UsageKind::IndexedPage => self.indexed_pages,
        }
    }
}

/// Counters for one (user, project, month).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageCounter {
    pub month: String,
    pub mini_messages: u64,
    pub premium_messages: u64,
    pub indexed_pages: u64,
    pub tokens: u64,
}

impl UsageCounter {
    pub fn empty(month: &str) -> Self {
        Self {
            month: month.to_string(),
            ..Default::default()
        }
    }

    pub fn used(&self, kind: UsageKind) -> u64 {
        match kind {
            UsageKind::MiniMessage => self.mini_messages,
            UsageKind::PremiumMessage => self.premium_messages,
            UsageKind::IndexedPage => self.indexed_pages,
        }
    }

    pub fn apply(&mut self, record: &UsageRecord) {
        match record.kind {
            UsageKind::MiniMessage => self.mini_messages += record.amount,
            UsageKind::PremiumMessage => self.premium_messages += record.amount,
            UsageKind::IndexedPage => self.indexed_pages += record.amount,
        }
        self.tokens += record.tokens;
    }
}

/// Result of a limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl UsageDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// One usage increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub kind: UsageKind,
    pub amount: u64,
    pub tokens: u64,
}

/// `YYYY-MM` bucket for `at`.
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Compare a counter against the plan's allowance for `kind`.
pub fn evaluate_limits(plan: PlanType, counter: &UsageCounter, kind: UsageKind) -> UsageDecision {
    match PlanLimits::for_plan(plan).limit_for(kind) {
        None => UsageDecision::allow(),
        Some(limit) if counter.used(kind) < limit => UsageDecision::allow(),
        Some(limit) => UsageDecision::deny(format!(
            "{} limit of {} reached for {} on the {:?} plan",
            kind, limit, counter.month, plan
        )),
    }
}

/// Usage metering collaborator.
#[async_trait]
pub trait UsageMeter: Send + Sync {
    async fn check_limits(
        &self,
        scope: &UsageScope,
        plan: PlanType,
        kind: UsageKind,
    ) -> Result<UsageDecision>;

    /// Atomically add `record` to the current month's counters.
    async fn record_usage(&self, scope: &UsageScope, record: &UsageRecord) -> Result<()>;

    /// Counters for `month` (`YYYY-MM`); zeroes when nothing was recorded.
    async fn usage(&self, scope: &UsageScope, month: &str) -> Result<UsageCounter>;
}

/// Mutex-guarded in-memory meter.
pub struct InMemoryUsageMeter {
    clock: Arc<dyn Clock>,
    counters: Mutex<HashMap<(UsageScope, String), UsageCounter>>,
}

impl InMemoryUsageMeter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryUsageMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageMeter for InMemoryUsageMeter {
    async fn check_limits(
        &self,
        scope: &UsageScope,
        plan: PlanType,
        kind: UsageKind,
    ) -> Result<UsageDecision> {
        let month = month_key(self.clock.now());
        let counters = self.counters.lock().unwrap();
        let counter = counters
            .get(&(scope.clone(), month.clone()))
            .cloned()
            .unwrap_or_else(|| UsageCounter::empty(&month));
        Ok(evaluate_limits(plan, &counter, kind))
    }

    async fn record_usage(&self, scope: &UsageScope, record: &UsageRecord) -> Result<()> {
        let month = month_key(self.clock.now());
        let mut counters = self.counters.lock().unwrap();
        counters
            .entry((scope.clone(), month.clone()))
            .or_insert_with(|| UsageCounter::empty(&month))
            .apply(record);
        Ok(())
    }

    async fn usage(&self, scope: &UsageScope, month: &str) -> Result<UsageCounter> {
        let counters = self.counters.lock().unwrap();
        Ok(counters
            .get(&(scope.clone(), month.to_string()))
            .cloned()
            .unwrap_or_else(|| UsageCounter::empty(month)))
    }
}
