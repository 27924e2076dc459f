//! `ragline usage`: monthly counters against the configured plan.

use anyhow::Result;

use ragline_core::metering::{month_key, PlanLimits, UsageKind, UsageScope};

use crate::app::Stores;
use crate::config::Config;

fn format_limit(limit: Option<u64>) -> String {
    match limit {
        Some(n) => n.to_string(),
        None => "unlimited".to_string(),
    }
}

pub async fn run_usage(
    config: &Config,
    user: Option<String>,
    project: &str,
    month: Option<String>,
) -> Result<()> {
    let user = user.unwrap_or_else(|| config.usage.user_id.clone());
    let month = month.unwrap_or_else(|| month_key(chrono::Utc::now()));
    let scope = UsageScope::new(user, project);

    let app = Stores::open(config).await?;
    let counter = app.meter.usage(&scope, &month).await;
    app.close().await;
    let counter = counter?;

    let plan = config.usage.plan;
    let limits = PlanLimits::for_plan(plan);

    println!("Usage for {} / {} in {} ({:?} plan)", scope.user_id, scope.project_id, month, plan);
    println!();
    for kind in [
        UsageKind::MiniMessage,
        UsageKind::PremiumMessage,
        UsageKind::IndexedPage,
    ] {
        println!(
            "  {:<16} {:>8} / {}",
            kind.as_str(),
            counter.used(kind),
            format_limit(limits.limit_for(kind))
        );
    }
    println!("  {:<16} {:>8}", "tokens", counter.tokens);
    Ok(())
}
