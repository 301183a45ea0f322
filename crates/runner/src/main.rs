use std::process::ExitCode;

use anyhow::Context;

use crjr_audit_db::RelationalDataSource;
use crjr_audit_http::HttpDataSource;
use crjr_audit_runner::config::AuditConfig;
use crjr_audit_runner::{init_tracing, load_rules, render_report, run_audit};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let config = AuditConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    let rules = load_rules(config.rules_file.as_deref())?;
    tracing::info!(
        rules = rules.len(),
        source = config
            .rules_file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in catalog".to_string()),
        "Rule set loaded"
    );

    let pool = crjr_audit_db::create_pool(&config.db).context("invalid database settings")?;
    tracing::info!(target_db = %config.db.display_target(), "Database pool created");
    let http = HttpDataSource::new(&config.http)?;
    tracing::info!(base_url = http.base_url(), "HTTP client created");

    let relational = RelationalDataSource::new(pool.clone());
    let report = run_audit(&config, &rules, &relational, &http).await;
    pool.close().await;

    let rendered = render_report(&report, config.report_format)?;
    println!("{rendered}");

    Ok(ExitCode::from(report.exit_code()))
}
