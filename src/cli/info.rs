use std::path::PathBuf;

use anyhow::Result;
use humantime::format_duration;
use serde::Serialize;
use trace_link::metrics::{self, LinkMetricsSnapshot};

use super::context::CliContext;
use super::output::OutputFormat;

#[derive(Debug, Serialize)]
struct BuildInfo {
    version: &'static str,
    build_date: &'static str,
    git_hash: &'static str,
    git_branch: &'static str,
}

#[derive(Debug, Serialize)]
struct LinkInfo {
    api_url: String,
    stream_url: Option<String>,
    retry_base_ms: u64,
    retry_max_ms: u64,
    clean_reconnect_ms: Option<u64>,
    send_timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct InfoReport {
    build: BuildInfo,
    config_path: PathBuf,
    config_present: bool,
    link: LinkInfo,
    metrics: LinkMetricsSnapshot,
}

pub fn cmd_metrics() -> Result<()> {
    print!("{}", crate::metrics::render_text()?);
    Ok(())
}

pub async fn cmd_info(ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let link = &ctx.config().link;
    let policy = link.retry_policy();
    let report = InfoReport {
        build: BuildInfo {
            version: env!("CARGO_PKG_VERSION"),
            build_date: env!("BUILD_DATE"),
            git_hash: env!("GIT_HASH"),
            git_branch: env!("GIT_BRANCH"),
        },
        config_path: ctx.config_path().to_path_buf(),
        config_present: ctx.config_path().exists(),
        link: LinkInfo {
            api_url: link.api_url.clone(),
            stream_url: link.stream_url().ok().map(|url| url.to_string()),
            retry_base_ms: policy.base.as_millis() as u64,
            retry_max_ms: policy.max.as_millis() as u64,
            clean_reconnect_ms: policy
                .reconnect_after_clean
                .then(|| policy.clean_delay.as_millis() as u64),
            send_timeout_ms: link.send_timeout().as_millis() as u64,
        },
        metrics: metrics::snapshot(),
    };

    output.emit(&report, || {
        println!("routewatch {}", report.build.version);
        println!("Build Date: {}", report.build.build_date);
        println!(
            "Git Commit: {} ({})",
            report.build.git_hash, report.build.git_branch
        );
        println!();

        let marker = if report.config_present { "" } else { " (not found, using defaults)" };
        println!("Configuration: {}{marker}", report.config_path.display());
        println!("- API: {}", report.link.api_url);
        match &report.link.stream_url {
            Some(url) => println!("- Stream: {url}"),
            None => println!("- Stream: invalid api_url"),
        }
        println!(
            "- Retry: {} steps, capped at {}",
            format_duration(policy.base),
            format_duration(policy.max)
        );
        match report.link.clean_reconnect_ms {
            Some(_) => println!(
                "- Reconnect after clean close: {}",
                format_duration(policy.clean_delay)
            ),
            None => println!("- Reconnect after clean close: off"),
        }
        println!("- Send timeout: {}", format_duration(link.send_timeout()));
        println!();

        let m = &report.metrics;
        println!("Link counters (this process):");
        println!("- Connect attempts: {} ({} failed)", m.connect_attempts, m.connect_failures);
        println!("- Requests sent: {}", m.requests_sent);
        println!("- Frames: {} ({} malformed)", m.frames_received, m.malformed_frames);
    })
}
