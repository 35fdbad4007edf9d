use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;
use trace_link::metrics as link_metrics;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        link_metrics::register_metrics(global_registry());
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Prometheus text exposition of every registered metric.
pub fn render_text() -> Result<String> {
    register_metrics();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&global_registry().gather(), &mut buffer)
        .context("encoding prometheus metrics")?;
    String::from_utf8(buffer).context("prometheus output is not utf-8")
}

pub fn write_text(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, render_text()?)
        .with_context(|| format!("writing metrics to {}", path.display()))?;
    info!(path = %path.display(), "metrics written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_lists_link_counters() {
        link_metrics::record_request_sent("dijkstra");
        let text = render_text().unwrap();
        assert!(text.contains("# TYPE routewatch_link_connect_attempts_total counter"));
        assert!(text.contains("routewatch_link_requests_sent_total{algorithm=\"dijkstra\"}"));

        register_metrics();
        let again = render_text().unwrap();
        assert_eq!(again.matches("# TYPE routewatch_link_connect_attempts_total").count(), 1);
    }

    #[test]
    fn write_text_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("link.prom");
        write_text(&path).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("routewatch_link_unclean_drops_total"));
    }
}
