use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use humantime::format_duration;
use routewatch_core_types::{Algorithm, EdgeId, NodeId, RunId, RunParams, RunRequest};
use routewatch_trace_state::RunOutcome;
use serde::Serialize;
use tracing::{info, warn};
use trace_link::TraceSession;

use super::context::CliContext;
use super::lookup::parse_coordinate;
use super::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct EndpointArgs {
    /// Origin node id
    #[arg(long, visible_alias = "orig", required_unless_present = "from")]
    pub origin: Option<u64>,

    /// Destination node id
    #[arg(long, visible_alias = "dest", required_unless_present = "to")]
    pub destination: Option<u64>,

    /// Origin as "lat,lon"; resolved to the nearest graph node
    #[arg(long, conflicts_with = "origin", allow_hyphen_values = true)]
    pub from: Option<String>,

    /// Destination as "lat,lon"; resolved to the nearest graph node
    #[arg(long, conflicts_with = "destination", allow_hyphen_values = true)]
    pub to: Option<String>,
}

impl EndpointArgs {
    pub async fn resolve(&self, ctx: &CliContext) -> Result<(NodeId, NodeId)> {
        let origin = resolve_endpoint(ctx, "origin", self.origin, self.from.as_deref()).await?;
        let destination =
            resolve_endpoint(ctx, "destination", self.destination, self.to.as_deref()).await?;
        Ok((origin, destination))
    }
}

async fn resolve_endpoint(
    ctx: &CliContext,
    label: &str,
    node: Option<u64>,
    coordinate: Option<&str>,
) -> Result<NodeId> {
    match (node, coordinate) {
        (Some(id), _) => Ok(NodeId(id)),
        (None, Some(raw)) => {
            let (lat, lon) = parse_coordinate(raw)?;
            let nearest = ctx
                .graph_api()?
                .find_nearest(lat, lon)
                .await
                .with_context(|| format!("resolving {label} {raw}"))?;
            info!(%label, node = %nearest.node_id, lat, lon, "resolved endpoint");
            Ok(nearest.node_id)
        }
        (None, None) => bail!("{label} is required"),
    }
}

#[derive(Args, Clone, Debug)]
pub struct StreamArgs {
    /// Server-side decimation of visited events (>= 1)
    #[arg(long)]
    pub decimate: Option<u32>,

    /// Server-side playback speed multiplier (> 0)
    #[arg(long)]
    pub speed: Option<f64>,

    /// Give up on a run after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Merge every Nth edge of the graph into the geometry cache first
    #[arg(long, value_name = "DECIMATE")]
    pub seed: Option<u32>,

    /// Write the session's run stats to this JSON file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Write link counters in Prometheus text format to this file
    #[arg(long, value_name = "FILE")]
    pub metrics: Option<PathBuf>,
}

impl StreamArgs {
    pub fn params(&self, ctx: &CliContext) -> Result<RunParams> {
        let defaults = &ctx.config().run;
        RunParams::new(
            self.decimate.unwrap_or(defaults.decimate),
            self.speed.unwrap_or(defaults.speed),
        )
        .context("invalid stream parameters")
    }

    pub fn timeout(&self, ctx: &CliContext) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(ctx.config().run.timeout_secs))
    }

    pub fn seed(&self, ctx: &CliContext) -> Option<u32> {
        self.seed.or(ctx.config().run.seed_decimate)
    }

    pub fn export_path(&self, ctx: &CliContext) -> Option<PathBuf> {
        self.export.clone().or_else(|| ctx.config().stats_export.clone())
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Search algorithm (dijkstra or astar)
    #[arg(short, long, visible_alias = "alg")]
    pub algorithm: Option<Algorithm>,

    #[command(flatten)]
    pub endpoints: EndpointArgs,

    #[command(flatten)]
    pub stream: StreamArgs,

    /// List the edges of the final path
    #[arg(long)]
    pub show_path: bool,
}

/// What one streamed run produced.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run: RunId,
    pub request: RunRequest,
    pub outcome: RunOutcome,
    pub last_status: Option<String>,
    pub visited_edges: usize,
    pub path: Vec<EdgeId>,
    pub wall_time_ms: u64,
}

impl RunReport {
    pub fn print_human(&self, show_path: bool) {
        println!(
            "Run {} {} {} -> {}",
            self.run,
            self.request.algorithm(),
            self.request.origin(),
            self.request.destination()
        );
        match &self.outcome {
            RunOutcome::Completed { summary } => {
                println!("  status:        completed");
                println!(
                    "  explored:      {} nodes in {:.3} s",
                    summary.explored_count, summary.elapsed_seconds
                );
                println!("  distance:      {:.2} km", summary.distance_km);
            }
            RunOutcome::Failed { message } => println!("  status:        failed ({message})"),
            RunOutcome::Running => println!("  status:        running"),
        }
        if let Some(status) = &self.last_status {
            println!("  last status:   {status}");
        }
        println!(
            "  edges:         {} visited, {} on path",
            self.visited_edges,
            self.path.len()
        );
        println!(
            "  wall time:     {}",
            format_duration(Duration::from_millis(self.wall_time_ms))
        );
        if show_path {
            for (position, edge) in self.path.iter().enumerate() {
                println!("    {position:>4}  {edge}");
            }
        }
    }
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let params = args.stream.params(ctx)?;
    let algorithm = args.algorithm.unwrap_or(ctx.config().run.algorithm);
    let (origin, destination) = args.endpoints.resolve(ctx).await?;
    let request = RunRequest::new(algorithm, origin, destination, params)?;

    let session = ctx.session()?;
    let result: Result<RunReport> = async {
        seed_cache(ctx, &session, args.stream.seed(ctx)).await?;
        execute_run(&session, request, args.stream.timeout(ctx), output).await
    }
    .await;
    let exported = export_stats(&session, args.stream.export_path(ctx))
        .and_then(|_| export_metrics(args.stream.metrics.as_deref()));
    session.shutdown().await;

    let report = result?;
    exported?;
    output.emit(&report, || report.print_human(args.show_path))?;
    if let RunOutcome::Failed { message } = &report.outcome {
        bail!("run failed: {message}");
    }
    Ok(())
}

/// Start `request` and wait for its outcome, printing progress to stderr in
/// human mode.
pub async fn execute_run(
    session: &TraceSession,
    request: RunRequest,
    timeout: Duration,
    output: OutputFormat,
) -> Result<RunReport> {
    let started = Instant::now();
    let run = session
        .start(request.clone())
        .await
        .context("sending run request")?;

    let wait = session.wait_for_outcome(run, timeout);
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    ticker.tick().await;
    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome.context("waiting for run outcome")?,
            _ = ticker.tick() => {
                if output == OutputFormat::Human {
                    let trace = session.trace();
                    eprintln!(
                        "  ... {} edges visited, {} nodes explored",
                        trace.visited.len(),
                        trace.explored_count
                    );
                }
            }
        }
    };

    let trace = session.trace();
    Ok(RunReport {
        run,
        request,
        outcome,
        last_status: trace.last_status,
        visited_edges: trace.visited.len(),
        path: trace.path,
        wall_time_ms: started.elapsed().as_millis() as u64,
    })
}

pub async fn seed_cache(ctx: &CliContext, session: &TraceSession, decimate: Option<u32>) -> Result<()> {
    let Some(decimate) = decimate else {
        return Ok(());
    };
    let api = ctx.graph_api()?;
    match session.seed_cache(&api, decimate).await {
        Ok(added) => info!(added, decimate, "geometry cache seeded"),
        Err(err) => warn!(%err, "edge sample unavailable; geometry will come from the stream"),
    }
    Ok(())
}

pub fn export_metrics(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => crate::metrics::write_text(path),
        None => Ok(()),
    }
}

pub fn export_stats(session: &TraceSession, path: Option<PathBuf>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    session
        .stats()
        .export_json(&path)
        .with_context(|| format!("exporting stats to {}", path.display()))?;
    info!(path = %path.display(), "stats exported");
    Ok(())
}
