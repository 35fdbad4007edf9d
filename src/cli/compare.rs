use anyhow::{bail, Result};
use clap::Args;
use routewatch_core_types::{Algorithm, ComparisonResult, RunRequest};
use routewatch_trace_state::RunOutcome;
use serde::Serialize;

use super::context::CliContext;
use super::output::OutputFormat;
use super::run::{
    execute_run, export_metrics, export_stats, seed_cache, EndpointArgs, RunReport, StreamArgs,
};

/// Distances closer than this are reported as equal.
const DISTANCE_TOLERANCE_KM: f64 = 0.001;

#[derive(Args, Clone, Debug)]
pub struct CompareArgs {
    #[command(flatten)]
    pub endpoints: EndpointArgs,

    #[command(flatten)]
    pub stream: StreamArgs,
}

#[derive(Debug, Serialize)]
struct CompareReport {
    runs: Vec<RunReport>,
    comparison: Option<ComparisonResult>,
}

pub async fn cmd_compare(args: CompareArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let params = args.stream.params(ctx)?;
    let (origin, destination) = args.endpoints.resolve(ctx).await?;
    let requests = Algorithm::ALL
        .iter()
        .map(|algorithm| RunRequest::new(*algorithm, origin, destination, params))
        .collect::<Result<Vec<_>, _>>()?;

    let session = ctx.session()?;
    let timeout = args.stream.timeout(ctx);
    let result: Result<Vec<RunReport>> = async {
        seed_cache(ctx, &session, args.stream.seed(ctx)).await?;
        let mut runs = Vec::with_capacity(requests.len());
        for request in requests {
            runs.push(execute_run(&session, request, timeout, output).await?);
        }
        Ok(runs)
    }
    .await;
    let comparison = session.stats().compare(origin, destination);
    let exported = export_stats(&session, args.stream.export_path(ctx))
        .and_then(|_| export_metrics(args.stream.metrics.as_deref()));
    session.shutdown().await;

    let runs = result?;
    exported?;
    let failed: Vec<String> = runs
        .iter()
        .filter_map(|report| match &report.outcome {
            RunOutcome::Failed { message } => {
                Some(format!("{}: {message}", report.request.algorithm()))
            }
            _ => None,
        })
        .collect();

    let report = CompareReport { runs, comparison };
    output.emit(&report, || print_human(&report))?;
    if !failed.is_empty() {
        bail!("comparison incomplete: {}", failed.join("; "));
    }
    Ok(())
}

fn print_human(report: &CompareReport) {
    for run in &report.runs {
        run.print_human(false);
        println!();
    }
    let Some(comparison) = &report.comparison else {
        println!("No comparison: both algorithms must complete on the same endpoints.");
        return;
    };
    println!(
        "Comparison {} -> {}",
        comparison.origin, comparison.destination
    );
    println!("{:<18}{:>12}{:>12}", "", "Dijkstra", "A*");
    println!(
        "{:<18}{:>12}{:>12}",
        "explored nodes", comparison.dijkstra.explored_count, comparison.astar.explored_count
    );
    println!(
        "{:<18}{:>12.4}{:>12.4}",
        "time (s)", comparison.dijkstra.elapsed_seconds, comparison.astar.elapsed_seconds
    );
    println!(
        "{:<18}{:>12.3}{:>12.3}",
        "distance (km)", comparison.dijkstra.distance_km, comparison.astar.distance_km
    );
    if let Some(ratio) = comparison.exploration_ratio() {
        println!("A* explored {ratio:.2}x fewer nodes than Dijkstra");
    }
    if !comparison.same_distance(DISTANCE_TOLERANCE_KM) {
        println!("warning: path distances differ");
    }
}
