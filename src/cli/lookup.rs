use anyhow::{bail, Context, Result};
use clap::Args;

use super::context::CliContext;
use super::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct NearestArgs {
    /// Latitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,
}

pub async fn cmd_nearest(args: NearestArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    check_coordinate(args.lat, args.lon)?;
    let nearest = ctx
        .graph_api()?
        .find_nearest(args.lat, args.lon)
        .await
        .context("querying nearest node")?;
    output.emit(&nearest, || {
        println!(
            "Nearest node {} at {:.6}, {:.6}",
            nearest.node_id, nearest.lat, nearest.lon
        )
    })
}

pub async fn cmd_meta(ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let meta = ctx
        .graph_api()?
        .graph_meta()
        .await
        .context("querying graph metadata")?;
    output.emit(&meta, || {
        println!("Graph: {}", meta.place);
        println!("- Radius: {} m", meta.radius_m);
        println!("- Nodes: {}", meta.nodes_total);
        println!("- Edges: {}", meta.edges_total);
        println!(
            "- Bounds: ({:.5}, {:.5}) .. ({:.5}, {:.5})",
            meta.bbox[0], meta.bbox[1], meta.bbox[2], meta.bbox[3]
        );
        println!("- Cache version: {}", meta.graph_cache_version);
    })
}

/// Parse `"lat,lon"`.
pub fn parse_coordinate(raw: &str) -> Result<(f64, f64)> {
    let Some((lat, lon)) = raw.split_once(',') else {
        bail!("expected \"lat,lon\", got \"{raw}\"");
    };
    let lat: f64 = lat
        .trim()
        .parse()
        .with_context(|| format!("invalid latitude in \"{raw}\""))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .with_context(|| format!("invalid longitude in \"{raw}\""))?;
    check_coordinate(lat, lon)?;
    Ok((lat, lon))
}

fn check_coordinate(lat: f64, lon: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        bail!("coordinate {lat},{lon} is out of range");
    }
    Ok(())
}
