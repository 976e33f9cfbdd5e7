//! Expands a cached crowd and prints the resulting hierarchy.
//!
//! Usage: cargo run -p crowd-info -- <crowd.acrd> <variations.avar> [--time 12] [--sets]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use atoms_crowd_scene::cloth::ClothReader;
use atoms_crowd_scene::common::Aabb;
use atoms_crowd_scene::instance::InstanceCache;
use atoms_crowd_scene::{
    CrowdReader, CrowdScene, ExpandOptions, FileClothSource, FileSimulationSource,
    FileVariationSource, LibraryOptions, ReaderOptions, SceneHierarchy, ScenePath,
    TemplateLibrary,
};
use cgmath::Point3;
use clap::Parser;

#[derive(Parser)]
#[command(name = "crowd-info")]
#[command(about = "Expand a cached crowd into its agent hierarchy and print it")]
#[command(version)]
struct Cli {
    /// Simulation cache (.acrd)
    crowd: PathBuf,

    /// Agent variations (.avar)
    variations: PathBuf,

    /// Cloth cache (.aclt)
    #[arg(long)]
    cloth: Option<PathBuf>,

    /// Evaluation time in frames
    #[arg(short, long, default_value_t = 1.0)]
    time: f64,

    /// Added to the evaluation time before picking a cached frame
    #[arg(long, default_value_t = 0.0)]
    time_offset: f64,

    /// Agent id selection, e.g. "1-10,!5"
    #[arg(short, long)]
    agent_ids: Option<String>,

    /// Keep the agents the selection does not pick
    #[arg(long)]
    invert: bool,

    /// Location of the crowd points
    #[arg(long, default_value = "/crowd")]
    parent: String,

    /// Location the agents are placed under (defaults to the parent)
    #[arg(long)]
    destination: Option<String>,

    /// Deform every agent separately
    #[arg(long)]
    no_instances: bool,

    /// Grow every agent bound by this amount
    #[arg(long, default_value_t = 0.0)]
    padding: f32,

    /// Maximum depth of the printed hierarchy
    #[arg(short, long, default_value_t = 4)]
    depth: usize,

    /// Print set membership
    #[arg(long)]
    sets: bool,

    /// Worker threads used to deform agents (defaults to all cores)
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure the worker pool")?;
    }

    let mut reader_options = ReaderOptions::default().with_time_offset(cli.time_offset);
    if let Some(agent_ids) = &cli.agent_ids {
        reader_options = reader_options.with_agent_ids(agent_ids.as_str());
    }
    reader_options.invert = cli.invert;

    let reader = CrowdReader::new(
        Arc::new(FileSimulationSource::new(&cli.crowd)),
        reader_options.clone(),
    );
    let crowd = reader
        .read(cli.time)
        .with_context(|| format!("Failed to read {}", cli.crowd.display()))?;
    log::info!("Read {} agents at time {}", crowd.len(), cli.time);

    let library = Arc::new(TemplateLibrary::new(
        Arc::new(FileVariationSource::new(&cli.variations)),
        LibraryOptions::default(),
    ));

    let parent = ScenePath::parse(&cli.parent);
    let options = ExpandOptions::default()
        .with_instances(!cli.no_instances)
        .with_padding(cli.padding);
    let mut scene = CrowdScene::new(
        Arc::new(crowd),
        Arc::clone(&library),
        parent.clone(),
        Arc::new(InstanceCache::new()),
    )
    .with_options(options);
    if let Some(destination) = &cli.destination {
        scene = scene.with_destination(ScenePath::parse(destination));
    }
    if let Some(cloth) = &cli.cloth {
        let cache = ClothReader::new(Arc::new(FileClothSource::new(cloth)), reader_options)
            .read(cli.time);
        log::info!("Read cloth for {} agents", cache.len());
        scene = scene.with_cloth(Arc::new(cache));
    }

    let start = Instant::now();
    let instances = scene.resolve_all();
    let elapsed = start.elapsed();

    println!("Crowd: {}", cli.crowd.display());
    println!("Agents placed: {}", scene.agent_count());
    println!("Parts: {}", scene.leaf_paths()?.len());
    println!(
        "Instances: {} (resolved in {:.1} ms)",
        instances,
        elapsed.as_secs_f64() * 1000.0
    );
    let stats = scene.instances().stats();
    println!("  Cache hits: {}, misses: {}", stats.hits, stats.misses);
    let templates = library.stats();
    println!("Templates: {} loaded", templates.entries);
    println!();

    println!("Hierarchy:");
    print_location(&scene, &ScenePath::root(), 0, cli.depth)?;

    if cli.sets {
        println!();
        println!("Sets:");
        for name in scene.set_names() {
            let members = scene.set(&name);
            println!("  {:<32} {:>8} leaves", name, members.len());
        }
    }

    Ok(())
}

fn print_location(
    scene: &CrowdScene,
    path: &ScenePath,
    depth: usize,
    max_depth: usize,
) -> Result<()> {
    let children = scene.child_names(path)?;
    let name = path.name().unwrap_or("/");
    let bound = scene.bound(path)?;
    println!("{}{:<24} {}", "  ".repeat(depth + 1), name, format_bound(&bound));

    if depth + 1 >= max_depth {
        if !children.is_empty() {
            println!("{}... {} children", "  ".repeat(depth + 2), children.len());
        }
        return Ok(());
    }
    for child in children {
        print_location(scene, &path.child(child), depth + 1, max_depth)?;
    }
    Ok(())
}

fn format_bound(bound: &Aabb) -> String {
    if bound.is_empty() {
        return "(empty)".to_string();
    }
    format!("{} .. {}", format_point(bound.min), format_point(bound.max))
}

fn format_point(p: Point3<f32>) -> String {
    format!("({:.2}, {:.2}, {:.2})", p.x, p.y, p.z)
}
