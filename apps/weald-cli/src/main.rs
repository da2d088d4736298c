mod scene;

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use weald_common::SimConfig;
use weald_kernel::{ObjectStore, Operation, Verb};
use weald_persist::FileStore;

/// A small roaming-creature world used when no scene file is given.
const DEMO_SCENE: &str = r#"
config:
  move_tick: 1.0
entities:
  - name: meadow
    box_size: 200
  - name: wanderer
    kind: creature
    parent: meadow
    position: [0, 0, 0]
    velocity: [1, 0, 0]
    box_size: 1
  - name: standing-stone
    parent: meadow
    position: [12, 0, 0]
    box_size: 2
  - name: watcher
    kind: creature
    parent: meadow
    position: [30, 0, 0]
    box_size: 1
"#;

#[derive(Parser)]
#[command(name = "weald-cli", about = "CLI for the weald world server")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and default simulation constants
    Info,
    /// Run a scene for a span of world time and report the operation
    /// traffic
    Run {
        /// Scene file (YAML); a built-in demo scene is used when absent
        #[arg(short, long)]
        scene: Option<PathBuf>,
        /// World seconds to simulate
        #[arg(long, default_value = "10")]
        seconds: f64,
    },
    /// Build a scene and persist every entity's attributes into a file
    /// store
    Seed {
        /// Scene file (YAML)
        #[arg(short, long)]
        scene: Option<PathBuf>,
        /// Store directory
        #[arg(long)]
        store: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("weald-cli v{}", env!("CARGO_PKG_VERSION"));
            let cfg = SimConfig::default();
            println!("square_sight_factor: {}", cfg.square_sight_factor);
            println!("move_tick:           {}s", cfg.move_tick);
            println!("epsilon:             {}", cfg.epsilon);
            println!("collision_horizon:   {}s", cfg.collision_horizon);
        }
        Commands::Run { scene, seconds } => {
            let doc = load_scene(scene.as_deref())?;
            let (mut router, names) = scene::build(&doc)?;
            println!(
                "Running {} entities for {seconds}s of world time",
                names.len()
            );

            router.run_until(seconds);
            let outbound = router.take_outbound();
            print_traffic(&outbound);

            let by_id: BTreeMap<_, _> = names.iter().map(|(name, id)| (*id, name)).collect();
            for (id, entity) in router.world().entities() {
                if let Some(name) = by_id.get(id) {
                    let p = entity.position;
                    println!(
                        "{name}: position=({:.2}, {:.2}, {:.2}) stamp={}",
                        p.x, p.y, p.z, entity.stamp
                    );
                }
            }
        }
        Commands::Seed { scene, store } => {
            let doc = load_scene(scene.as_deref())?;
            let (router, names) = scene::build(&doc)?;
            let mut file_store = FileStore::open(&store)?;
            for (name, id) in &names {
                let entity = router
                    .world()
                    .get(*id)
                    .expect("scene entities are resident");
                file_store.save(*id, &entity.attrs)?;
                println!("{name}: {id}");
            }
            println!(
                "Seeded {} objects into {}",
                file_store.object_count(),
                store.display()
            );
        }
    }

    Ok(())
}

fn load_scene(path: Option<&std::path::Path>) -> anyhow::Result<scene::SceneDoc> {
    match path {
        Some(path) => scene::parse(&std::fs::read_to_string(path)?),
        None => scene::parse(DEMO_SCENE),
    }
}

fn print_traffic(outbound: &[Operation]) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for op in outbound {
        let label = match op.verb {
            Verb::Sight => {
                let inner = op.args.first().and_then(|p| p.as_op());
                match inner {
                    Some(inner) => format!("Sight({:?})", inner.verb),
                    None => "Sight".to_owned(),
                }
            }
            verb => format!("{verb:?}"),
        };
        *counts.entry(label).or_default() += 1;
    }
    println!("Outbound operations: {}", outbound.len());
    for (label, count) in counts {
        println!("  {label}: {count}");
    }
}
