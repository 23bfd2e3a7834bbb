use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::Vec3;
use mapstream_assets::{AtlasBuildJob, AtlasLayout, DirectoryImageSource};
use mapstream_common::{GlobalPortionCoord, MapId};
use mapstream_kernel::{Engine, EngineConfig, MapSession};
use mapstream_persist::{DirectorySource, MapProject, RecordStore, read_portion};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mapstream-cli", about = "CLI tool for map projects")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Engine config (YAML). Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print map metadata and portion bounds
    Info {
        project: PathBuf,
        #[arg(short, long, default_value = "1")]
        map: u32,
    },
    /// Decode one portion file
    Inspect {
        project: PathBuf,
        #[arg(short, long, default_value = "1")]
        map: u32,
        /// Portion coordinate as x,y,z
        #[arg(short, long, value_parser = parse_coord)]
        portion: GlobalPortionCoord,
    },
    /// Walk the reference point in a straight line and report streaming
    Walk {
        project: PathBuf,
        #[arg(short, long, default_value = "1")]
        map: u32,
        /// Start position in squares, as x,y,z
        #[arg(long, value_parser = parse_vec3)]
        from: Vec3,
        /// End position in squares, as x,y,z
        #[arg(long, value_parser = parse_vec3)]
        to: Vec3,
        /// Number of ticks the walk takes
        #[arg(short, long, default_value = "32")]
        steps: u32,
        /// Save object records to this directory when the walk ends
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Bake the autotile atlases of a map's tileset to PNG files
    Bake {
        project: PathBuf,
        #[arg(short, long, default_value = "1")]
        map: u32,
        #[arg(short, long, default_value = "atlases")]
        out: PathBuf,
    },
}

fn parse_triple<T: std::str::FromStr>(s: &str) -> Result<[T; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("expected x,y,z, got {s:?}"));
    };
    let parse = |v: &str| v.parse::<T>().map_err(|_| format!("invalid number {v:?}"));
    Ok([parse(*x)?, parse(*y)?, parse(*z)?])
}

fn parse_coord(s: &str) -> Result<GlobalPortionCoord, String> {
    let [x, y, z] = parse_triple::<i32>(s)?;
    Ok(GlobalPortionCoord::new(x, y, z))
}

fn parse_vec3(s: &str) -> Result<Vec3, String> {
    parse_triple::<f32>(s).map(Vec3::from_array)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { project, map } => {
            let project = MapProject::new(project);
            let map = MapId(map);
            let info = project.load_map_info(map)?;
            let bounds = info.bounds(config.portion_size);
            let roster = project.load_roster(map)?;
            let (nx, ny, nz) = bounds.counts();

            println!("mapstream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("{} ({})", info.name, map.dir_name());
            println!(
                "extents: length={} width={} height={} depth={}",
                info.length, info.width, info.height, info.depth
            );
            println!(
                "portions: {nx} x {ny} x {nz} = {} (size {})",
                bounds.portion_count(),
                config.portion_size
            );
            println!(
                "window: limit={} ({} slots)",
                config.limit(),
                mapstream_stream::window_capacity(config.limit())
            );
            println!("objects: {}", roster.objects.len());
            match project.load_tilesets()?.get(info.tileset) {
                Ok(tileset) => println!(
                    "tileset {}: picture={}, autotiles={}, walls={}",
                    tileset.id,
                    tileset.picture,
                    tileset.autotiles.len(),
                    tileset.walls.len()
                ),
                Err(e) => println!("tileset: {e}"),
            }
        }
        Commands::Inspect {
            project,
            map,
            portion,
        } => {
            let project = MapProject::new(project);
            let map = MapId(map);
            let bounds = project.load_map_info(map)?.bounds(config.portion_size);
            if !bounds.contains(portion) {
                println!("{portion}: outside the map");
                return Ok(());
            }
            let source = DirectorySource::new(project.map_dir(map));
            match read_portion(&source, portion, config.honor_entry_point)? {
                Some(content) => {
                    println!(
                        "{portion}: {} lands, {} objects",
                        content.lands.len(),
                        content.objects.len()
                    );
                    for object in &content.objects {
                        println!(
                            "  object {} at {:?} state {}",
                            object.id, object.position, object.state.0
                        );
                    }
                    if content.entry_point {
                        println!("  entry point");
                    }
                }
                None => println!("{portion}: empty"),
            }
        }
        Commands::Walk {
            project,
            map,
            from,
            to,
            steps,
            save,
        } => {
            let project = MapProject::new(project);
            let map = MapId(map);
            let mut engine = match save {
                Some(dir) => {
                    let store = RecordStore::open(dir)?;
                    Some(Engine::new(config.clone(), project.clone(), store)?)
                }
                None => None,
            };
            let mut session = match engine.as_mut() {
                Some(engine) => engine.enter_map(map, from, true)?,
                None => MapSession::open(config, &project, map, None, from, true)?,
            };

            while !session.is_ready() {
                session.tick(from)?;
                session.settle(Duration::from_secs(10))?;
            }
            println!(
                "ready after {} ticks: {} portions loaded around {}",
                session.tick_count(),
                session.window().portions().occupied(),
                session.window().center()
            );

            let steps = steps.max(1);
            for i in 1..=steps {
                let reference = from.lerp(to, i as f32 / steps as f32);
                let report = session.tick(reference)?;
                let settled = session.settle(Duration::from_secs(10))?;
                if report.shift_steps > 0 {
                    println!(
                        "tick {}: center {} evicted={} requested={} \
                         installed={} absent={} failed={}",
                        report.tick,
                        session.window().center(),
                        report.evicted,
                        report.requested,
                        report.installed + settled.installed,
                        report.absent + settled.absent,
                        report.failed + settled.failed
                    );
                }
            }

            match engine.as_mut() {
                Some(engine) => {
                    engine.leave_map(session)?;
                    println!("records saved to {}", engine.store().root().display());
                }
                None => {
                    session.close();
                }
            }
        }
        Commands::Bake { project, map, out } => {
            let project = MapProject::new(project);
            let info = project.load_map_info(MapId(map))?;
            let tilesets = project.load_tilesets()?;
            let tileset = tilesets.get(info.tileset)?;

            let images = DirectoryImageSource::new(project.pictures_dir());
            let mut job = AtlasBuildJob::new(
                AtlasLayout::for_autotiles(config.square_size),
                tileset.autotiles.iter().copied(),
            );
            let ticks = job.run_to_completion(&images);

            std::fs::create_dir_all(&out)?;
            for (i, atlas) in job.atlases().iter().enumerate() {
                let path = out.join(format!("atlas_{i}.png"));
                atlas
                    .image
                    .save(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!(
                    "{}: {} placed, {} blank",
                    path.display(),
                    atlas.populated(),
                    atlas.blank()
                );
            }
            println!("baked {} autotiles in {ticks} ticks", tileset.autotiles.len());
        }
    }

    Ok(())
}
