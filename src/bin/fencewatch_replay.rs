//! fencewatch replay tool
//!
//! Feeds a recorded position stream through the geofence engine and prints
//! every emitted event as one JSON object per line.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use fencewatch::{
    DevicePosition, EventHub, FenceConfig, Geofence, GeofenceEngine, GeofenceId, GeofenceStore,
    InMemoryGeofenceStore, LatestPositions,
};

/// Command line options.
struct Args {
    geofences: PathBuf,
    positions: PathBuf,
    config: Option<PathBuf>,
    assignments: Option<PathBuf>,
    all_devices: bool,
}

fn usage() {
    println!("fencewatch-replay - replay positions through the geofence engine");
    println!();
    println!("USAGE:");
    println!("    fencewatch-replay --geofences <FILE> --positions <FILE> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -g, --geofences <FILE>    JSON array of geofence definitions");
    println!("    -p, --positions <FILE>    JSON lines of position samples ('-' for stdin)");
    println!("    -c, --config <FILE>       JSON engine configuration");
    println!("    -s, --assignments <FILE>  JSON object mapping geofence id to device ids");
    println!("    -a, --all-devices         Assign every device to every geofence");
    println!("    -h, --help                Print help information");
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut geofences = None;
    let mut positions = None;
    let mut config = None;
    let mut assignments = None;
    let mut all_devices = false;

    let value = |i: usize, flag: &str| -> PathBuf {
        args.get(i + 1)
            .map(PathBuf::from)
            .unwrap_or_else(|| fail(&format!("{flag} requires a value")))
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--geofences" | "-g" => {
                geofences = Some(value(i, "--geofences"));
                i += 2;
            }
            "--positions" | "-p" => {
                positions = Some(value(i, "--positions"));
                i += 2;
            }
            "--config" | "-c" => {
                config = Some(value(i, "--config"));
                i += 2;
            }
            "--assignments" | "-s" => {
                assignments = Some(value(i, "--assignments"));
                i += 2;
            }
            "--all-devices" | "-a" => {
                all_devices = true;
                i += 1;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            arg => fail(&format!("unknown argument: {arg}")),
        }
    }

    Args {
        geofences: geofences.unwrap_or_else(|| fail("--geofences is required")),
        positions: positions.unwrap_or_else(|| fail("--positions is required")),
        config,
        assignments,
        all_devices,
    }
}

fn read_positions(path: &Path) -> Result<Box<dyn BufRead>, io::Error> {
    if path.as_os_str() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(fs::File::open(path)?)))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = parse_args();

    let config = match &args.config {
        Some(path) => FenceConfig::from_json_str(&fs::read_to_string(path)?)?,
        None => FenceConfig::default(),
    };

    let fences = Geofence::list_from_json(&fs::read_to_string(&args.geofences)?)?;
    let store = Arc::new(InMemoryGeofenceStore::new());
    for fence in &fences {
        store.upsert(fence.clone())?;
    }
    if let Some(path) = &args.assignments {
        let table: BTreeMap<String, Vec<String>> = serde_json::from_str(&fs::read_to_string(path)?)?;
        for (geofence_id, devices) in table {
            let geofence_id = GeofenceId::from(geofence_id);
            for device_id in devices {
                store.assign(&geofence_id, device_id.into())?;
            }
        }
    }
    info!(geofences = fences.len(), "geofences loaded");

    let positions = Arc::new(LatestPositions::new());
    let hub = Arc::new(EventHub::new(config.hub.clone()));
    let engine = GeofenceEngine::new(&config, store.clone(), positions.clone(), hub.clone());

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut samples = 0u64;
    let mut rejected = 0u64;
    let mut emitted = 0u64;

    for (line_no, line) in read_positions(&args.positions)?.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let position: DevicePosition = match serde_json::from_str(&line) {
            Ok(position) => position,
            Err(err) => {
                warn!(line = line_no + 1, error = %err, "unparseable position");
                rejected += 1;
                continue;
            }
        };
        samples += 1;

        if args.all_devices {
            for fence in &fences {
                store.assign(&fence.id, position.device_id.clone())?;
            }
        }
        positions.record(position.clone())?;

        match engine.process_position(&position) {
            Ok(events) => {
                for event in events {
                    serde_json::to_writer(&mut out, &event)?;
                    out.write_all(b"\n")?;
                    emitted += 1;
                }
            }
            Err(err) => {
                warn!(line = line_no + 1, device_id = %position.device_id, error = %err, "sample rejected");
                rejected += 1;
            }
        }
    }
    out.flush()?;

    let stats = hub.stats();
    info!(
        samples,
        rejected,
        emitted,
        published = stats.published,
        dropped = stats.dropped_at_publish,
        "replay finished"
    );
    Ok(())
}
