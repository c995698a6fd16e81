//! evalbench: run authored test sequences against a chip's register map

use std::env;
use std::path::Path;

use evalbench::config::Config;
use evalbench::events::{EventSink, Measurement, RunOutcome, RunSummary};
use evalbench::regmap::{parse_override_file, MapDescription, RegisterMap, ValueSource};
use evalbench::sequence::{PlayerOptions, Sequence, SequencePlayer};
use evalbench::testing;

/// Sink that writes run progress straight to the terminal.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn on_log(&mut self, message: &str) {
        println!("  {}", message);
    }

    fn on_measurement(&mut self, measurement: &Measurement) {
        println!("  {}", measurement);
    }

    fn on_finished(&mut self, summary: &RunSummary) {
        println!();
        println!("Run {}", summary);
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut positionals: Vec<String> = Vec::new();
    let mut overrides_path: Option<String> = None;
    let mut sample_id: Option<String> = None;
    let mut halt: Option<bool> = None;
    let mut list_fields = false;
    let mut dry_run = false;

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--list-fields" => list_fields = true,
            "--dry-run" => dry_run = true,
            "--halt-on-error" => halt = Some(true),
            "--no-halt" => halt = Some(false),
            "--overrides" => {
                index += 1;
                let path = args
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("--overrides needs a file path"))?;
                overrides_path = Some(path.clone());
            }
            "--sample" => {
                index += 1;
                let id = args
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("--sample needs an identifier"))?;
                sample_id = Some(id.clone());
            }
            other if other.starts_with('-') => {
                anyhow::bail!("unknown option '{}' (try --help)", other);
            }
            other => positionals.push(other.to_string()),
        }
        index += 1;
    }

    let config = Config::get();

    let (mut map, sequence) = if dry_run {
        println!("Dry run: built-in sample map and sequence");
        (testing::sample_map()?, Some(testing::sample_sequence()?))
    } else {
        let map_path = positionals
            .first()
            .cloned()
            .or_else(|| config.register_map.clone());
        let map_path = match map_path {
            Some(path) => path,
            None => {
                print_usage();
                anyhow::bail!("no register map given (argument or config register_map)");
            }
        };
        println!("Loading register map: {}", map_path);
        let desc = MapDescription::from_file(Path::new(&map_path))?;
        let map = RegisterMap::load(&desc)
            .map_err(|report| anyhow::anyhow!("register map rejected:\n{}", report))?;

        let sequence = match positionals.get(1) {
            Some(sequence_path) => {
                println!("Loading sequence: {}", sequence_path);
                Some(Sequence::from_file(Path::new(sequence_path))?)
            }
            None => None,
        };
        (map, sequence)
    };

    println!(
        "Register map: {} ({} fields, window 0x{:04X}..0x{:04X})",
        map.name().unwrap_or("unnamed"),
        map.field_count(),
        map.address_window().0,
        map.address_window().1
    );

    if let Some(path) = overrides_path {
        let (entries, errors) = parse_override_file(Path::new(&path))?;
        for error in &errors {
            println!("Warning: override file: {}", error);
        }
        let stats = map.apply_overrides(&entries);
        println!(
            "Applied {} override bytes from {} ({} unmapped lines skipped)",
            stats.applied, path, stats.skipped_unmapped
        );
    }

    if list_fields {
        print_fields(&map);
        return Ok(());
    }

    let sequence = match sequence {
        Some(sequence) => sequence,
        None => {
            // Map-only invocation: the summary above is the output.
            print_fields(&map);
            return Ok(());
        }
    };

    // The CLI always drives the simulated bench; real instruments come
    // in through library embedding.
    let (mut context, _wire) = testing::sim_context(&map);
    let mut sink = ConsoleSink;
    let options = PlayerOptions {
        halt_on_error: halt.unwrap_or_else(|| config.halt_on_error()),
        sample_id: sample_id.unwrap_or_else(|| config.sample_id()),
        chamber_poll: config.chamber_poll(),
    };

    println!();
    println!(
        "Running: {}",
        sequence.name.as_deref().unwrap_or("unnamed sequence")
    );
    println!();

    let mut player = SequencePlayer::new(&mut map, &mut context, &mut sink, options);
    let summary = player.run(&sequence);

    match summary.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Failed => std::process::exit(1),
        RunOutcome::Aborted => std::process::exit(2),
    }
}

/// Print the field table for a loaded map.
fn print_fields(map: &RegisterMap) {
    println!();
    println!("Fields");
    println!("======");
    for field in map.fields() {
        let addresses: Vec<String> = field
            .addresses()
            .map(|address| format!("0x{:04X}", address))
            .collect();
        println!(
            "  {:24} {:4} {:3} bits  reset 0x{:X}  @ {}",
            field.id,
            field.access.to_string(),
            field.length,
            field.reset_value,
            addresses.join(", ")
        );
        if let Some(description) = &field.description {
            println!("  {:24} {}", "", description);
        }
    }
    println!();
    println!("Reset-state bytes");
    println!("=================");
    for address in map.addresses() {
        if let Some(byte) = map.byte(address, ValueSource::Initial) {
            println!("  0x{:04X} = 0x{:02X}", address, byte);
        }
    }
}

fn print_usage() {
    println!("evalbench - sequence runner for chip evaluation benches");
    println!();
    println!("Usage: evalbench <map.toml> [sequence.toml] [options]");
    println!("       evalbench --dry-run");
    println!();
    println!("Options:");
    println!("  --list-fields      print the field table and exit");
    println!("  --overrides FILE   replay a byte override file after loading the map");
    println!("  --halt-on-error    stop at the first failed action");
    println!("  --no-halt          record failures and keep going");
    println!("  --sample ID        sample identifier stamped on measurements");
    println!("  --dry-run          run the built-in sample scenario on the simulator");
    println!("  -h, --help         show this help");
    println!();
    println!("Without a sequence file the map is loaded, overrides are applied,");
    println!("and the field table is printed.");
}
