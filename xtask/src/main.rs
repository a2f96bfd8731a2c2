use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use schemars::schema::RootSchema;
use schemars::schema_for;
use serde_json::Value;
use world_core::EngineConfig;
use world_domain::ComponentCatalog;
use world_schema::{
    DistributionTargets, DomainSchema, EntityOperatorRegistry, Era, FeedbackLoop, PressureFile,
    TagRegistry, WorldSeed,
};

const DEFAULT_DATA_GLOB: &str = "world_domain/src/data/*.json";
const ENGINE_CONFIG: &str = "world_core/src/data/engine_config.json";
const SCHEMA_DIR: &str = "schemas";

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("schemas") => write_schemas(args.next().map(PathBuf::from)),
        Some("validate-data") => validate_data(args.next()),
        Some("help") | None => {
            print_usage();
            Ok(())
        }
        Some(cmd) => {
            eprintln!("Unknown xtask '{cmd}'.");
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("Usage: cargo xtask schemas [out_dir]");
    eprintln!("       cargo xtask validate-data [glob]");
    eprintln!("       cargo xtask help");
}

/// Schema for each data file, keyed by file name.
fn schema_for_file(name: &str) -> Option<RootSchema> {
    let schema = match name {
        "domain.json" => schema_for!(DomainSchema),
        "eras.json" => schema_for!(Vec<Era>),
        "pressures.json" => schema_for!(PressureFile),
        "targets.json" => schema_for!(DistributionTargets),
        "registries.json" => schema_for!(Vec<EntityOperatorRegistry>),
        "tags.json" => schema_for!(TagRegistry),
        "feedback_loops.json" => schema_for!(Vec<FeedbackLoop>),
        "seed.json" => schema_for!(WorldSeed),
        "components.json" => schema_for!(ComponentCatalog),
        "engine_config.json" => schema_for!(EngineConfig),
        _ => return None,
    };
    Some(schema)
}

const SCHEMA_FILES: [&str; 10] = [
    "domain.json",
    "eras.json",
    "pressures.json",
    "targets.json",
    "registries.json",
    "tags.json",
    "feedback_loops.json",
    "seed.json",
    "components.json",
    "engine_config.json",
];

fn write_schemas(out_dir: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let out_dir = out_dir.unwrap_or_else(|| PathBuf::from(SCHEMA_DIR));
    fs::create_dir_all(&out_dir)?;
    for name in SCHEMA_FILES {
        let Some(schema) = schema_for_file(name) else {
            continue;
        };
        let file = out_dir.join(name.replace(".json", ".schema.json"));
        fs::write(&file, serde_json::to_string_pretty(&schema)?)?;
        println!("Wrote {}", file.display());
    }
    Ok(())
}

fn validate_data(pattern: Option<String>) -> Result<(), Box<dyn Error>> {
    let pattern = pattern.unwrap_or_else(|| DEFAULT_DATA_GLOB.to_string());
    let mut files: Vec<PathBuf> = glob::glob(&pattern)?.collect::<Result<_, _>>()?;
    let config = Path::new(ENGINE_CONFIG);
    if config.exists() && !files.iter().any(|file| file == config) {
        files.push(config.to_path_buf());
    }

    let mut checked = 0;
    let mut failures = 0;
    for file in &files {
        let Some(name) = file.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(schema) = schema_for_file(name) else {
            println!("Skipping {} (no schema)", file.display());
            continue;
        };
        let schema = serde_json::to_value(schema)?;
        let compiled = JSONSchema::compile(&schema)
            .map_err(|err| format!("invalid schema for {name}: {err}"))?;
        let instance: Value = serde_json::from_str(&fs::read_to_string(file)?)?;
        checked += 1;
        if let Err(errors) = compiled.validate(&instance) {
            failures += 1;
            for error in errors {
                eprintln!("{}: {} at {}", file.display(), error, error.instance_path);
            }
        };
    }

    if failures > 0 {
        return Err(format!("{failures} of {checked} data files failed validation").into());
    }
    println!("Validated {checked} data files");
    Ok(())
}
