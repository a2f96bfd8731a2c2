use std::fs;
use std::path::PathBuf;

use world_core::WorldDefinition;
use world_domain::{
    builtin_world, BUILTIN_DOMAIN, BUILTIN_ERAS, BUILTIN_FEEDBACK_LOOPS, BUILTIN_PRESSURES,
    BUILTIN_REGISTRIES, BUILTIN_SEED, BUILTIN_TAGS, BUILTIN_TARGETS,
};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("worldgen-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

#[test]
fn builtin_sections_load_from_a_directory() -> anyhow::Result<()> {
    let dir = scratch_dir("full");
    for (file, contents) in [
        ("domain.json", BUILTIN_DOMAIN),
        ("eras.json", BUILTIN_ERAS),
        ("pressures.json", BUILTIN_PRESSURES),
        ("targets.json", BUILTIN_TARGETS),
        ("registries.json", BUILTIN_REGISTRIES),
        ("tags.json", BUILTIN_TAGS),
        ("feedback_loops.json", BUILTIN_FEEDBACK_LOOPS),
        ("seed.json", BUILTIN_SEED),
    ] {
        fs::write(dir.join(file), contents)?;
    }

    let loaded = WorldDefinition::from_dir(&dir)?;
    let builtin = builtin_world();
    assert_eq!(serde_json::to_value(&loaded)?, serde_json::to_value(&builtin)?);
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn optional_sections_may_be_missing() -> anyhow::Result<()> {
    let dir = scratch_dir("minimal");
    for (file, contents) in [
        ("domain.json", BUILTIN_DOMAIN),
        ("eras.json", BUILTIN_ERAS),
        ("pressures.json", BUILTIN_PRESSURES),
        ("targets.json", BUILTIN_TARGETS),
        ("registries.json", BUILTIN_REGISTRIES),
    ] {
        fs::write(dir.join(file), contents)?;
    }

    let loaded = WorldDefinition::from_dir(&dir)?;
    assert!(loaded.seed.entities.is_empty());
    assert!(loaded.feedback_loops.is_empty());
    assert!(loaded.tags.tags.is_empty());
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn missing_required_section_is_reported() {
    let dir = scratch_dir("broken");
    fs::write(dir.join("domain.json"), BUILTIN_DOMAIN).expect("write domain");
    let err = WorldDefinition::from_dir(&dir).unwrap_err();
    assert!(err.to_string().contains("eras.json"), "{err}");
    let _ = fs::remove_dir_all(&dir);
}
