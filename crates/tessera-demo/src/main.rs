//! Tessera demo host.
//!
//! Loads a prototype document, stamps out every prototype a number of times,
//! runs one signature pass, kills part of the population, refreshes, and
//! prints what is left.
//!
//! Usage: `tessera-demo [DOCUMENT] [INSTANCES]`
//!
//! `RUST_LOG` controls log output (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tessera_ecs::prelude::*;

const DEFAULT_DOCUMENT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/entity_data.json");
const DEFAULT_INSTANCES: usize = 3;

// ---------------------------------------------------------------------------
// Demo components, tags and signatures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    #[serde(default = "numeric_default")]
    x: f32,
    #[serde(default = "numeric_default")]
    y: f32,
    #[serde(default = "numeric_default")]
    z: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health {
    #[serde(default = "numeric_default")]
    health: f32,
    #[serde(default = "numeric_default", rename = "maxHealth")]
    max_health: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Renderable {
    #[serde(default = "numeric_default", rename = "meshId")]
    mesh_id: i32,
}

/// Set on every entity stamped out of a prototype.
struct Spawned;
/// Set on entities the demo will kill.
struct Doomed;

signature! {
    /// Anything that is somewhere and can be hurt.
    struct Living {
        components: (Position, Health),
    }
}

signature! {
    struct Drawn {
        components: (Position, Renderable),
        tags: (Spawned,),
    }
}

fn schema() -> anyhow::Result<Schema> {
    Ok(Schema::builder()
        .component::<Position>("positionComponent")
        .component::<Health>("healthComponent")
        .component::<Renderable>("renderableComponent")
        .tag::<Spawned>("spawned")
        .tag::<Doomed>("doomed")
        .signature::<Living>()
        .signature::<Drawn>()
        .build()?)
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

struct Args {
    document: PathBuf,
    instances: usize,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let document = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENT));
    let instances = match args.next() {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("INSTANCES must be a non-negative integer, got '{raw}'"))?,
        None => DEFAULT_INSTANCES,
    };
    Ok(Args {
        document,
        instances,
    })
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let schema = Arc::new(schema()?);
    tracing::info!(
        components = schema.component_count(),
        tags = schema.tag_count(),
        signatures = schema.signature_count(),
        "schema ready"
    );

    let report = PrototypeLoader::new(&schema).load_path(&args.document)?;
    for diagnostic in &report.diagnostics {
        println!("warning: {diagnostic}");
    }
    tracing::info!(
        document = %args.document.display(),
        prototypes = report.prototypes.len(),
        "loaded prototypes"
    );

    let mut registry = EntityRegistry::new(Arc::clone(&schema));
    let mut spawned = Vec::new();
    for prototype in &report.prototypes {
        for copy in 0..args.instances {
            let entity = prototype
                .create_entity(&mut registry)
                .with_context(|| format!("instantiating prototype '{}'", prototype.name()))?;
            registry.add_tag::<Spawned>(entity)?;
            if copy % 2 == 1 {
                registry.add_tag::<Doomed>(entity)?;
            }
            spawned.push((prototype.name().to_owned(), entity));
        }
    }

    let width = schema.bit_width();
    for (name, entity) in &spawned {
        let bits = registry.signature_of(*entity)?.to_bit_string(width);
        println!("{name} {entity}: signature {bits}");
    }

    registry.for_each_matching::<Living, _>(
        |index: EntityIndex, position: &mut Position, health: &mut Health| {
            println!(
                "entity {index}: health {}/{} at ({}, {}, {})",
                health.health, health.max_health, position.x, position.y, position.z
            );
        },
    )?;
    let drawn = registry
        .for_each_matching::<Drawn, _>(|_: EntityIndex, _: &mut Position, _: &mut Renderable| {})?;
    println!("{drawn} drawable entities");

    for (_, entity) in &spawned {
        if registry.has_tag::<Doomed>(*entity)? {
            registry.kill(*entity)?;
        }
    }
    let reclaimed = registry.refresh();
    println!(
        "reclaimed {reclaimed} entities, {} remain ({} positions stored)",
        registry.live_count(),
        registry.component_count_of::<Position>()
    );

    Ok(())
}
