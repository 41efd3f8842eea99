//! CLI del pipeline de reproducibilidad.
//!
//! Un subcomando por etapa: `extract`, `verify`, `resolve`, `build` y
//! `rebuild --build <ID>`. Las etapas son re-ejecutables; correr la misma dos
//! veces no duplica filas. Los únicos errores que abortan el arranque son los
//! de configuración (pool, token, comando de build); todo lo demás se absorbe
//! por paquete y el proceso corre hasta el final.

use std::time::Duration;

use log::{error, info};
use repro_persistence::{build_pool_from_env, PoolProvider, Warehouse};
use repro_pipeline::github::GithubClient;
use repro_pipeline::{BuildOrchestrator, BuilderConfig, HostExtractor, HostVerifier, TagResolver};

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_VERIFY_WORKERS: usize = 8;

fn main() {
    let _ = dotenvy::dotenv();
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        usage();
        std::process::exit(2);
    };

    let pool = match build_pool_from_env() {
        Ok(p) => p,
        Err(e) => {
            error!("no se pudo inicializar el pool: {e}");
            std::process::exit(5);
        }
    };
    let warehouse = Warehouse::new(PoolProvider { pool });

    let outcome = match command {
        "extract" => run_extract(&warehouse),
        "verify" => run_verify(&warehouse),
        "resolve" => run_resolve(&warehouse),
        "build" => run_build(&warehouse),
        "rebuild" => run_rebuild(&warehouse, &args[2..]),
        other => {
            eprintln!("subcomando desconocido: {other}");
            usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = outcome {
        error!("{command} abortó: {e}");
        std::process::exit(1);
    }
}

fn usage() {
    eprintln!("Uso: repro-cli <extract|verify|resolve|build> | rebuild --build <ID>");
}

fn run_extract(warehouse: &Warehouse<PoolProvider>) -> Result<(), repro_pipeline::PipelineError> {
    let stats = HostExtractor::new(warehouse).extract_all()?;
    info!("extract terminado: {stats:?}");
    Ok(())
}

fn run_verify(warehouse: &Warehouse<PoolProvider>) -> Result<(), repro_pipeline::PipelineError> {
    let timeout = env_u64("PROBE_TIMEOUT_SECS", DEFAULT_PROBE_TIMEOUT_SECS);
    let workers = env_u64("VERIFY_WORKERS", DEFAULT_VERIFY_WORKERS as u64) as usize;
    let verifier = HostVerifier::new(warehouse, Duration::from_secs(timeout), workers);
    let stats = verifier.verify_all()?;
    info!("verify terminado: {stats:?}");
    Ok(())
}

fn run_resolve(warehouse: &Warehouse<PoolProvider>) -> Result<(), repro_pipeline::PipelineError> {
    // chequeo de arranque: sin token no tiene sentido encolar nada
    let token = match std::env::var("GITHUB_TOKEN") {
        Ok(t) if !t.is_empty() => t,
        _ => {
            eprintln!("resolve requiere GITHUB_TOKEN");
            std::process::exit(3);
        }
    };
    let client = GithubClient::new(token)?;
    let stats = TagResolver::new(warehouse, client).resolve_all()?;
    info!("resolve terminado: {stats:?}");
    Ok(())
}

fn run_build(warehouse: &Warehouse<PoolProvider>) -> Result<(), repro_pipeline::PipelineError> {
    let config = builder_config_or_exit();
    let stats = BuildOrchestrator::new(warehouse, config).build_all()?;
    info!("build terminado: {stats:?}");
    Ok(())
}

fn run_rebuild(warehouse: &Warehouse<PoolProvider>, rest: &[String]) -> Result<(), repro_pipeline::PipelineError> {
    let mut build_id: Option<i32> = None;
    let mut i = 0;
    while i < rest.len() {
        if rest[i] == "--build" {
            i += 1;
            if i < rest.len() {
                build_id = rest[i].parse::<i32>().ok();
            }
        }
        i += 1;
    }
    let Some(build_id) = build_id else {
        eprintln!("Uso: repro-cli rebuild --build <ID>");
        std::process::exit(2);
    };

    let config = builder_config_or_exit();
    BuildOrchestrator::new(warehouse, config).rebuild_one(build_id)
}

fn builder_config_or_exit() -> BuilderConfig {
    match BuilderConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuración de build inválida: {e}");
            std::process::exit(3);
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(default)
}
