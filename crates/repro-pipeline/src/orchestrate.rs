//! Orquestación de builds reproducibles.
//!
//! Recorre los paquetes con tag resuelto y timestamp de output, y para cada
//! uno ejecuta dos caminos independientes: la receta ya publicada en el
//! checkout de recetas (si existe) y la matriz sintetizada (jdk × newline)
//! desde la plantilla. Cada intento persiste una fila de `builds`; el
//! conflicto con una fila previa se descarta en silencio, lo que hace la
//! etapa re-ejecutable sin duplicar trabajo.
//!
//! Secuencial a propósito: el driver externo ya satura la máquina con un
//! build de Maven por vez.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use repro_domain::buildspec::{BuildResult, BuildSpec, Newline};
use repro_domain::jdk::select_jdks;
use repro_domain::package::PackageId;
use repro_persistence::pg::{BuildCandidateRow, BuildParamsRow, ConnectionProvider, Warehouse};

use crate::compare::ArtifactComparator;
use crate::error::PipelineError;
use crate::recipe;

const DEFAULT_BUILDER_DIR: &str = "temp/builder";
const DEFAULT_TEMPLATE: &str = ".buildspec.template";
const DEFAULT_TOOL: &str = "mvn";

/// Ubicaciones y comando del driver de build externo.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Directorio de trabajo del driver (checkout de recetas con `content/`
    /// y donde se materializa `research/`).
    pub builder_dir: PathBuf,
    /// Ejecutable del driver; recibe el path del buildspec como único
    /// argumento, relativo a `builder_dir`.
    pub build_cmd: String,
    /// Plantilla `{{key}}` para recetas sintetizadas.
    pub template_path: PathBuf,
}

impl BuilderConfig {
    /// Lee `BUILD_CMD` (obligatoria), `BUILDER_DIR` y `BUILDSPEC_TEMPLATE`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let build_cmd = std::env::var("BUILD_CMD")
            .map_err(|_| PipelineError::Misconfiguration("BUILD_CMD no definida".to_string()))?;
        let builder_dir = std::env::var("BUILDER_DIR").unwrap_or_else(|_| DEFAULT_BUILDER_DIR.to_string());
        let template_path = std::env::var("BUILDSPEC_TEMPLATE").unwrap_or_else(|_| DEFAULT_TEMPLATE.to_string());
        Ok(BuilderConfig { builder_dir: PathBuf::from(builder_dir),
                           build_cmd,
                           template_path: PathBuf::from(template_path) })
    }

    fn content_dir(&self) -> PathBuf {
        self.builder_dir.join("content")
    }

    /// Directorio de trabajo de un paquete dentro del builder, relativo.
    fn research_dir(&self, pkg: &PackageId) -> PathBuf {
        PathBuf::from("research").join(format!("{}-{}-{}", pkg.group_id(), pkg.artifact_id(), pkg.version()))
    }
}

#[derive(Debug, Default)]
pub struct BuildStats {
    pub candidates: usize,
    pub attempts: usize,
    pub successes: usize,
    pub skipped: usize,
    pub compared: usize,
}

pub struct BuildOrchestrator<'a, P: ConnectionProvider> {
    warehouse: &'a Warehouse<P>,
    config: BuilderConfig,
}

impl<'a, P: ConnectionProvider> BuildOrchestrator<'a, P> {
    pub fn new(warehouse: &'a Warehouse<P>, config: BuilderConfig) -> Self {
        BuildOrchestrator { warehouse, config }
    }

    /// Construye todos los candidatos pendientes. Ningún fallo de un paquete
    /// corta el lote: cada uno tiene su frontera de error.
    pub fn build_all(&self) -> Result<BuildStats, PipelineError> {
        let candidates = self.warehouse.build_candidates()?;
        let mut stats = BuildStats { candidates: candidates.len(), ..BuildStats::default() };
        info!("orquestador: {} candidatos con tag y timestamp", stats.candidates);

        for (i, candidate) in candidates.iter().enumerate() {
            let pkg = candidate.pkg();
            info!("orquestador: {}/{} {pkg}", i + 1, stats.candidates);
            if let Err(e) = self.build_package(candidate, &mut stats) {
                error!("orquestador: {pkg} falló: {e}");
                if let Err(db) = self.warehouse.insert_error(&pkg, None, "(ORQUESTADOR) build abortada por error") {
                    error!("orquestador: no se pudo registrar el error de {pkg}: {db}");
                }
            }
        }

        info!("orquestador: intentos={} exitosas={} saltados={} comparados={}",
              stats.attempts, stats.successes, stats.skipped, stats.compared);
        Ok(stats)
    }

    fn build_package(&self, candidate: &BuildCandidateRow, stats: &mut BuildStats) -> Result<(), PipelineError> {
        let pkg = candidate.pkg();

        // camino 1: receta ya publicada
        if let Some(published) = recipe::find_existing_buildspec(&self.config.content_dir(), &pkg) {
            debug!("orquestador: {pkg} tiene buildspec publicado en {}", published.display());
            self.build_from_existing(&pkg, &published, stats)?;
        }

        // camino 2: matriz sintetizada
        self.build_from_scratch(candidate, stats)
    }

    /// Copia el buildspec publicado al workspace y lo construye tal cual.
    fn build_from_existing(&self, pkg: &PackageId, published: &Path, stats: &mut BuildStats) -> Result<(), PipelineError> {
        let rel_dir = self.config.research_dir(pkg);
        let abs_dir = self.config.builder_dir.join(&rel_dir);
        fs::create_dir_all(&abs_dir)?;
        let file_name = format!("{}-{}.buildspec", pkg.artifact_id(), pkg.version());
        let rel_path = rel_dir.join(&file_name);
        fs::copy(published, abs_dir.join(&file_name))?;

        let spec = recipe::parse_buildspec(&self.config.builder_dir.join(&rel_path))?;
        self.run_and_persist(&spec, &rel_path, true, stats)
    }

    /// Sintetiza una receta por cada combinación (jdk, newline) plausible.
    fn build_from_scratch(&self, candidate: &BuildCandidateRow, stats: &mut BuildStats) -> Result<(), PipelineError> {
        let pkg = candidate.pkg();
        let Some(url) = candidate.url.as_deref() else {
            warn!("orquestador: {pkg} sin URL en tags, se salta");
            stats.skipped += 1;
            return Ok(());
        };
        let Some(tag) = candidate.tag_name.as_deref().or(candidate.release_tag_name.as_deref()) else {
            warn!("orquestador: {pkg} sin tag ni release tag, se salta");
            stats.skipped += 1;
            return Ok(());
        };
        let jdks = select_jdks(candidate.java_version_manifest_3.as_deref(),
                               candidate.java_version_manifest_2.as_deref(),
                               candidate.compiler_version_source.as_deref(),
                               candidate.lastmodified.as_ref().map(DateTime::<Utc>::date_naive));
        if jdks.is_empty() {
            warn!("orquestador: {pkg} sin pista de JDK utilizable, se salta");
            stats.skipped += 1;
            return Ok(());
        }
        let newlines = Newline::candidates(candidate.line_ending_lf,
                                           candidate.line_ending_crlf,
                                           candidate.line_ending_inconsistent_in_file);

        for jdk in &jdks {
            for newline in &newlines {
                let rel_path = self.render_buildspec(&pkg, url, tag, DEFAULT_TOOL, jdk, *newline)?;
                let spec = recipe::parse_buildspec(&self.config.builder_dir.join(&rel_path))?;
                self.run_and_persist(&spec, &rel_path, false, stats)?;
            }
        }
        Ok(())
    }

    /// Renderiza la plantilla al workspace del paquete y devuelve el path
    /// relativo al builder.
    fn render_buildspec(&self,
                        pkg: &PackageId,
                        url: &str,
                        tag: &str,
                        tool: &str,
                        jdk: &str,
                        newline: Newline)
                        -> Result<PathBuf, PipelineError> {
        let template = fs::read_to_string(&self.config.template_path)?;
        let values = [("groupId", pkg.group_id()),
                      ("artifactId", pkg.artifact_id()),
                      ("version", pkg.version()),
                      ("gitRepo", url),
                      ("gitTag", tag),
                      ("tool", tool),
                      ("jdk", jdk),
                      ("newline", newline.as_str())].into_iter().collect();
        let rendered = recipe::render_template(&template, &values);

        let rel_dir = self.config.research_dir(pkg);
        let abs_dir = self.config.builder_dir.join(&rel_dir);
        fs::create_dir_all(&abs_dir)?;
        let file_name = format!("{}-{}.buildspec", pkg.artifact_id(), pkg.version());
        fs::write(abs_dir.join(&file_name), rendered)?;
        Ok(rel_dir.join(file_name))
    }

    /// Ejecuta el driver, parsea el reporte, persiste y dispara la
    /// comparación cuando corresponde.
    fn run_and_persist(&self,
                       spec: &BuildSpec,
                       rel_buildspec: &Path,
                       from_existing: bool,
                       stats: &mut BuildStats)
                       -> Result<(), PipelineError> {
        stats.attempts += 1;
        let (result, report) = self.run_driver(rel_buildspec)?;
        if result.build_success {
            stats.successes += 1;
        }

        let build_id = self.warehouse.insert_build(spec, &result, from_existing)?;
        let Some(build_id) = build_id else {
            debug!("orquestador: build duplicada de {}, fila descartada", spec.pkg);
            return Ok(());
        };

        if result.build_success && !result.non_reproducible_jars().is_empty() {
            if let Some(report) = report {
                let comparator = ArtifactComparator::new(self.warehouse);
                stats.compared += comparator.compare(&spec.pkg, build_id, &report, &result)?;
            }
        }
        Ok(())
    }

    /// Invoca el driver con el buildspec relativo, capturando ambos streams.
    /// El exit code no se interpreta: la evidencia de éxito es el reporte.
    fn run_driver(&self, rel_buildspec: &Path) -> Result<(BuildResult, Option<PathBuf>), PipelineError> {
        let output = Command::new(&self.config.build_cmd).arg(rel_buildspec)
                                                         .current_dir(&self.config.builder_dir)
                                                         .output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        debug!("driver exit={:?} stdout={}B stderr={}B", output.status.code(), stdout.len(), stderr.len());

        let report = recipe::find_sibling_report(&self.config.builder_dir.join(rel_buildspec))?;
        let result = recipe::result_from_report(report.as_deref(), stdout, stderr)?;
        Ok((result, report))
    }

    /// Re-renderiza y re-ejecuta una build ya persistida, por id. Pensada
    /// para depurar un resultado puntual; el insert duplicado se descarta
    /// solo por la restricción de unicidad.
    pub fn rebuild_one(&self, build_id: i32) -> Result<(), PipelineError> {
        let params = self.warehouse
                         .build_params(build_id)?
                         .ok_or_else(|| PipelineError::MissingPrerequisite(format!("build {build_id} inexistente")))?;
        let BuildParamsRow { groupid, artifactid, version, jdk, newline, tool, tag_name, url, .. } = params;
        let pkg = PackageId::new(&groupid, &artifactid, &version);
        let newline = newline.parse::<Newline>().map_err(|e| PipelineError::Report(e.to_string()))?;
        let url = url.ok_or_else(|| PipelineError::MissingPrerequisite(format!("build {build_id} sin URL")))?;
        let tag = tag_name.ok_or_else(|| PipelineError::MissingPrerequisite(format!("build {build_id} sin tag")))?;

        let rel_path = self.render_buildspec(&pkg, &url, &tag, &tool, &jdk, newline)?;
        let (result, _) = self.run_driver(&rel_path)?;
        info!("rebuild {build_id}: {pkg} jdk={jdk} newline={newline} success={} ko={:?}",
              result.build_success,
              result.ko_files);
        Ok(())
    }
}
