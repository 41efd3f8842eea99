//! Resolución de tags y releases contra repos GitHub verificados.
//!
//! Etapa deliberadamente secuencial: el presupuesto de quota GraphQL es
//! global, paralelizar sólo adelantaría el agotamiento. Cada paquete prueba
//! sus URLs válidas en el orden fijo de slots y se queda con el primer repo
//! que responde; fallos de transporte avanzan al slot siguiente, repos
//! inexistentes descartan el paquete completo.

use log::{info, warn};
use repro_domain::scmurl::RepoCoords;
use repro_domain::tagmatch::{best_release_index, matching_tag_indices};
use repro_persistence::pg::{ConnectionProvider, NewTagRow, ResolveCandidateRow, Warehouse};

use crate::error::PipelineError;
use crate::github::{GithubClient, RepoFacets};

/// Pausa entre paquetes para no saturar el endpoint.
const INTER_PACKAGE_SLEEP_MS: u64 = 50;

#[derive(Debug, Default)]
pub struct ResolveStats {
    pub processed: usize,
    pub with_tag: usize,
    pub with_release: usize,
    pub empty: usize,
    pub failed: usize,
}

pub struct TagResolver<'a, P: ConnectionProvider> {
    warehouse: &'a Warehouse<P>,
    client: GithubClient,
}

impl<'a, P: ConnectionProvider> TagResolver<'a, P> {
    pub fn new(warehouse: &'a Warehouse<P>, client: GithubClient) -> Self {
        TagResolver { warehouse, client }
    }

    /// Resuelve todos los candidatos pendientes. La fila de `tags` se escribe
    /// siempre, aunque no haya match: una fila vacía marca el paquete como ya
    /// consultado y lo saca de la cola.
    pub fn resolve_all(&mut self) -> Result<ResolveStats, PipelineError> {
        let candidates = self.warehouse.resolve_candidates()?;
        info!("resolver: {} paquetes pendientes", candidates.len());
        let mut stats = ResolveStats::default();

        for candidate in &candidates {
            match self.resolve_package(candidate) {
                Ok(Some(outcome)) => {
                    stats.processed += 1;
                    if outcome.tag_found {
                        stats.with_tag += 1;
                    }
                    if outcome.release_found {
                        stats.with_release += 1;
                    }
                    if !outcome.tag_found && !outcome.release_found {
                        stats.empty += 1;
                    }
                }
                Ok(None) => stats.failed += 1,
                Err(e) => {
                    // un error de persistencia sí aborta el run completo
                    warn!("resolver: error fatal en {}: {e}", candidate.pkg());
                    return Err(e);
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(INTER_PACKAGE_SLEEP_MS));
        }

        info!("resolver: procesados={} con_tag={} con_release={} vacíos={} fallidos={}",
              stats.processed, stats.with_tag, stats.with_release, stats.empty, stats.failed);
        Ok(stats)
    }

    /// Un paquete. `Ok(None)` significa que ninguna URL produjo un repo
    /// consultable; el motivo ya quedó en `errors`.
    fn resolve_package(&mut self, candidate: &ResolveCandidateRow) -> Result<Option<ResolveOutcome>, PipelineError> {
        let pkg = candidate.pkg();

        for url in candidate.valid_urls() {
            let Some(coords) = github_coords(url) else {
                self.warehouse
                    .insert_error(&pkg, Some(url), "(RESOLVER) URL válida sin owner/repo extraíble")?;
                continue;
            };

            let facets = match self.client.fetch_facets(&coords.owner, &coords.repo, pkg.version()) {
                Ok(f) => f,
                Err(PipelineError::MalformedResponse(msg)) => {
                    // repo borrado o privado: no vale la pena probar otro slot,
                    // todas las URLs del paquete apuntan al mismo sitio la
                    // enorme mayoría de las veces
                    warn!("resolver: {pkg} sin repositorio ({msg})");
                    self.warehouse.insert_error(&pkg, Some(url), "(RESOLVER) repositorio inaccesible")?;
                    return Ok(None);
                }
                Err(e @ (PipelineError::Http(_) | PipelineError::Io(_))) => {
                    warn!("resolver: transporte falló para {pkg} en {url}: {e}");
                    self.warehouse.insert_error(&pkg, Some(url), "(RESOLVER) fallo de transporte")?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let outcome = self.persist_match(&pkg, url, &facets)?;
            return Ok(Some(outcome));
        }

        self.warehouse.insert_error(&pkg, None, "(RESOLVER) ninguna URL produjo un repositorio")?;
        Ok(None)
    }

    /// Matching sobre las facetas ya descargadas y escritura de la fila.
    fn persist_match(&self,
                     pkg: &repro_domain::package::PackageId,
                     url: &str,
                     facets: &RepoFacets)
                     -> Result<ResolveOutcome, PipelineError> {
        let tag_names: Vec<String> = facets.tags.iter().map(|t| t.name.clone()).collect();
        let indices = matching_tag_indices(&tag_names, pkg.artifact_id(), pkg.version());
        if indices.len() > 1 {
            let names: Vec<&str> = indices.iter().map(|&i| tag_names[i].as_str()).collect();
            warn!("resolver: {pkg} con tags ambiguos {names:?}, se toma el primero en orden de la API");
        }
        let tag = indices.first().map(|&i| &facets.tags[i]);

        let release_names: Vec<Option<String>> = facets.releases.iter().map(|r| r.name.clone()).collect();
        let release = best_release_index(&release_names, pkg.version()).map(|i| &facets.releases[i]);

        let row = NewTagRow { groupid: pkg.group_id(),
                              artifactid: pkg.artifact_id(),
                              version: pkg.version(),
                              tag_name: tag.map(|t| t.name.as_str()),
                              tag_commit_hash: tag.and_then(|t| t.target.as_ref()).map(|o| o.oid.as_str()),
                              release_name: release.and_then(|r| r.name.as_deref()),
                              release_tag_name: release.and_then(|r| r.tag.as_ref()).map(|t| t.name.as_str()),
                              release_commit_hash: release.and_then(|r| r.tag_commit.as_ref()).map(|o| o.oid.as_str()),
                              url: Some(url) };
        self.warehouse.upsert_tag(&row)?;

        Ok(ResolveOutcome { tag_found: tag.is_some(), release_found: release.is_some() })
    }
}

struct ResolveOutcome {
    tag_found: bool,
    release_found: bool,
}

/// Coordenadas owner/repo de una URL, sólo si el host es consultable por la
/// API. URLs imparseables o de otras forjas devuelven `None`.
fn github_coords(url: &str) -> Option<RepoCoords> {
    match RepoCoords::parse(url) {
        Ok(c) if c.is_github() => Some(c),
        _ => None,
    }
}
