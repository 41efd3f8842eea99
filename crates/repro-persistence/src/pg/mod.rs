//! Operaciones Postgres (Diesel) del warehouse del pipeline.
//!
//! Objetivo del módulo:
//! - Exponer el warehouse como un repositorio estrecho: inserts idempotentes y
//!   queries tipadas por (groupid, artifactid, version).
//! - Cada escritura es una transacción por llamada; ninguna transacción cruza
//!   etapas del pipeline.
//! - Los reruns son seguros por construcción: flags `processed`, PK de tags y
//!   constraint única de builds convierten los reintentos en no-ops.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::sql_types::{Bool, Nullable, Text, Timestamptz};
use log::{debug, warn};

use repro_domain::{BuildResult, BuildSpec, PackageId};

use crate::config::DbConfig;
use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{builds, errors, hosts, jar_reproducibility, packages, tags};

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real (producción/tests de integración) o
/// factorear en tests unitarios sin acoplar a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Construye el pool desde `.env` y corre las migraciones pendientes una vez.
pub fn build_pool_from_env() -> Result<PgPool, PersistenceError> {
    let cfg = DbConfig::from_env()?;
    let manager = ConnectionManager::<PgConnection>::new(cfg.url);
    let pool = r2d2::Pool::builder().min_idle(Some(cfg.min_connections))
                                    .max_size(cfg.max_connections)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    let mut conn = pool.get()
                       .map_err(|e| PersistenceError::TransientIo(format!("pool get: {e}")))?;
    run_pending_migrations(&mut conn)?;
    Ok(pool)
}

/// Determina si un error es transitorio (recomendado reintentar con backoff).
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry simple con backoff lineal corto (hasta 3 intentos). No altera
/// semántica de negocio; sólo repite la unidad de trabajo provista.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Los cuatro slots de URL candidatos de un paquete, en el orden fijo en que
/// las etapas los intentan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlSlot {
    Scm,
    Homepage,
    ScmConn,
    DevConn,
}

impl UrlSlot {
    pub const ALL: [UrlSlot; 4] = [UrlSlot::Scm, UrlSlot::Homepage, UrlSlot::ScmConn, UrlSlot::DevConn];

    pub fn name(&self) -> &'static str {
        match self {
            UrlSlot::Scm => "scm",
            UrlSlot::Homepage => "homepage",
            UrlSlot::ScmConn => "scm_conn",
            UrlSlot::DevConn => "dev_conn",
        }
    }
}

/// Fila completa de `hosts` para el verificador.
#[derive(Queryable, Debug, Clone)]
pub struct HostRow {
    pub groupid: String,
    pub artifactid: String,
    pub version: String,
    pub url: Option<String>,
    pub host: Option<String>,
    pub valid: Option<String>,
    pub url_home: Option<String>,
    pub host_home: Option<String>,
    pub valid_home: Option<String>,
    pub url_scm_conn: Option<String>,
    pub host_scm_conn: Option<String>,
    pub valid_scm_conn: Option<String>,
    pub url_dev_conn: Option<String>,
    pub host_dev_conn: Option<String>,
    pub valid_dev_conn: Option<String>,
    pub processed: bool,
}

impl HostRow {
    pub fn pkg(&self) -> PackageId {
        PackageId::new(&self.groupid, &self.artifactid, &self.version)
    }

    /// URL candidata del slot (tal como la declaró el POM).
    pub fn candidate(&self, slot: UrlSlot) -> Option<&str> {
        match slot {
            UrlSlot::Scm => self.url.as_deref(),
            UrlSlot::Homepage => self.url_home.as_deref(),
            UrlSlot::ScmConn => self.url_scm_conn.as_deref(),
            UrlSlot::DevConn => self.url_dev_conn.as_deref(),
        }
    }

    /// URL ya verificada del slot, si el verificador encontró una.
    pub fn valid_url(&self, slot: UrlSlot) -> Option<&str> {
        match slot {
            UrlSlot::Scm => self.valid.as_deref(),
            UrlSlot::Homepage => self.valid_home.as_deref(),
            UrlSlot::ScmConn => self.valid_scm_conn.as_deref(),
            UrlSlot::DevConn => self.valid_dev_conn.as_deref(),
        }
    }
}

/// Fila de `tags` lista para upsert. Campos de release o de tag pueden venir
/// todos en None: una fila vacía documenta ausencia verificada.
#[derive(Insertable, Debug, Default)]
#[diesel(table_name = tags)]
pub struct NewTagRow<'a> {
    pub groupid: &'a str,
    pub artifactid: &'a str,
    pub version: &'a str,
    pub tag_name: Option<&'a str>,
    pub tag_commit_hash: Option<&'a str>,
    pub release_name: Option<&'a str>,
    pub release_tag_name: Option<&'a str>,
    pub release_commit_hash: Option<&'a str>,
    pub url: Option<&'a str>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = errors)]
struct NewErrorRow<'a> {
    groupid: &'a str,
    artifactid: &'a str,
    version: &'a str,
    url: Option<&'a str>,
    error: &'a str,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = builds)]
struct NewBuildRow<'a> {
    groupid: &'a str,
    artifactid: &'a str,
    version: &'a str,
    jdk: &'a str,
    newline: &'a str,
    tool: &'a str,
    from_existing: bool,
    build_success: Option<bool>,
    stdout: Option<&'a str>,
    stderr: Option<&'a str>,
    ok_files: Option<&'a [String]>,
    ko_files: Option<&'a [String]>,
    command: &'a str,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = jar_reproducibility)]
struct NewJarReprRow<'a> {
    build_id: i32,
    archive: &'a str,
    hash_mismatches: &'a [String],
    missing_files: &'a [String],
    extra_files: &'a [String],
}

/// Candidato a resolución de tags: paquete con al menos una URL github válida
/// y sin fila en `tags`.
#[derive(QueryableByName, Debug, Clone)]
pub struct ResolveCandidateRow {
    #[diesel(sql_type = Text)]
    pub groupid: String,
    #[diesel(sql_type = Text)]
    pub artifactid: String,
    #[diesel(sql_type = Text)]
    pub version: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub valid: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub valid_home: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub valid_scm_conn: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub valid_dev_conn: Option<String>,
}

impl ResolveCandidateRow {
    pub fn pkg(&self) -> PackageId {
        PackageId::new(&self.groupid, &self.artifactid, &self.version)
    }

    /// URLs válidas en el orden fijo de slots.
    pub fn valid_urls(&self) -> Vec<&str> {
        [self.valid.as_deref(), self.valid_home.as_deref(), self.valid_scm_conn.as_deref(), self.valid_dev_conn.as_deref()]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Candidato a build: paquete con tag resuelto, timestamp de output y sin
/// builds previas. Join de `tags` y `packages`.
#[derive(QueryableByName, Debug, Clone)]
pub struct BuildCandidateRow {
    #[diesel(sql_type = Text)]
    pub groupid: String,
    #[diesel(sql_type = Text)]
    pub artifactid: String,
    #[diesel(sql_type = Text)]
    pub version: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub tag_name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub release_tag_name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub url: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub java_version_manifest_2: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub java_version_manifest_3: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub compiler_version_source: Option<String>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    pub lastmodified: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<Bool>)]
    pub line_ending_lf: Option<bool>,
    #[diesel(sql_type = Nullable<Bool>)]
    pub line_ending_crlf: Option<bool>,
    #[diesel(sql_type = Nullable<Bool>)]
    pub line_ending_inconsistent_in_file: Option<bool>,
}

impl BuildCandidateRow {
    pub fn pkg(&self) -> PackageId {
        PackageId::new(&self.groupid, &self.artifactid, &self.version)
    }
}

/// Parámetros para recrear una build puntual por `build_id` (debugging).
#[derive(QueryableByName, Debug, Clone)]
pub struct BuildParamsRow {
    #[diesel(sql_type = Text)]
    pub groupid: String,
    #[diesel(sql_type = Text)]
    pub artifactid: String,
    #[diesel(sql_type = Text)]
    pub version: String,
    #[diesel(sql_type = Text)]
    pub jdk: String,
    #[diesel(sql_type = Text)]
    pub newline: String,
    #[diesel(sql_type = Text)]
    pub tool: String,
    #[diesel(sql_type = Text)]
    pub command: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub tag_name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub url: Option<String>,
}

/// Repositorio estrecho sobre el warehouse. Todas las etapas del pipeline
/// leen y escriben exclusivamente a través de esta fachada.
pub struct Warehouse<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> Warehouse<P> {
    pub fn new(provider: P) -> Self {
        Warehouse { provider }
    }

    // ---- etapa de extracción ----

    /// URLs crudas de un campo de `packages` (no vacías), con su coordenada.
    pub fn package_urls(&self, slot: UrlSlot) -> Result<Vec<(PackageId, String)>, PersistenceError> {
        let rows: Vec<(String, String, String, Option<String>)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            let query = match slot {
                UrlSlot::Scm => packages::table.select((packages::groupid, packages::artifactid, packages::version, packages::scm_url))
                                               .filter(packages::scm_url.is_not_null())
                                               .load(&mut conn),
                UrlSlot::Homepage => packages::table.select((packages::groupid, packages::artifactid, packages::version, packages::homepage_url))
                                                    .filter(packages::homepage_url.is_not_null())
                                                    .load(&mut conn),
                UrlSlot::ScmConn => packages::table.select((packages::groupid, packages::artifactid, packages::version, packages::scm_conn_url))
                                                   .filter(packages::scm_conn_url.is_not_null())
                                                   .load(&mut conn),
                UrlSlot::DevConn => packages::table.select((packages::groupid, packages::artifactid, packages::version, packages::dev_conn_url))
                                                   .filter(packages::dev_conn_url.is_not_null())
                                                   .load(&mut conn),
            };
            query.map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter()
               .filter_map(|(g, a, v, url)| {
                   let url = url?;
                   (!url.is_empty()).then(|| (PackageId::new(&g, &a, &v), url))
               })
               .collect())
    }

    /// Upsert en lote de (url, host) de un slot en `hosts`. Una transacción
    /// por lote.
    pub fn upsert_hosts(&self, slot: UrlSlot, batch: &[(PackageId, String, String)]) -> Result<(), PersistenceError> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!("upsert_hosts slot={} n={}", slot.name(), batch.len());
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx| {
                for (pkg, url, host) in batch {
                    let triple = (hosts::groupid.eq(pkg.group_id()),
                                  hosts::artifactid.eq(pkg.artifact_id()),
                                  hosts::version.eq(pkg.version()));
                    match slot {
                        UrlSlot::Scm => {
                            diesel::insert_into(hosts::table)
                                .values((triple, hosts::url.eq(url), hosts::host.eq(host)))
                                .on_conflict((hosts::groupid, hosts::artifactid, hosts::version))
                                .do_update()
                                .set((hosts::url.eq(url), hosts::host.eq(host)))
                                .execute(tx)?;
                        }
                        UrlSlot::Homepage => {
                            diesel::insert_into(hosts::table)
                                .values((triple, hosts::url_home.eq(url), hosts::host_home.eq(host)))
                                .on_conflict((hosts::groupid, hosts::artifactid, hosts::version))
                                .do_update()
                                .set((hosts::url_home.eq(url), hosts::host_home.eq(host)))
                                .execute(tx)?;
                        }
                        UrlSlot::ScmConn => {
                            diesel::insert_into(hosts::table)
                                .values((triple, hosts::url_scm_conn.eq(url), hosts::host_scm_conn.eq(host)))
                                .on_conflict((hosts::groupid, hosts::artifactid, hosts::version))
                                .do_update()
                                .set((hosts::url_scm_conn.eq(url), hosts::host_scm_conn.eq(host)))
                                .execute(tx)?;
                        }
                        UrlSlot::DevConn => {
                            diesel::insert_into(hosts::table)
                                .values((triple, hosts::url_dev_conn.eq(url), hosts::host_dev_conn.eq(host)))
                                .on_conflict((hosts::groupid, hosts::artifactid, hosts::version))
                                .do_update()
                                .set((hosts::url_dev_conn.eq(url), hosts::host_dev_conn.eq(host)))
                                .execute(tx)?;
                        }
                    }
                }
                Ok::<(), diesel::result::Error>(())
            })
            .map_err(PersistenceError::from)
        })
    }

    // ---- etapa de verificación ----

    /// Filas de `hosts` aún no procesadas por el verificador. Un rerun queda
    /// en no-op porque las procesadas no vuelven a aparecer.
    pub fn unprocessed_hosts(&self) -> Result<Vec<HostRow>, PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            hosts::table.filter(hosts::processed.eq(false))
                        .order(hosts::url.asc())
                        .load(&mut conn)
                        .map_err(PersistenceError::from)
        })
    }

    /// Escribe la URL válida de un slot (el verificador encontró un transform
    /// cuyo probe respondió).
    pub fn set_slot_valid(&self, pkg: &PackageId, slot: UrlSlot, valid_url: &str) -> Result<(), PersistenceError> {
        debug!("set_slot_valid pkg={pkg} slot={} url={valid_url}", slot.name());
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            let target = hosts::table.filter(hosts::groupid.eq(pkg.group_id()))
                                     .filter(hosts::artifactid.eq(pkg.artifact_id()))
                                     .filter(hosts::version.eq(pkg.version()));
            let n = match slot {
                UrlSlot::Scm => diesel::update(target).set(hosts::valid.eq(valid_url)).execute(&mut conn),
                UrlSlot::Homepage => diesel::update(target).set(hosts::valid_home.eq(valid_url)).execute(&mut conn),
                UrlSlot::ScmConn => diesel::update(target).set(hosts::valid_scm_conn.eq(valid_url)).execute(&mut conn),
                UrlSlot::DevConn => diesel::update(target).set(hosts::valid_dev_conn.eq(valid_url)).execute(&mut conn),
            }.map_err(PersistenceError::from)?;
            if n == 0 {
                return Err(PersistenceError::NotFound);
            }
            Ok(())
        })
    }

    /// Marca el paquete como procesado (exactamente una vez por run).
    pub fn mark_processed(&self, pkg: &PackageId) -> Result<(), PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(hosts::table.filter(hosts::groupid.eq(pkg.group_id()))
                                       .filter(hosts::artifactid.eq(pkg.artifact_id()))
                                       .filter(hosts::version.eq(pkg.version())))
                .set(hosts::processed.eq(true))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(PersistenceError::from)
        })
    }

    /// Append-only al log de errores de diagnóstico.
    pub fn insert_error(&self, pkg: &PackageId, url: Option<&str>, message: &str) -> Result<(), PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(errors::table)
                .values(NewErrorRow { groupid: pkg.group_id(),
                                      artifactid: pkg.artifact_id(),
                                      version: pkg.version(),
                                      url,
                                      error: message })
                .execute(&mut conn)
                .map(|_| ())
                .map_err(PersistenceError::from)
        })
    }

    // ---- etapa de resolución de tags ----

    /// Paquetes con al menos una URL github válida y sin fila en `tags`. El
    /// NOT EXISTS es lo que hace resumible la etapa.
    pub fn resolve_candidates(&self) -> Result<Vec<ResolveCandidateRow>, PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::sql_query(
                "SELECT h.groupid, h.artifactid, h.version, \
                        h.valid, h.valid_home, h.valid_scm_conn, h.valid_dev_conn \
                 FROM hosts AS h \
                 WHERE (h.valid LIKE '%github.com%' \
                        OR h.valid_home LIKE '%github.com%' \
                        OR h.valid_scm_conn LIKE '%github.com%' \
                        OR h.valid_dev_conn LIKE '%github.com%') \
                   AND NOT EXISTS (SELECT 1 FROM tags AS t \
                                   WHERE t.groupid = h.groupid \
                                     AND t.artifactid = h.artifactid \
                                     AND t.version = h.version)",
            )
            .load(&mut conn)
            .map_err(PersistenceError::from)
        })
    }

    /// Upsert idempotente de la fila de tags (a lo sumo una por paquete).
    pub fn upsert_tag(&self, row: &NewTagRow<'_>) -> Result<(), PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(tags::table)
                .values(row)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .map(|_| ())
                .map_err(PersistenceError::from)
        })
    }

    // ---- etapa de builds ----

    /// Paquetes construibles: tag resuelto + URL + output timestamp, sin
    /// builds previas.
    pub fn build_candidates(&self) -> Result<Vec<BuildCandidateRow>, PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::sql_query(
                "SELECT t.groupid, t.artifactid, t.version, t.tag_name, t.release_tag_name, t.url, \
                        p.java_version_manifest_2, p.java_version_manifest_3, p.compiler_version_source, \
                        p.lastmodified, p.line_ending_lf, p.line_ending_crlf, p.line_ending_inconsistent_in_file \
                 FROM tags AS t \
                 JOIN packages AS p ON t.groupid = p.groupid \
                                   AND t.artifactid = p.artifactid \
                                   AND t.version = p.version \
                 WHERE p.output_timestamp_prop IS NOT NULL \
                   AND t.url IS NOT NULL \
                   AND NOT EXISTS (SELECT 1 FROM builds AS b \
                                   WHERE b.groupid = t.groupid \
                                     AND b.artifactid = t.artifactid \
                                     AND b.version = t.version)",
            )
            .load(&mut conn)
            .map_err(PersistenceError::from)
        })
    }

    /// Inserta un intento de build. La constraint única
    /// (paquete, jdk, newline, tool, from_existing) hace el rerun idempotente:
    /// en conflicto no hay fila nueva y se devuelve `None`.
    pub fn insert_build(&self,
                        spec: &BuildSpec,
                        result: &BuildResult,
                        from_existing: bool)
                        -> Result<Option<i32>, PersistenceError> {
        debug!("insert_build pkg={} jdk={} newline={} from_existing={from_existing}",
               spec.pkg, spec.jdk, spec.newline);
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(builds::table)
                .values(NewBuildRow { groupid: spec.pkg.group_id(),
                                      artifactid: spec.pkg.artifact_id(),
                                      version: spec.pkg.version(),
                                      jdk: &spec.jdk,
                                      newline: spec.newline.as_str(),
                                      tool: &spec.tool,
                                      from_existing,
                                      build_success: Some(result.build_success),
                                      stdout: Some(&result.stdout),
                                      stderr: Some(&result.stderr),
                                      ok_files: result.ok_files.as_deref(),
                                      ko_files: result.ko_files.as_deref(),
                                      command: &spec.command })
                .on_conflict_do_nothing()
                .returning(builds::build_id)
                .get_result::<i32>(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })
    }

    /// Parámetros completos de una build persistida (join con su tag), para
    /// recrearla por id.
    pub fn build_params(&self, build_id: i32) -> Result<Option<BuildParamsRow>, PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::sql_query(
                "SELECT b.groupid, b.artifactid, b.version, b.jdk, b.newline, b.tool, b.command, \
                        t.tag_name, t.url \
                 FROM builds AS b \
                 JOIN tags AS t ON b.groupid = t.groupid \
                               AND b.artifactid = t.artifactid \
                               AND b.version = t.version \
                 WHERE b.build_id = $1",
            )
            .bind::<diesel::sql_types::Int4, _>(build_id)
            .get_result(&mut conn)
            .optional()
            .map_err(PersistenceError::from)
        })
    }

    // ---- etapa de comparación ----

    /// Persiste el diff de miembros de un archive no reproducible.
    pub fn insert_jar_repr(&self,
                           build_id: i32,
                           archive: &str,
                           hash_mismatches: &[String],
                           missing_files: &[String],
                           extra_files: &[String])
                           -> Result<(), PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(jar_reproducibility::table)
                .values(NewJarReprRow { build_id, archive, hash_mismatches, missing_files, extra_files })
                .execute(&mut conn)
                .map(|_| ())
                .map_err(PersistenceError::from)
        })
    }
}
