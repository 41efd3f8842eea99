//! Etapa de verificación de repositorios.
//!
//! Para cada paquete no procesado intenta, slot por slot, la lista priorizada
//! de transformaciones de URL; cada variante que cambió respecto de la
//! anterior se sondea con `git ls-remote <url> HEAD` bajo timeout. La primera
//! variante cuyo probe responde marca el slot como válido; si ninguna
//! responde, cada variante fallida deja una fila de error. El paquete se marca
//! `processed` exactamente una vez, haya o no slots válidos.
//!
//! Los paquetes son unidades de trabajo independientes: se reparten en un
//! pool acotado de workers (rayon) y los contadores agregados se reducen al
//! final. El probe bloquea el worker hasta el timeout; un probe vencido es
//! fallo definitivo de esa variante, no se reintenta con más tiempo.

use std::collections::HashSet;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;

use repro_domain::scmurl;
use repro_persistence::{ConnectionProvider, HostRow, UrlSlot, Warehouse};

use crate::error::PipelineError;

#[derive(Debug, Default, Clone, Copy)]
pub struct VerifyStats {
    pub processed: usize,
    pub with_valid_url: usize,
}

/// Resultado crudo de un probe de alcanzabilidad.
#[derive(Debug)]
struct ProbeOutput {
    exit_code: Option<i32>,
    stderr: String,
    timed_out: bool,
}

impl ProbeOutput {
    /// Criterio de éxito: exit 0 y stream de error vacío.
    fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0) && self.stderr.trim().is_empty()
    }
}

/// Lista las refs `HEAD` del remoto sin side effects. `GIT_TERMINAL_PROMPT=0`
/// evita que git se quede esperando credenciales en URLs privadas.
fn probe_remote(url: &str, timeout: Duration) -> std::io::Result<ProbeOutput> {
    let mut child = Command::new("git").env("GIT_TERMINAL_PROMPT", "0")
                                       .args(["ls-remote", url, "HEAD"])
                                       .stdout(Stdio::null())
                                       .stderr(Stdio::piped())
                                       .spawn()?;
    let deadline = Instant::now() + timeout;
    let exit = loop {
        match child.try_wait()? {
            Some(status) => break Some(status),
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            None => std::thread::sleep(Duration::from_millis(100)),
        }
    };

    match exit {
        None => Ok(ProbeOutput { exit_code: None, stderr: String::new(), timed_out: true }),
        Some(status) => {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            Ok(ProbeOutput { exit_code: status.code(), stderr, timed_out: false })
        }
    }
}

pub struct HostVerifier<'a, P: ConnectionProvider> {
    warehouse: &'a Warehouse<P>,
    timeout: Duration,
    workers: usize,
}

impl<'a, P: ConnectionProvider> HostVerifier<'a, P> {
    pub fn new(warehouse: &'a Warehouse<P>, timeout: Duration, workers: usize) -> Self {
        HostVerifier { warehouse, timeout, workers }
    }

    /// Corre la verificación sobre todos los paquetes pendientes. El input
    /// query excluye `processed = true`, así que un rerun es un no-op.
    pub fn verify_all(&self) -> Result<VerifyStats, PipelineError> {
        let records = self.warehouse.unprocessed_hosts()?;
        let total = records.len();
        info!("verify: {total} paquetes pendientes, {} workers", self.workers);

        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.workers)
                                                  .build()
                                                  .map_err(|e| PipelineError::Misconfiguration(e.to_string()))?;
        let stats = pool.install(|| {
            records.par_iter()
                   .map(|record| {
                       let any_valid = self.verify_package(record);
                       VerifyStats { processed: 1, with_valid_url: usize::from(any_valid) }
                   })
                   .reduce(VerifyStats::default, |a, b| VerifyStats { processed: a.processed + b.processed,
                                                                      with_valid_url: a.with_valid_url
                                                                                      + b.with_valid_url })
        });

        info!("verify: {}/{} paquetes con al menos una URL válida", stats.with_valid_url, stats.processed);
        Ok(stats)
    }

    /// Verifica los cuatro slots de un paquete. Nunca propaga: toda falla
    /// queda en el log de errores y el paquete termina procesado igual.
    fn verify_package(&self, record: &HostRow) -> bool {
        let pkg = record.pkg();
        let mut any_valid = false;

        for slot in UrlSlot::ALL {
            let Some(raw_url) = record.candidate(slot) else { continue };
            if scmurl::is_unsupported_vcs(raw_url) {
                debug!("verify: {pkg} slot={} VCS no soportado, se salta", slot.name());
                continue;
            }
            match self.verify_slot(&pkg, slot, raw_url) {
                Some(valid_url) => {
                    if let Err(e) = self.warehouse.set_slot_valid(&pkg, slot, &valid_url) {
                        warn!("verify: {pkg} no se pudo persistir slot válido: {e}");
                    } else {
                        any_valid = true;
                    }
                }
                None => {}
            }
        }

        if let Err(e) = self.warehouse.mark_processed(&pkg) {
            warn!("verify: {pkg} no se pudo marcar processed: {e}");
        }
        any_valid
    }

    /// Prueba las transformaciones en orden sobre la URL de un slot. Devuelve
    /// la primera variante cuyo probe respondió.
    fn verify_slot(&self, pkg: &repro_domain::PackageId, slot: UrlSlot, raw_url: &str) -> Option<String> {
        // reescritura previa de mirrors de forja conocidos
        let (base_url, _) = scmurl::apache_to_github(raw_url);
        let mut tried: HashSet<String> = HashSet::new();
        let mut current = base_url;

        for transform in scmurl::transform_chain() {
            let (candidate, changed) = transform(&current);
            current = candidate.clone();
            // sólo se sondea una variante que cambió y no se probó ya
            if !changed || !tried.insert(candidate.clone()) {
                continue;
            }
            debug!("verify: {pkg} slot={} probando {candidate}", slot.name());
            match probe_remote(&candidate, self.timeout) {
                Ok(out) if out.succeeded() => {
                    debug!("verify: {pkg} slot={} válido en {candidate}", slot.name());
                    return Some(candidate);
                }
                Ok(out) => {
                    let reason = if out.timed_out {
                        format!("(VERIFIER) timeout tras {}s", self.timeout.as_secs())
                    } else {
                        format!("(VERIFIER) exit={:?} stderr={}", out.exit_code, out.stderr.trim())
                    };
                    let _ = self.warehouse.insert_error(pkg, Some(&candidate), &reason);
                }
                Err(e) => {
                    let _ = self.warehouse.insert_error(pkg, Some(&candidate), &format!("(VERIFIER) spawn: {e}"));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_success_criteria() {
        let ok = ProbeOutput { exit_code: Some(0), stderr: String::new(), timed_out: false };
        assert!(ok.succeeded());
        let nonzero = ProbeOutput { exit_code: Some(128), stderr: "fatal: not found".into(), timed_out: false };
        assert!(!nonzero.succeeded());
        // exit 0 pero con stderr: un remoto que redirige o avisa no cuenta
        // como válido
        let noisy = ProbeOutput { exit_code: Some(0), stderr: "warning: redirecting".into(), timed_out: false };
        assert!(!noisy.succeeded());
        let timed = ProbeOutput { exit_code: None, stderr: String::new(), timed_out: true };
        assert!(!timed.succeeded());
    }

    #[test]
    fn host_row_slot_accessors_follow_slot_order() {
        let row = HostRow { groupid: "io.cucumber".into(),
                            artifactid: "gherkin".into(),
                            version: "26.2.0".into(),
                            url: Some("scm:git:git@github.com:cucumber/gherkin.git".into()),
                            host: Some("github.com".into()),
                            valid: None,
                            url_home: Some("https://cucumber.io".into()),
                            host_home: Some("cucumber.io".into()),
                            valid_home: None,
                            url_scm_conn: None,
                            host_scm_conn: None,
                            valid_scm_conn: None,
                            url_dev_conn: None,
                            host_dev_conn: None,
                            valid_dev_conn: Some("https://github.com/cucumber/gherkin.git".into()),
                            processed: false };
        assert_eq!(row.pkg().to_string(), "io.cucumber:gherkin:26.2.0");
        assert_eq!(row.candidate(UrlSlot::Scm), Some("scm:git:git@github.com:cucumber/gherkin.git"));
        assert_eq!(row.candidate(UrlSlot::Homepage), Some("https://cucumber.io"));
        assert_eq!(row.candidate(UrlSlot::ScmConn), None);
        assert_eq!(row.valid_url(UrlSlot::Scm), None);
        assert_eq!(row.valid_url(UrlSlot::DevConn), Some("https://github.com/cucumber/gherkin.git"));
    }

    #[test]
    fn probe_of_invalid_path_fails_fast() {
        // file:// inexistente: git sale con código != 0 sin tocar la red
        let out = probe_remote("file:///nonexistent/repo/path", Duration::from_secs(10)).expect("spawn git");
        assert!(!out.succeeded());
    }
}
