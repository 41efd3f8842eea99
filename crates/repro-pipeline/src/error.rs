//! Errores de las etapas del pipeline.
//!
//! Política de propagación: ninguno de estos errores cruza el límite de un
//! paquete dentro de un batch; los loops los convierten en filas de `errors`
//! más un log y continúan. Sólo los chequeos de configuración de arranque
//! abortan el proceso.

use thiserror::Error;

use repro_domain::DomainError;
use repro_persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),
    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http transport: {0}")]
    Http(String),
    #[error("respuesta malformada: {0}")]
    MalformedResponse(String),
    #[error("archive: {0}")]
    Archive(String),
    #[error("reporte de build: {0}")]
    Report(String),
    #[error("falta prerequisito: {0}")]
    MissingPrerequisite(String),
    #[error("configuración inválida: {0}")]
    Misconfiguration(String),
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Http(e.to_string())
    }
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(e: zip::result::ZipError) -> Self {
        PipelineError::Archive(e.to_string())
    }
}
