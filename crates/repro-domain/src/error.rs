//! Errores del dominio (puros, sin IO).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DomainError {
    #[error("URL no parseable: {0}")]
    UnparseableUrl(String),
    #[error("version JDK no reconocida: {0}")]
    UnknownJdkVersion(String),
    #[error("error de validación: {0}")]
    ValidationError(String),
}
