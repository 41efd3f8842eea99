//! Identidad de un paquete publicado.
//!
//! La tripleta (group, artifact, version) es la clave de join contra todas las
//! tablas del warehouse y entre etapas del pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordenada inmutable de un paquete publicado. Igualdad y hash son
/// estructurales sobre los tres campos.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId {
    group_id: String,
    artifact_id: String,
    version: String,
}

impl PackageId {
    pub fn new(group_id: &str, artifact_id: &str, version: &str) -> Self {
        PackageId { group_id: group_id.to_string(),
                    artifact_id: artifact_id.to_string(),
                    version: version.to_string() }
    }

    pub fn group_id(&self) -> &str { &self.group_id }
    pub fn artifact_id(&self) -> &str { &self.artifact_id }
    pub fn version(&self) -> &str { &self.version }

    /// Ruta relativa estilo repositorio Maven: los puntos del group se vuelven
    /// directorios. Usada para localizar buildspecs publicados.
    pub fn group_as_path(&self) -> String {
        self.group_id.replace('.', "/")
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}
