//! Objetos de valor de una build reproducible.
//!
//! `BuildSpec` determina por completo un intento de build; `BuildResult`
//! captura el desenlace del driver externo. Ninguno persiste por sí solo: la
//! capa de persistencia los junta en una fila de `builds`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::package::PackageId;

/// Convención de fin de línea con la que se hace el checkout del source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Newline {
    Lf,
    Crlf,
}

impl Newline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Newline::Lf => "lf",
            Newline::Crlf => "crlf",
        }
    }

    /// Candidatos según las pistas de line-ending extraídas del artifact
    /// publicado. Solo cuando exactamente una de las dos pistas es positiva y
    /// no hay flag de inconsistencia se reduce a una; en cualquier otro caso
    /// se prueban ambas.
    pub fn candidates(has_lf: Option<bool>, has_crlf: Option<bool>, inconsistent: Option<bool>) -> Vec<Newline> {
        let lf = has_lf.unwrap_or(false);
        let crlf = has_crlf.unwrap_or(false);
        let inconsistent = inconsistent.unwrap_or(false);
        if !inconsistent && lf != crlf {
            if lf { vec![Newline::Lf] } else { vec![Newline::Crlf] }
        } else {
            vec![Newline::Lf, Newline::Crlf]
        }
    }
}

impl fmt::Display for Newline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Newline {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lf" => Ok(Newline::Lf),
            "crlf" => Ok(Newline::Crlf),
            other => Err(crate::DomainError::ValidationError(format!("newline desconocido: {other}"))),
        }
    }
}

/// Receta completa de una build: paquete + toolchain + convención de newline +
/// comando. Valor inmutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub pkg: PackageId,
    pub tool: String,
    pub jdk: String,
    pub newline: Newline,
    pub command: String,
}

impl BuildSpec {
    pub fn new(pkg: PackageId, tool: &str, jdk: &str, newline: Newline, command: &str) -> Self {
        BuildSpec { pkg,
                    tool: tool.to_string(),
                    jdk: jdk.to_string(),
                    newline,
                    command: command.to_string() }
    }
}

/// Resultado crudo de una invocación del driver de build.
///
/// `build_success = false` con listas `None` significa que el driver nunca
/// produjo su reporte (crash o setup fallido); listas vacías significan que el
/// reporte existió pero no reportó archivos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub build_success: bool,
    pub stdout: String,
    pub stderr: String,
    pub ok_files: Option<Vec<String>>,
    pub ko_files: Option<Vec<String>>,
}

impl BuildResult {
    pub fn failed(stdout: String, stderr: String) -> Self {
        BuildResult { build_success: false,
                      stdout,
                      stderr,
                      ok_files: None,
                      ko_files: None }
    }

    /// Archivos no reproducibles con extensión de archivo binario empaquetado.
    /// Dispara la comparación de miembros (etapa 5) sólo para estos.
    pub fn non_reproducible_jars(&self) -> Vec<&str> {
        self.ko_files
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|s| s.as_str())
            .filter(|f| f.ends_with(".jar"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_single_hint() {
        assert_eq!(Newline::candidates(Some(true), Some(false), Some(false)), vec![Newline::Lf]);
        assert_eq!(Newline::candidates(Some(false), Some(true), None), vec![Newline::Crlf]);
    }

    #[test]
    fn newline_ambiguous_hints_try_both() {
        assert_eq!(Newline::candidates(Some(true), Some(true), Some(false)),
                   vec![Newline::Lf, Newline::Crlf]);
        assert_eq!(Newline::candidates(None, None, None), vec![Newline::Lf, Newline::Crlf]);
        // inconsistencia anula la pista única
        assert_eq!(Newline::candidates(Some(true), Some(false), Some(true)),
                   vec![Newline::Lf, Newline::Crlf]);
    }

    #[test]
    fn jar_filter_on_ko_files() {
        let result = BuildResult { build_success: true,
                                   stdout: String::new(),
                                   stderr: String::new(),
                                   ok_files: Some(vec!["a.pom".into()]),
                                   ko_files: Some(vec!["out.jar".into(), "meta.xml".into(), "b.jar".into()]) };
        assert_eq!(result.non_reproducible_jars(), vec!["out.jar", "b.jar"]);
        assert!(BuildResult::failed(String::new(), String::new()).non_reproducible_jars().is_empty());
    }
}
