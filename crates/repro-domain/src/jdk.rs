//! Selección de versiones JDK plausibles para una build reproducible.
//!
//! Prioridad estricta:
//! 1. JDK de build declarado en el manifest (`Build-Jdk`),
//! 2. indicador parseado de string (system property / source level),
//! 3. toda versión LTS ya publicada a la fecha de publicación del paquete
//!    (tabla histórica de GA), con piso en el source level cuando existe.

use chrono::NaiveDate;

use crate::error::DomainError;

/// Fechas GA de los JDK mayores considerados LTS por este pipeline. Se incluye
/// 7 porque el corpus histórico de Maven Central lo requiere aunque Oracle no
/// lo etiquetara formalmente como LTS.
const LTS_RELEASES: &[(u32, (i32, u32, u32))] = &[(7, (2011, 7, 28)),
                                                  (8, (2014, 3, 18)),
                                                  (11, (2018, 9, 25)),
                                                  (17, (2021, 9, 14)),
                                                  (21, (2023, 9, 19)),];

/// Extrae la versión mayor de un string de versión JDK.
/// `"1.8.0_292"` -> `8`, `"17.0.1"` -> `17`, `"11"` -> `11`.
pub fn parse_major(version: &str) -> Result<u32, DomainError> {
    let trimmed = version.trim();
    if trimmed.is_empty() {
        return Err(DomainError::UnknownJdkVersion(version.to_string()));
    }
    let mut components = trimmed.split(['.', '_', '+', '-']);
    let first = components.next()
                          .and_then(|c| c.parse::<u32>().ok())
                          .ok_or_else(|| DomainError::UnknownJdkVersion(version.to_string()))?;
    if first == 1 {
        // esquema legacy 1.x
        components.next()
                  .and_then(|c| c.parse::<u32>().ok())
                  .ok_or_else(|| DomainError::UnknownJdkVersion(version.to_string()))
    } else {
        Ok(first)
    }
}

/// Versiones LTS publicadas a la fecha dada, con piso opcional en el source
/// level (no tiene sentido compilar con un JDK menor al target declarado).
pub fn lts_candidates(publish_date: NaiveDate, floor: Option<u32>) -> Vec<String> {
    let floor = floor.unwrap_or(0);
    LTS_RELEASES.iter()
                .filter_map(|(major, (y, m, d))| {
                    let ga = NaiveDate::from_ymd_opt(*y, *m, *d)?;
                    (*major >= floor && ga <= publish_date).then(|| major.to_string())
                })
                .collect()
}

/// Aplica la prioridad completa de selección. `build_jdk` viene del manifest,
/// `property_jdk` de un system property capturado, `source_level` del target
/// de compilación, `publish_date` del índice del registro.
pub fn select_jdks(build_jdk: Option<&str>,
                   property_jdk: Option<&str>,
                   source_level: Option<&str>,
                   publish_date: Option<NaiveDate>)
                   -> Vec<String> {
    if let Some(v) = build_jdk.and_then(|v| parse_major(v).ok()) {
        return vec![v.to_string()];
    }
    if let Some(v) = property_jdk.and_then(|v| parse_major(v).ok()) {
        return vec![v.to_string()];
    }
    match publish_date {
        Some(date) => {
            let floor = source_level.and_then(|v| parse_major(v).ok());
            lts_candidates(date, floor)
        }
        None => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn legacy_and_modern_version_strings() {
        assert_eq!(parse_major("1.8").unwrap(), 8);
        assert_eq!(parse_major("1.8.0_292").unwrap(), 8);
        assert_eq!(parse_major("17.0.1").unwrap(), 17);
        assert_eq!(parse_major("11").unwrap(), 11);
        assert!(parse_major("").is_err());
        assert!(parse_major("garbage").is_err());
    }

    #[test]
    fn manifest_declared_jdk_wins() {
        let jdks = select_jdks(Some("17"), Some("1.8"), Some("1.7"), Some(date(2022, 1, 1)));
        assert_eq!(jdks, vec!["17"]);
    }

    #[test]
    fn property_jdk_used_when_no_manifest() {
        let jdks = select_jdks(None, Some("1.8"), None, Some(date(2022, 1, 1)));
        assert_eq!(jdks, vec!["8"]);
    }

    #[test]
    fn lts_list_filtered_by_publish_date_and_source_floor() {
        // Publicado 2016-01-01 con source level 7: 8 ya salió, 11/17/21 no.
        let jdks = select_jdks(None, None, Some("7"), Some(date(2016, 1, 1)));
        assert_eq!(jdks, vec!["7", "8"]);
    }

    #[test]
    fn lts_list_without_floor() {
        let jdks = lts_candidates(date(2019, 1, 1), None);
        assert_eq!(jdks, vec!["7", "8", "11"]);
    }

    #[test]
    fn no_hints_no_date_yields_empty() {
        assert!(select_jdks(None, None, None, None).is_empty());
    }
}
