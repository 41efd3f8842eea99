//! Recetas de build: plantillas, buildspecs publicados y reportes.
//!
//! Un buildspec es un archivo bash de asignaciones `key=value` (valores
//! usualmente entre comillas dobles). Acá se parsea estructuralmente, nunca
//! re-ejecutando el archivo por un shell: sólo interesan las asignaciones de
//! primer nivel y el formato publicado es estable.
//!
//! El reporte `.buildcompare` que deja el driver usa el mismo formato, con
//! `okFiles`/`koFiles` como listas separadas por espacios dentro de comillas.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use repro_domain::buildspec::{BuildResult, BuildSpec};
use repro_domain::package::PackageId;

use crate::error::PipelineError;

/// Sustitución `{{key}}` sobre un mapa plano. Claves ausentes quedan tal cual
/// en el texto (delata un template desactualizado en vez de esconderlo).
pub fn render_template(template: &str, values: &BTreeMap<&str, &str>) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Busca un buildspec ya publicado bajo `content_dir`, probando las dos
/// convenciones de path en orden fijo. Gana el primer archivo existente.
pub fn find_existing_buildspec(content_dir: &Path, pkg: &PackageId) -> Option<PathBuf> {
    let group_path = pkg.group_as_path();
    let file_name = format!("{}-{}.buildspec", pkg.artifact_id(), pkg.version());
    let candidates = [content_dir.join(&group_path).join(pkg.artifact_id()).join(&file_name),
                      content_dir.join(&group_path).join(&file_name)];
    candidates.into_iter().find(|p| p.is_file())
}

/// Parsea las asignaciones de un buildspec renderizado. Falla si falta
/// cualquiera de los siete campos obligatorios.
pub fn parse_buildspec(path: &Path) -> Result<BuildSpec, PipelineError> {
    let content = fs::read_to_string(path)?;
    let map = parse_assignments(&content);
    let field = |key: &str| {
        map.get(key)
           .cloned()
           .ok_or_else(|| PipelineError::Report(format!("buildspec sin campo {key}: {}", path.display())))
    };
    let pkg = PackageId::new(&field("groupId")?, &field("artifactId")?, &field("version")?);
    let newline = repro_domain::buildspec::Newline::from_str(&field("newline")?)
        .map_err(|e| PipelineError::Report(e.to_string()))?;
    Ok(BuildSpec::new(pkg, &field("tool")?, &field("jdk")?, newline, &field("command")?))
}

/// Reporte `.buildcompare` hermano del buildspec, si el driver dejó uno.
pub fn find_sibling_report(buildspec_path: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let dir = buildspec_path.parent()
                            .ok_or_else(|| PipelineError::Report(format!("buildspec sin directorio: {}",
                                                                         buildspec_path.display())))?;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("buildcompare") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Convierte el desenlace del driver en un `BuildResult`.
///
/// Sin reporte la build se considera fallida con listas nulas; con reporte,
/// exitosa aunque las listas vengan vacías (el reporte es la evidencia de que
/// el driver llegó al final).
pub fn result_from_report(report: Option<&Path>, stdout: String, stderr: String) -> Result<BuildResult, PipelineError> {
    let report = match report {
        Some(r) => r,
        None => return Ok(BuildResult::failed(stdout, stderr)),
    };
    let content = match fs::read_to_string(report) {
        Ok(c) => c,
        Err(_) => return Ok(BuildResult::failed(stdout, stderr)),
    };
    let map = parse_assignments(&content);
    let files = |key: &str| -> Option<Vec<String>> {
        map.get(key)
           .map(|v| v.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect())
    };
    Ok(BuildResult { build_success: true,
                     stdout,
                     stderr,
                     ok_files: files("okFiles"),
                     ko_files: files("koFiles") })
}

/// Asignaciones `key=value` de primer nivel, comillas externas removidas.
/// Los contadores `ok`/`ko` del reporte se descartan (derivables de las
/// listas). Líneas sin `=` se ignoran.
fn parse_assignments(content: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key == "ok" || key == "ko" {
            continue;
        }
        let value = value.trim().trim_matches('"');
        map.insert(key.to_string(), value.to_string());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use repro_domain::buildspec::Newline;
    use std::io::Write;

    #[test]
    fn template_substitution_leaves_unknown_keys() {
        let values: BTreeMap<&str, &str> =
            [("groupId", "io.cucumber"), ("artifactId", "gherkin"), ("version", "26.2.0")].into_iter().collect();
        let rendered = render_template("groupId={{groupId}}\nartifactId={{artifactId}}\nv={{version}} x={{missing}}",
                                       &values);
        assert_eq!(rendered, "groupId=io.cucumber\nartifactId=gherkin\nv=26.2.0 x={{missing}}");
    }

    #[test]
    fn existing_buildspec_prefers_artifact_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pkg = PackageId::new("com.example.lib", "widget", "1.0.0");

        let nested = tmp.path().join("com/example/lib/widget");
        std::fs::create_dir_all(&nested).expect("mkdir");
        let flat_dir = tmp.path().join("com/example/lib");
        std::fs::write(nested.join("widget-1.0.0.buildspec"), "a").expect("write");
        std::fs::write(flat_dir.join("widget-1.0.0.buildspec"), "b").expect("write");

        let found = find_existing_buildspec(tmp.path(), &pkg).expect("found");
        assert!(found.ends_with("com/example/lib/widget/widget-1.0.0.buildspec"));

        // sin la variante anidada cae a la plana
        std::fs::remove_file(nested.join("widget-1.0.0.buildspec")).expect("rm");
        let found = find_existing_buildspec(tmp.path(), &pkg).expect("found flat");
        assert!(found.ends_with("com/example/lib/widget-1.0.0.buildspec"));

        std::fs::remove_file(flat_dir.join("widget-1.0.0.buildspec")).expect("rm");
        assert!(find_existing_buildspec(tmp.path(), &pkg).is_none());
    }

    #[test]
    fn buildspec_parse_reads_quoted_assignments() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("gherkin-26.2.0.buildspec");
        let mut f = std::fs::File::create(&path).expect("create");
        writeln!(f, "#!/bin/bash").expect("write");
        writeln!(f, "groupId=io.cucumber").expect("write");
        writeln!(f, "artifactId=gherkin").expect("write");
        writeln!(f, "version=\"26.2.0\"").expect("write");
        writeln!(f, "gitRepo=https://github.com/cucumber/gherkin.git").expect("write");
        writeln!(f, "tool=mvn-3.9.2").expect("write");
        writeln!(f, "jdk=11").expect("write");
        writeln!(f, "newline=lf").expect("write");
        writeln!(f, "command=\"mvn -Papache-release clean package\"").expect("write");
        drop(f);

        let spec = parse_buildspec(&path).expect("parse");
        assert_eq!(spec.pkg.to_string(), "io.cucumber:gherkin:26.2.0");
        assert_eq!(spec.tool, "mvn-3.9.2");
        assert_eq!(spec.jdk, "11");
        assert_eq!(spec.newline, Newline::Lf);
        assert_eq!(spec.command, "mvn -Papache-release clean package");
    }

    #[test]
    fn buildspec_parse_rejects_missing_field() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("incomplete.buildspec");
        std::fs::write(&path, "groupId=a\nartifactId=b\nversion=1\n").expect("write");
        assert!(parse_buildspec(&path).is_err());
    }

    #[test]
    fn report_parse_splits_quoted_file_lists() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let report = tmp.path().join("gherkin-26.2.0.buildcompare");
        std::fs::write(&report,
                       "version=26.2.0\nok=1\nko=2\nokFiles=\"gherkin-26.2.0.pom\"\nkoFiles=\"gherkin-26.2.0.jar gherkin-26.2.0-sources.jar\"\n")
            .expect("write");

        let result = result_from_report(Some(&report), "out".into(), "err".into()).expect("parse");
        assert!(result.build_success);
        assert_eq!(result.ok_files.as_deref(), Some(&["gherkin-26.2.0.pom".to_string()][..]));
        assert_eq!(result.ko_files.as_deref().map(|f| f.len()), Some(2));
        assert_eq!(result.non_reproducible_jars(),
                   vec!["gherkin-26.2.0.jar", "gherkin-26.2.0-sources.jar"]);
    }

    #[test]
    fn missing_report_means_failed_build() {
        let result = result_from_report(None, "out".into(), "err".into()).expect("ok");
        assert!(!result.build_success);
        assert!(result.ok_files.is_none());
        assert!(result.ko_files.is_none());
    }

    #[test]
    fn sibling_report_lookup_by_extension() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let buildspec = tmp.path().join("x-1.0.buildspec");
        std::fs::write(&buildspec, "").expect("write");
        assert!(find_sibling_report(&buildspec).expect("ok").is_none());
        std::fs::write(tmp.path().join("x-1.0.buildcompare"), "ok=0").expect("write");
        let report = find_sibling_report(&buildspec).expect("ok").expect("found");
        assert!(report.ends_with("x-1.0.buildcompare"));
    }
}
