//! Comparación de archivos empaquetados miembro a miembro.
//!
//! Para cada jar no reproducible el reporte del driver deja una línea
//! `# diffoscope <referencia> <actual>` con paths relativos al buildcache.
//! Acá se abren ambos zips, se digiere cada miembro con SHA-512 y se
//! clasifica la divergencia en mismatches, faltantes y sobrantes. El digest
//! por miembro es lo que vuelve accionable el veredicto binario del driver.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use repro_domain::buildspec::BuildResult;
use repro_domain::package::PackageId;
use repro_persistence::pg::{ConnectionProvider, Warehouse};
use sha2::{Digest, Sha512};

use crate::error::PipelineError;

/// Clasificación de un par (referencia, actual) de un mismo archivo.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ArchiveDiff {
    pub hash_mismatches: Vec<String>,
    pub missing_files: Vec<String>,
    pub extra_files: Vec<String>,
}

impl ArchiveDiff {
    pub fn is_clean(&self) -> bool {
        self.hash_mismatches.is_empty() && self.missing_files.is_empty() && self.extra_files.is_empty()
    }
}

pub struct ArtifactComparator<'a, P: ConnectionProvider> {
    warehouse: &'a Warehouse<P>,
}

impl<'a, P: ConnectionProvider> ArtifactComparator<'a, P> {
    pub fn new(warehouse: &'a Warehouse<P>) -> Self {
        ArtifactComparator { warehouse }
    }

    /// Compara todos los jars divergentes de una build y persiste una fila
    /// por archivo. Archivos sin línea diffoscope o ausentes en disco dejan
    /// fila en `errors` y no cortan el resto.
    pub fn compare(&self,
                   pkg: &PackageId,
                   build_id: i32,
                   report_path: &Path,
                   result: &BuildResult)
                   -> Result<usize, PipelineError> {
        let mut compared = 0;
        for archive in result.non_reproducible_jars() {
            let Some((reference, actual)) = diffoscope_paths(report_path, pkg, archive)? else {
                warn!("comparador: {pkg} sin línea diffoscope para {archive}");
                self.warehouse
                    .insert_error(pkg, None, "(COMPARADOR) reporte sin línea diffoscope para el archivo")?;
                continue;
            };
            let diff = match compare_archives(&reference, &actual) {
                Ok(d) => d,
                Err(e @ (PipelineError::Io(_) | PipelineError::Archive(_))) => {
                    warn!("comparador: {pkg} no pudo abrir {archive}: {e}");
                    self.warehouse
                        .insert_error(pkg, None, "(COMPARADOR) archivo del buildcache ausente o ilegible")?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            debug!("comparador: {archive} mismatches={} missing={} extra={}",
                   diff.hash_mismatches.len(),
                   diff.missing_files.len(),
                   diff.extra_files.len());
            self.warehouse
                .insert_jar_repr(build_id, archive, &diff.hash_mismatches, &diff.missing_files, &diff.extra_files)?;
            compared += 1;
        }
        info!("comparador: {pkg} build {build_id}: {compared} archivos comparados");
        Ok(compared)
    }
}

/// Paths (referencia, actual) del archivo, extraídos de la línea diffoscope
/// del reporte y resueltos bajo `buildcache/<artifactid>/`.
pub fn diffoscope_paths(report_path: &Path,
                        pkg: &PackageId,
                        archive: &str)
                        -> Result<Option<(PathBuf, PathBuf)>, PipelineError> {
    let base = report_path.parent()
                          .ok_or_else(|| PipelineError::Report(format!("reporte sin directorio: {}",
                                                                       report_path.display())))?
                          .join("buildcache")
                          .join(pkg.artifact_id());
    let content = std::fs::read_to_string(report_path)?;
    for line in content.lines() {
        if !line.starts_with("# diffoscope ") || !line.contains(archive) {
            continue;
        }
        let parts: Vec<&str> = line.trim().split(' ').collect();
        if parts.len() < 4 {
            return Err(PipelineError::Report(format!("línea diffoscope malformada: {line}")));
        }
        return Ok(Some((base.join(parts[2]), base.join(parts[3]))));
    }
    Ok(None)
}

/// Digiere y clasifica los miembros de ambos zips. La referencia manda: sus
/// miembros ausentes en el actual son `missing`, los del actual que la
/// referencia no tiene son `extra`.
pub fn compare_archives(reference: &Path, actual: &Path) -> Result<ArchiveDiff, PipelineError> {
    let reference_hashes = member_digests(reference)?;
    let actual_hashes = member_digests(actual)?;

    let mut diff = ArchiveDiff::default();
    for (name, digest) in &reference_hashes {
        match actual_hashes.get(name) {
            None => diff.missing_files.push(name.clone()),
            Some(other) if other != digest => diff.hash_mismatches.push(name.clone()),
            Some(_) => {}
        }
    }
    for name in actual_hashes.keys() {
        if !reference_hashes.contains_key(name) {
            diff.extra_files.push(name.clone());
        }
    }
    Ok(diff)
}

/// SHA-512 del contenido de cada miembro no-directorio, por nombre.
fn member_digests(path: &Path) -> Result<BTreeMap<String, Vec<u8>>, PipelineError> {
    let file = BufReader::new(File::open(path)?);
    let mut zip = zip::ZipArchive::new(file)?;
    let mut digests = BTreeMap::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let mut hasher = Sha512::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        digests.insert(entry.name().to_string(), hasher.finalize().to_vec());
    }
    Ok(digests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in members {
            writer.start_file(*name, SimpleFileOptions::default()).expect("start member");
            writer.write_all(content).expect("write member");
        }
        writer.finish().expect("finish zip");
    }

    #[test]
    fn identical_archives_are_clean() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let a = tmp.path().join("ref.jar");
        let b = tmp.path().join("act.jar");
        write_zip(&a, &[("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"), ("x/Y.class", b"\xca\xfe")]);
        write_zip(&b, &[("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"), ("x/Y.class", b"\xca\xfe")]);
        assert!(compare_archives(&a, &b).expect("compare").is_clean());
    }

    #[test]
    fn member_sets_classify_missing_and_extra() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reference = tmp.path().join("ref.jar");
        let actual = tmp.path().join("act.jar");
        write_zip(&reference, &[("A", b"same"), ("B", b"only in reference")]);
        write_zip(&actual, &[("A", b"same"), ("C", b"only in actual")]);

        let diff = compare_archives(&reference, &actual).expect("compare");
        assert_eq!(diff.missing_files, vec!["B"]);
        assert_eq!(diff.extra_files, vec!["C"]);
        assert!(diff.hash_mismatches.is_empty());
    }

    #[test]
    fn differing_content_is_a_hash_mismatch() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reference = tmp.path().join("ref.jar");
        let actual = tmp.path().join("act.jar");
        write_zip(&reference, &[("x/Y.class", b"v1")]);
        write_zip(&actual, &[("x/Y.class", b"v2")]);

        let diff = compare_archives(&reference, &actual).expect("compare");
        assert_eq!(diff.hash_mismatches, vec!["x/Y.class"]);
        assert!(diff.missing_files.is_empty());
        assert!(diff.extra_files.is_empty());
    }

    #[test]
    fn diffoscope_line_resolves_under_buildcache() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let report = tmp.path().join("gherkin-26.2.0.buildcompare");
        std::fs::write(&report,
                       "ok=0\n# diffoscope reference/gherkin-26.2.0.jar gherkin-26.2.0.jar\n")
            .expect("write");
        let pkg = PackageId::new("io.cucumber", "gherkin", "26.2.0");

        let (reference, actual) = diffoscope_paths(&report, &pkg, "gherkin-26.2.0.jar").expect("ok")
                                                                                       .expect("found");
        assert!(reference.ends_with("buildcache/gherkin/reference/gherkin-26.2.0.jar"));
        assert!(actual.ends_with("buildcache/gherkin/gherkin-26.2.0.jar"));

        // archivo que el reporte no menciona
        assert!(diffoscope_paths(&report, &pkg, "otro.jar").expect("ok").is_none());
    }
}
