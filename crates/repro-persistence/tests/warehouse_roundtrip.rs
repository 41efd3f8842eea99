//! Tests de integración del warehouse (requieren Postgres).
//!
//! Verifican:
//! - Upsert de hosts por slot y query de no-procesados.
//! - Idempotencia del insert de tags (PK) y de builds (constraint única).
//! - Append del log de errores.

use repro_domain::{BuildResult, BuildSpec, Newline, PackageId};
use repro_persistence::pg::NewTagRow;
use repro_persistence::{build_pool_from_env, PoolProvider, UrlSlot, Warehouse};

fn test_warehouse() -> Option<Warehouse<PoolProvider>> {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("Skipping warehouse test: DATABASE_URL not set");
        return None;
    }
    let pool = build_pool_from_env().expect("pool");
    Some(Warehouse::new(PoolProvider { pool }))
}

fn unique_pkg(prefix: &str) -> PackageId {
    // coordenada única por corrida para no chocar con datos previos
    let nonce = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)
                                            .unwrap()
                                            .as_nanos();
    PackageId::new(&format!("test.{prefix}.{nonce}"), "artifact", "1.0.0")
}

#[test]
fn host_upsert_verify_flow() {
    let Some(wh) = test_warehouse() else { return };
    let pkg = unique_pkg("hosts");

    wh.upsert_hosts(UrlSlot::Scm,
                    &[(pkg.clone(), "scm:git:git@github.com:o/r.git".into(), "github.com".into())])
      .expect("upsert");

    let unprocessed = wh.unprocessed_hosts().expect("query");
    let row = unprocessed.iter().find(|r| r.pkg() == pkg).expect("row present");
    assert_eq!(row.candidate(UrlSlot::Scm), Some("scm:git:git@github.com:o/r.git"));
    assert!(row.valid_url(UrlSlot::Scm).is_none());

    wh.set_slot_valid(&pkg, UrlSlot::Scm, "https://github.com/o/r.git").expect("set valid");
    wh.mark_processed(&pkg).expect("mark");

    // procesado: ya no aparece en el input query
    let unprocessed = wh.unprocessed_hosts().expect("query");
    assert!(!unprocessed.iter().any(|r| r.pkg() == pkg));
}

#[test]
fn tag_upsert_is_idempotent() {
    let Some(wh) = test_warehouse() else { return };
    let pkg = unique_pkg("tags");

    let row = NewTagRow { groupid: pkg.group_id(),
                          artifactid: pkg.artifact_id(),
                          version: pkg.version(),
                          tag_name: Some("v1.0.0"),
                          tag_commit_hash: Some("abc123"),
                          url: Some("https://github.com/o/r.git"),
                          ..Default::default() };
    wh.upsert_tag(&row).expect("insert");
    // segundo insert con otros valores: DO NOTHING, la fila original queda
    let row2 = NewTagRow { groupid: pkg.group_id(),
                           artifactid: pkg.artifact_id(),
                           version: pkg.version(),
                           tag_name: Some("v9.9.9"),
                           ..Default::default() };
    wh.upsert_tag(&row2).expect("second insert is a no-op");
}

#[test]
fn build_unique_constraint_drops_duplicates() {
    let Some(wh) = test_warehouse() else { return };
    let pkg = unique_pkg("builds");

    let spec = BuildSpec::new(pkg.clone(), "mvn", "11", Newline::Lf, "mvn clean package");
    let result = BuildResult { build_success: true,
                               stdout: "ok".into(),
                               stderr: String::new(),
                               ok_files: Some(vec!["a.pom".into()]),
                               ko_files: Some(vec!["out.jar".into()]) };

    let first = wh.insert_build(&spec, &result, false).expect("insert");
    assert!(first.is_some(), "primera build devuelve id");

    let second = wh.insert_build(&spec, &result, false).expect("duplicate insert");
    assert!(second.is_none(), "configuración duplicada se descarta en silencio");

    // misma config con from_existing=true es otra fila válida
    let existing = wh.insert_build(&spec, &result, true).expect("from_existing insert");
    assert!(existing.is_some());

    // el diff de miembros cuelga del build_id
    let build_id = first.unwrap();
    wh.insert_jar_repr(build_id, "out.jar", &["x.class".into()], &[], &[]).expect("jar repr");
}

#[test]
fn error_log_is_append_only() {
    let Some(wh) = test_warehouse() else { return };
    let pkg = unique_pkg("errors");
    wh.insert_error(&pkg, Some("https://bad.example"), "(VERIFIER) exit code 128").expect("insert");
    wh.insert_error(&pkg, None, "(RESOLVER) invalid URL").expect("insert without url");
}
