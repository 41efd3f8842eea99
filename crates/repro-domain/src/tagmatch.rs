//! Heurística de matching de tags y releases contra una versión publicada.
//!
//! Los proyectos nombran sus tags con convenciones dispares (`v1.2.3`,
//! `release-1.2.3`, `artifact-1.2.3`, `1.2.3.Final`, ...). El matching se
//! implementa como funciones puras sobre listas de nombres, independientes del
//! fetching de red, para poder testearlas de forma determinista.
//!
//! La lista de convenciones cubierta aquí es el contrato documentado; upstream
//! reconoce que no es exhaustiva frente al mundo real.

/// Máximo de componentes de `artifactid` (separados por `-`) usados para
/// generar prefijos acumulativos: `a`, `a-b`, `a-b-c`, ...
const MAX_ARTIFACT_PARTS: usize = 5;

/// Genera el conjunto ordenado y determinista de nombres de tag candidatos
/// para (artifact, version). Todos en minúsculas, sin duplicados, preservando
/// el orden de generación.
pub fn candidate_tag_names(artifact_id: &str, version: &str) -> Vec<String> {
    let v = version;
    let mut names: Vec<String> = vec![v.to_string(),
                                      format!("{artifact_id}-{v}"),
                                      format!("version-{v}"),
                                      format!("v{v}"),
                                      format!("v.{v}"),
                                      format!("release-{v}"),
                                      format!("release-v{v}"),
                                      format!("release_{v}"),
                                      format!("release_v{v}"),
                                      format!("release/{v}"),
                                      format!("release/v{v}"),
                                      format!("releases/{v}"),
                                      format!("rel-{v}"),
                                      format!("rel_{v}"),
                                      format!("rel_v{v}"),
                                      format!("rel/{v}"),
                                      format!("rel/v{v}"),
                                      format!("r{v}"),
                                      format!("r.{v}"),
                                      format!("project-{v}"),
                                      format!("{v}-release"),
                                      format!("{v}.release"),
                                      format!("v{v}.release"),
                                      format!("{v}.final"),
                                      format!("{v}-final"),
                                      format!("v{v}-final"),
                                      format!("tag-{v}"),
                                      format!("tag{v}"),];

    let parts: Vec<&str> = artifact_id.split('-').collect();
    // componente suelto i + version / vversion
    for part in parts.iter().take(MAX_ARTIFACT_PARTS) {
        names.push(format!("{part}-{v}"));
        names.push(format!("{part}-v{v}"));
    }
    // prefijos acumulativos de izquierda a derecha
    for i in 0..MAX_ARTIFACT_PARTS.min(parts.len()) {
        let prefix = parts[..=i].join("-");
        names.push(format!("{prefix}-{v}"));
        names.push(format!("{prefix}-v{v}"));
    }

    let mut seen = std::collections::HashSet::new();
    names.into_iter()
         .map(|n| n.to_lowercase())
         .filter(|n| seen.insert(n.clone()))
         .collect()
}

/// Filtra `tags` (en el orden recibido de la API: más recientes primero)
/// contra el conjunto de candidatos. Devuelve los índices que matchean, en
/// orden. El llamador se queda con el primero y loguea si hubo ambigüedad.
pub fn matching_tag_indices(tags: &[String], artifact_id: &str, version: &str) -> Vec<usize> {
    let candidates: std::collections::HashSet<String> =
        candidate_tag_names(artifact_id, version).into_iter().collect();
    tags.iter()
        .enumerate()
        .filter(|(_, name)| candidates.contains(&name.to_lowercase()))
        .map(|(i, _)| i)
        .collect()
}

/// Umbral mínimo de similitud para el fallback de releases. Bajo a propósito:
/// funciona como desempate entre substrings, no como filtro estricto.
const MIN_RELEASE_SIMILARITY: f64 = 0.1;

/// Similitud normalizada entre dos strings (1.0 = iguales) basada en distancia
/// de edición. Suficiente como desempate; no pretende ser lingüísticamente
/// fina.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let dist = levenshtein(a, b);
    1.0 - (dist as f64 / max_len as f64)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Selecciona la mejor release por nombre declarado:
/// 1. match exacto (case-sensitive) nombre == version;
/// 2. si no hay, filtra por "version es substring del nombre" y elige la de
///    mayor similitud (por encima del umbral de desempate).
///
/// Devuelve el índice dentro de `release_names`.
pub fn best_release_index(release_names: &[Option<String>], version: &str) -> Option<usize> {
    // 1. exacto
    if let Some(i) = release_names.iter()
                                  .position(|n| n.as_deref() == Some(version))
    {
        return Some(i);
    }
    // 2. substring + similitud
    release_names.iter()
                 .enumerate()
                 .filter_map(|(i, n)| n.as_deref().map(|n| (i, n)))
                 .filter(|(_, n)| n.contains(version))
                 .map(|(i, n)| (i, similarity(n, version)))
                 .filter(|(_, s)| *s >= MIN_RELEASE_SIMILARITY)
                 .max_by(|(_, s1), (_, s2)| s1.partial_cmp(s2).unwrap_or(std::cmp::Ordering::Equal))
                 .map(|(i, _)| i)
}
