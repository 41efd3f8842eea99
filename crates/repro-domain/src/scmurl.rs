//! Normalización de URLs SCM declaradas en metadata de paquetes.
//!
//! Los POMs publican URLs en formatos heterogéneos (`scm:git:`, `git@host:path`,
//! rutas `/tree/...` de homepages, `http://` plano). Cada transformación es una
//! función pura que devuelve `(url, changed)`: el verificador sólo lanza un
//! probe de red cuando la transformación realmente cambió el input.
//!
//! Referencias de formato: https://maven.apache.org/scm/scm-url-format.html

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DomainError;

static SCM_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:scm|svn):(git@|git:)?").unwrap());
static GIT_AT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^git@([^:/]+)[:/](.+)$").unwrap());
static GIT_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^git://").unwrap());
static SSH_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ssh://(?:[^@/]+@)?([^:/]+)[:/](.+)$").unwrap());
static TREE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/tree.*$").unwrap());
static HTTP_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^http://").unwrap());
static APACHE_ASF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://[\w-]+\.apache\.org/repos/asf/(\w+)").unwrap());
static GIT_REPO_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\w-]+)\.git").unwrap());
static HTTPS_REPO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://([^/]+)/([^/]+)/([^/]+?)(?:\.git)?(?:/.*)?$").unwrap());

/// Identidad: probar la URL tal cual vino. Siempre reporta `changed = true`
/// para que el verificador emita el primer probe.
pub fn identity(url: &str) -> (String, bool) {
    (url.to_string(), true)
}

/// Elimina el wrapper `scm:git:` / `scm:` (convención Maven SCM). El prefijo
/// `git@` embebido se conserva porque sigue siendo una URL SSH válida.
pub fn strip_scm_prefix(url: &str) -> (String, bool) {
    let n_url = SCM_PREFIX.replace(url, |caps: &regex::Captures| {
                              match caps.get(1).map(|m| m.as_str()) {
                                  Some("git@") => "git@".to_string(),
                                  _ => String::new(),
                              }
                          })
                          .into_owned();
    let changed = n_url != url;
    (n_url, changed)
}

/// Reescribe `git://host/path`, `git@host:path` y `ssh://user@host:path` a su
/// equivalente `https://host/path`.
pub fn git_or_ssh_to_https(url: &str) -> (String, bool) {
    let n_url = if let Some(caps) = GIT_AT.captures(url) {
        format!("https://{}/{}", &caps[1], &caps[2])
    } else if let Some(caps) = SSH_SCHEME.captures(url) {
        format!("https://{}/{}", &caps[1], &caps[2])
    } else {
        GIT_SCHEME.replace(url, "https://").into_owned()
    };
    let changed = n_url != url;
    (n_url, changed)
}

/// Quita el sufijo de browse `/tree/<ref>/...` que algunos homepages incluyen.
/// GitHub rechaza `ls-remote` contra esas rutas.
pub fn remove_tree_path(url: &str) -> (String, bool) {
    let n_url = TREE_PATH.replace(url, "").into_owned();
    let changed = n_url != url;
    (n_url, changed)
}

/// `http://` -> `https://`. GitHub ya no acepta git sobre dumb-http.
pub fn http_to_https(url: &str) -> (String, bool) {
    let n_url = HTTP_SCHEME.replace(url, "https://").into_owned();
    let changed = n_url != url;
    (n_url, changed)
}

/// Mirrors de la forja de Apache (`*.apache.org/repos/asf/...`) reescritos a su
/// espejo canónico en GitHub. Se aplica antes del pipeline de transformaciones.
pub fn apache_to_github(url: &str) -> (String, bool) {
    if !url.contains(".apache.org") {
        return (url.to_string(), false);
    }
    if let Some(caps) = GIT_REPO_NAME.captures(url) {
        let n_url = format!("https://github.com/apache/{}", &caps[1]);
        return (n_url, true);
    }
    let n_url = APACHE_ASF.replace(url, "https://github.com/apache/$1").into_owned();
    let changed = n_url != url;
    (n_url, changed)
}

/// Cadena de transformaciones en el orden fijo de prueba del verificador.
/// El orden importa: es contrato (ver tests).
pub fn transform_chain() -> Vec<fn(&str) -> (String, bool)> {
    vec![identity, strip_scm_prefix, git_or_ssh_to_https, remove_tree_path, http_to_https]
}

/// Hosts de VCS que no se pueden sondear con `git ls-remote` (browse de SVN y
/// similares). El verificador los salta sin gastar un probe.
pub fn is_unsupported_vcs(url: &str) -> bool {
    url.contains("svn.codehaus.org") || url.contains("svn.apache.org/viewvc") || url.contains("fisheye.")
}

/// Tupla canónica (host, owner, repo) extraída de una URL ya validada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCoords {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl RepoCoords {
    /// Parsea una URL de repositorio en sus coordenadas. Tolera los mismos
    /// encodings que el pipeline de normalización: aplica las transformaciones
    /// y luego exige la forma `https://host/owner/repo`.
    pub fn parse(url: &str) -> Result<RepoCoords, DomainError> {
        let trimmed = url.trim_end_matches('/');
        let (no_scm, _) = strip_scm_prefix(trimmed);
        let (https, _) = git_or_ssh_to_https(&no_scm);
        let (https, _) = http_to_https(&https);
        let (clean, _) = remove_tree_path(&https);

        let caps = HTTPS_REPO.captures(&clean)
                             .ok_or_else(|| DomainError::UnparseableUrl(url.to_string()))?;
        Ok(RepoCoords { host: caps[1].to_string(),
                        owner: caps[2].to_string(),
                        repo: caps[3].to_string() })
    }

    pub fn is_github(&self) -> bool {
        self.host == "github.com"
    }
}

/// Hostname de una URL cruda, para la etapa de extracción. Devuelve `None`
/// cuando no hay nada con forma de host.
pub fn extract_host(url: &str) -> Option<String> {
    let (no_scm, _) = strip_scm_prefix(url.trim());
    let (https, _) = git_or_ssh_to_https(&no_scm);
    // forma esperada: scheme://host/... o host/... pelado
    let rest = https.splitn(2, "://").last()?;
    let host = rest.split(['/', ':']).next()?.trim();
    if host.is_empty() || !host.contains('.') {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scm_git_ssh_normalizes_to_https() {
        // Cadena completa: scm:git:git@github.com:owner/repo.git
        let raw = "scm:git:git@github.com:owner/repo.git";
        let (step1, changed1) = strip_scm_prefix(raw);
        assert!(changed1);
        assert_eq!(step1, "git@github.com:owner/repo.git");
        let (step2, changed2) = git_or_ssh_to_https(&step1);
        assert!(changed2);
        assert_eq!(step2, "https://github.com/owner/repo.git");
    }

    #[test]
    fn scm_prefix_keeps_git_at() {
        let (url, changed) = strip_scm_prefix("scm:git@github.com:o/r.git");
        assert!(changed);
        assert_eq!(url, "git@github.com:o/r.git");
    }

    #[test]
    fn git_scheme_rewritten() {
        let (url, changed) = git_or_ssh_to_https("git://github.com/instaclustr/instaclustr-icarus.git");
        assert!(changed);
        assert_eq!(url, "https://github.com/instaclustr/instaclustr-icarus.git");
    }

    #[test]
    fn ssh_with_user_and_colon_separator() {
        let (url, changed) = git_or_ssh_to_https("ssh://git@github.com:owner/repo.git");
        assert!(changed);
        assert_eq!(url, "https://github.com/owner/repo.git");
    }

    #[test]
    fn tree_suffix_stripped() {
        let (url, changed) = remove_tree_path("https://github.com/Auties00/noise-java/tree/master/");
        assert!(changed);
        assert_eq!(url, "https://github.com/Auties00/noise-java");
    }

    #[test]
    fn http_upgraded() {
        let (url, changed) = http_to_https("http://github.com/a/b");
        assert!(changed);
        assert_eq!(url, "https://github.com/a/b");
        let (same, unchanged) = http_to_https(&url);
        assert!(!unchanged);
        assert_eq!(same, url);
    }

    #[test]
    fn noop_transform_reports_unchanged() {
        let (_, changed) = strip_scm_prefix("https://github.com/a/b");
        assert!(!changed);
    }

    #[test]
    fn apache_asf_mirror_rewritten() {
        let (url, changed) = apache_to_github("https://gitbox.apache.org/repos/asf/maven");
        assert!(changed);
        assert_eq!(url, "https://github.com/apache/maven");
        let (url2, changed2) = apache_to_github("https://git-wip-us.apache.org/repos/asf/commons-lang.git");
        assert!(changed2);
        assert_eq!(url2, "https://github.com/apache/commons-lang");
    }

    #[test]
    fn apache_rewrite_does_not_touch_other_hosts() {
        let (url, changed) = apache_to_github("https://github.com/owner/repo.git");
        assert!(!changed);
        assert_eq!(url, "https://github.com/owner/repo.git");
    }

    #[test]
    fn coords_from_https_with_git_suffix() {
        let c = RepoCoords::parse("https://github.com/cucumber/gherkin.git").unwrap();
        assert_eq!(c, RepoCoords { host: "github.com".into(),
                                   owner: "cucumber".into(),
                                   repo: "gherkin".into() });
        assert!(c.is_github());
    }

    #[test]
    fn coords_from_git_at_and_trailing_slash() {
        let c = RepoCoords::parse("git@gitee.com:fluent-mybatis/generator.git//").unwrap();
        assert_eq!(c.host, "gitee.com");
        assert_eq!(c.owner, "fluent-mybatis");
        assert_eq!(c.repo, "generator");
        assert!(!c.is_github());
    }

    #[test]
    fn coords_rejects_hostname_only() {
        assert!(RepoCoords::parse("https://example.com").is_err());
    }

    #[test]
    fn host_extraction() {
        assert_eq!(extract_host("scm:git:git@github.com:a/b.git").as_deref(), Some("github.com"));
        assert_eq!(extract_host("http://www.example.org/project").as_deref(), Some("www.example.org"));
        assert_eq!(extract_host("not a url").as_deref(), None);
    }
}
