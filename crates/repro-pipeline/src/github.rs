//! Cliente GraphQL de GitHub para tags y releases.
//!
//! Contrato consumido: request(owner, repo, version, cursor) devuelve
//! `rateLimit {remaining resetAt}` más dos facetas paginadas
//! (`refs` y `releases`) con `pageInfo {hasNextPage endCursor}`. Ambas facetas
//! se siguen hasta agotar páginas y se fusionan antes del matching.
//!
//! El presupuesto de quota se modela como estado explícito (`QuotaState`),
//! actualizado sólo desde respuestas autoritativas. Bajo el watermark, el
//! cliente bloquea el thread hasta el reset más un margen de seguridad y
//! refresca con una query de costo cero antes de seguir.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::error::PipelineError;

const GRAPHQL_ENDPOINT: &str = "https://api.github.com/graphql";

/// Umbral de requests restantes por debajo del cual se espera al reset.
pub const QUOTA_LOW_WATERMARK: i64 = 5;
/// Margen sobre el reset para absorber desincronización de relojes.
pub const QUOTA_SAFETY_MARGIN_SECS: i64 = 30;

const QUERY_REPO: &str = r#"
query ($owner: String!, $repo: String!, $version: String!) {
  rateLimit { cost remaining resetAt }
  repository(owner: $owner, name: $repo) {
    refs(refPrefix: "refs/tags/", query: $version, first: 100) {
      pageInfo { hasNextPage endCursor }
      nodes { name target { oid } }
    }
    releases(first: 100, orderBy: {field: CREATED_AT, direction: DESC}) {
      pageInfo { hasNextPage endCursor }
      nodes { name tag { name } tagCommit { oid } }
    }
  }
}
"#;

const QUERY_TAGS_PAGE: &str = r#"
query ($owner: String!, $repo: String!, $version: String!, $cursor: String) {
  rateLimit { cost remaining resetAt }
  repository(owner: $owner, name: $repo) {
    refs(refPrefix: "refs/tags/", query: $version, first: 100, after: $cursor) {
      pageInfo { hasNextPage endCursor }
      nodes { name target { oid } }
    }
  }
}
"#;

const QUERY_RELEASES_PAGE: &str = r#"
query ($owner: String!, $repo: String!, $cursor: String) {
  rateLimit { cost remaining resetAt }
  repository(owner: $owner, name: $repo) {
    releases(first: 100, after: $cursor, orderBy: {field: CREATED_AT, direction: DESC}) {
      pageInfo { hasNextPage endCursor }
      nodes { name tag { name } tagCommit { oid } }
    }
  }
}
"#;

const QUERY_QUOTA: &str = "query { rateLimit { remaining resetAt } }";

// ---- shapes de la respuesta (rechazamos campos ausentes en el borde) ----

#[derive(Deserialize, Debug)]
pub(crate) struct Envelope {
    pub data: Option<ResponseData>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ResponseData {
    #[serde(rename = "rateLimit")]
    pub rate_limit: Option<RateLimit>,
    pub repository: Option<Repository>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RateLimit {
    pub remaining: i64,
    #[serde(rename = "resetAt")]
    pub reset_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct Repository {
    pub refs: Option<Connection<TagNode>>,
    pub releases: Option<Connection<ReleaseNode>>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct Connection<T> {
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
    pub nodes: Vec<T>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct PageInfo {
    #[serde(rename = "hasNextPage")]
    pub has_next_page: bool,
    #[serde(rename = "endCursor")]
    pub end_cursor: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TagNode {
    pub name: String,
    pub target: Option<Oid>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Oid {
    pub oid: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReleaseNode {
    pub name: Option<String>,
    pub tag: Option<NamedRef>,
    #[serde(rename = "tagCommit")]
    pub tag_commit: Option<Oid>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NamedRef {
    pub name: String,
}

/// Ambas facetas ya paginadas y fusionadas, en orden de la API (más reciente
/// primero).
#[derive(Debug, Default)]
pub struct RepoFacets {
    pub tags: Vec<TagNode>,
    pub releases: Vec<ReleaseNode>,
}

/// Estado explícito de la quota, actualizado sólo desde respuestas.
#[derive(Debug, Clone)]
pub struct QuotaState {
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

impl QuotaState {
    /// Estado inicial optimista (presupuesto completo de la API).
    pub fn fresh() -> Self {
        QuotaState { remaining: 5000, reset_at: Utc::now() }
    }

    pub fn below_watermark(&self) -> bool {
        self.remaining <= QUOTA_LOW_WATERMARK
    }

    /// Cuánto dormir antes del próximo request: hasta el reset más el margen.
    /// Cero si el reset ya pasó.
    pub fn wait_duration(&self, now: DateTime<Utc>) -> std::time::Duration {
        let until = self.reset_at - now + ChronoDuration::seconds(QUOTA_SAFETY_MARGIN_SECS);
        until.to_std().unwrap_or(std::time::Duration::ZERO)
    }

    fn update_from(&mut self, limit: &RateLimit) {
        self.remaining = limit.remaining;
        self.reset_at = limit.reset_at;
        debug!("quota: remaining={} reset_at={}", self.remaining, self.reset_at);
    }
}

pub struct GithubClient {
    http: reqwest::blocking::Client,
    token: String,
    quota: QuotaState,
}

impl GithubClient {
    pub fn new(token: String) -> Result<Self, PipelineError> {
        let http = reqwest::blocking::Client::builder().user_agent("repro-pipeline")
                                                       .build()?;
        Ok(GithubClient { http, token, quota: QuotaState::fresh() })
    }

    /// Tags (filtrados server-side por la versión) y releases de un repo,
    /// ambas facetas completas. Errores de transporte y respuestas sin
    /// `repository` suben como error: el resolver decide el fallback.
    pub fn fetch_facets(&mut self, owner: &str, repo: &str, version: &str) -> Result<RepoFacets, PipelineError> {
        let data = self.post(QUERY_REPO, json!({ "owner": owner, "repo": repo, "version": version }))?;
        let repository = data.repository
                             .ok_or_else(|| PipelineError::MalformedResponse(format!("repository ausente para {owner}/{repo}")))?;

        let mut facets = RepoFacets::default();

        // faceta tags
        if let Some(refs) = repository.refs {
            let mut page_info = refs.page_info;
            facets.tags = refs.nodes;
            while page_info.has_next_page {
                let cursor = page_info.end_cursor.clone();
                let data = self.post(QUERY_TAGS_PAGE,
                                     json!({ "owner": owner, "repo": repo, "version": version, "cursor": cursor }))?;
                let refs = data.repository
                               .and_then(|r| r.refs)
                               .ok_or_else(|| PipelineError::MalformedResponse("página de refs ausente".into()))?;
                facets.tags.extend(refs.nodes);
                page_info = refs.page_info;
            }
        }

        // faceta releases
        if let Some(releases) = repository.releases {
            let mut page_info = releases.page_info;
            facets.releases = releases.nodes;
            while page_info.has_next_page {
                let cursor = page_info.end_cursor.clone();
                let data = self.post(QUERY_RELEASES_PAGE,
                                     json!({ "owner": owner, "repo": repo, "cursor": cursor }))?;
                let releases = data.repository
                                   .and_then(|r| r.releases)
                                   .ok_or_else(|| PipelineError::MalformedResponse("página de releases ausente".into()))?;
                facets.releases.extend(releases.nodes);
                page_info = releases.page_info;
            }
        }

        debug!("facets: {owner}/{repo} tags={} releases={}", facets.tags.len(), facets.releases.len());
        Ok(facets)
    }

    /// POST de una query GraphQL. Gatea por quota antes de emitir y actualiza
    /// el estado desde la respuesta.
    fn post(&mut self, query: &str, variables: serde_json::Value) -> Result<ResponseData, PipelineError> {
        self.ensure_quota();
        let payload = json!({ "query": query, "variables": variables });
        let res = self.http
                      .post(GRAPHQL_ENDPOINT)
                      .bearer_auth(&self.token)
                      .json(&payload)
                      .send()?;
        let status = res.status();
        if !status.is_success() {
            return Err(PipelineError::Http(format!("status {status}")));
        }
        let envelope: Envelope = res.json()?;
        let data = envelope.data
                           .ok_or_else(|| PipelineError::MalformedResponse("respuesta sin data".into()))?;
        match &data.rate_limit {
            Some(limit) => self.quota.update_from(limit),
            None => warn!("quota: respuesta sin rateLimit"),
        }
        Ok(data)
    }

    /// Espera bloqueante hasta que haya presupuesto. No cancelable: un run
    /// completo del resolver puede legítimamente quedarse quieto una ventana
    /// de quota entera.
    fn ensure_quota(&mut self) {
        if !self.quota.below_watermark() {
            return;
        }
        let sleep = self.quota.wait_duration(Utc::now());
        info!("quota: agotada (remaining={}), durmiendo {}s hasta reset {}",
              self.quota.remaining,
              sleep.as_secs(),
              self.quota.reset_at);
        std::thread::sleep(sleep);
        if let Err(e) = self.refresh_quota() {
            warn!("quota: refresh falló ({e}), se continúa con el estado previo");
        }
    }

    /// Query de costo cero que sólo lee el estado de la quota.
    fn refresh_quota(&mut self) -> Result<(), PipelineError> {
        let payload = json!({ "query": QUERY_QUOTA });
        let res = self.http
                      .post(GRAPHQL_ENDPOINT)
                      .bearer_auth(&self.token)
                      .json(&payload)
                      .send()?;
        let envelope: Envelope = res.json()?;
        if let Some(limit) = envelope.data.and_then(|d| d.rate_limit) {
            self.quota.update_from(&limit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_watermark_and_wait_arithmetic() {
        let now = Utc::now();
        let mut quota = QuotaState { remaining: 100, reset_at: now };
        assert!(!quota.below_watermark());
        quota.remaining = QUOTA_LOW_WATERMARK;
        assert!(quota.below_watermark());

        // reset en 60s -> espera 60s + margen
        quota.reset_at = now + ChronoDuration::seconds(60);
        let wait = quota.wait_duration(now);
        assert_eq!(wait.as_secs(), 60 + QUOTA_SAFETY_MARGIN_SECS as u64);

        // reset en el pasado -> espera sólo el margen residual (o cero)
        quota.reset_at = now - ChronoDuration::seconds(3600);
        assert_eq!(quota.wait_duration(now), std::time::Duration::ZERO);
    }

    #[test]
    fn deserialize_full_envelope_with_both_facets() {
        let body = r#"{
          "data": {
            "rateLimit": { "cost": 1, "remaining": 4987, "resetAt": "2024-05-01T12:00:00Z" },
            "repository": {
              "refs": {
                "pageInfo": { "hasNextPage": false, "endCursor": "abc==" },
                "nodes": [ { "name": "v2.0.0", "target": { "oid": "deadbeef" } } ]
              },
              "releases": {
                "pageInfo": { "hasNextPage": true, "endCursor": "xyz==" },
                "nodes": [
                  { "name": "2.0.0", "tag": { "name": "v2.0.0" }, "tagCommit": { "oid": "deadbeef" } },
                  { "name": null, "tag": null, "tagCommit": null }
                ]
              }
            }
          }
        }"#;
        let envelope: Envelope = serde_json::from_str(body).expect("deserialize");
        let data = envelope.data.expect("data");
        let limit = data.rate_limit.expect("rate limit");
        assert_eq!(limit.remaining, 4987);
        let repo = data.repository.expect("repository");
        let refs = repo.refs.expect("refs");
        assert_eq!(refs.nodes[0].name, "v2.0.0");
        assert_eq!(refs.nodes[0].target.as_ref().unwrap().oid, "deadbeef");
        assert!(!refs.page_info.has_next_page);
        let releases = repo.releases.expect("releases");
        assert!(releases.page_info.has_next_page);
        assert_eq!(releases.nodes.len(), 2);
        assert!(releases.nodes[1].name.is_none());
    }

    #[test]
    fn deserialize_missing_repository_is_detectable() {
        // repos inexistentes llegan con repository: null más un array errors
        let body = r#"{ "data": { "rateLimit": { "remaining": 10, "resetAt": "2024-05-01T12:00:00Z" }, "repository": null } }"#;
        let envelope: Envelope = serde_json::from_str(body).expect("deserialize");
        assert!(envelope.data.unwrap().repository.is_none());
    }

    #[test]
    fn queries_request_a_uniform_page_size() {
        for q in [QUERY_REPO, QUERY_TAGS_PAGE, QUERY_RELEASES_PAGE] {
            assert!(q.contains("first: 100"));
        }
    }
}
