//! GitHub REST collaborator.
//!
//! Implements both [`CredentialProvider`] and [`ContentProbe`] on top of
//! the user-to-server endpoints, authenticated with the acting user's
//! token (read from `[github].token_env`):
//!
//! | Call | Endpoint |
//! |------|----------|
//! | list scopes | `GET /user/installations` |
//! | probe | `GET /user/installations/{id}/repositories` |
//!
//! Both endpoints are paginated with `per_page=100`. A probe answers
//! [`ProbeOutcome::RepositoryNotFound`] when the installation covers other
//! repositories of the same owner but not the requested one, and
//! [`ProbeOutcome::Unreachable`] when the installation does not cover the
//! owner at all or is no longer visible to the user.
//!
//! Only a 404, or a 403 that is not about quota, means "not visible".
//! A 429 and a rate-limited 403 (`x-ratelimit-remaining: 0`, a
//! `retry-after` header, or a "rate limit" message) are errors, so a
//! throttled diagnosis ends as `diagnosis-failed` and is retried.
//!
//! The client holds one user's token. `list_accessible_scopes` answers
//! for that user whatever `identity` it is given; the identity is only
//! logged. Serving several users means running one process per token.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use vector_sync_core::collaborators::{ContentProbe, CredentialProvider, ProbeOutcome};
use vector_sync_core::models::CredentialScope;

use crate::config::GithubConfig;

const PER_PAGE: usize = 100;
const USER_AGENT: &str = "vector-sync";

pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct Account {
    login: String,
}

#[derive(Deserialize)]
struct Installation {
    id: i64,
    account: Account,
}

#[derive(Deserialize)]
struct InstallationsPage {
    installations: Vec<Installation>,
}

#[derive(Deserialize)]
struct Repository {
    full_name: String,
    owner: Account,
}

#[derive(Deserialize)]
struct RepositoriesPage {
    repositories: Vec<Repository>,
}

/// Pages that wrap a list under a named key.
trait Paged: DeserializeOwned {
    type Item;
    fn into_items(self) -> Vec<Self::Item>;
}

impl Paged for InstallationsPage {
    type Item = Installation;
    fn into_items(self) -> Vec<Installation> {
        self.installations
    }
}

impl Paged for RepositoriesPage {
    type Item = Repository;
    fn into_items(self) -> Vec<Repository> {
        self.repositories
    }
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build GitHub HTTP client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token(),
        })
    }

    fn token(&self) -> Result<&str> {
        match self.token.as_deref() {
            Some(t) => Ok(t),
            None => bail!("no GitHub token configured; set the [github].token_env variable"),
        }
    }

    /// Fetch every page of `path`. Returns `Ok(None)` when the resource
    /// is not visible to the user.
    async fn get_all<P: Paged>(&self, path: &str) -> Result<Option<Vec<P::Item>>> {
        let token = self.token()?;
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let url = format!("{}{}", self.api_base, path);
            debug!(url = %url, page, "GitHub request");

            let response = self
                .http
                .get(&url)
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())])
                .header("Authorization", format!("Bearer {token}"))
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28")
                .send()
                .await
                .with_context(|| format!("GitHub request failed: {url}"))?;

            let status = response.status();
            if !status.is_success() {
                let headers = response.headers();
                let quota_exhausted = headers
                    .get("x-ratelimit-remaining")
                    .is_some_and(|v| v.as_bytes() == b"0")
                    || headers.contains_key("retry-after");
                let body = response.text().await.unwrap_or_default();
                match classify_rejection(status, quota_exhausted, &body) {
                    Rejection::NotVisible => {
                        debug!(url = %url, status = %status, "GitHub resource not visible");
                        return Ok(None);
                    }
                    Rejection::RateLimited => {
                        warn!(url = %url, status = %status, "GitHub rate limit exceeded");
                        bail!("GitHub rate limit exceeded ({}): {}", status, body);
                    }
                    Rejection::Failed => {
                        warn!(url = %url, status = %status, "GitHub request rejected");
                        bail!("GitHub API error ({}): {}", status, body);
                    }
                }
            }

            let batch = response
                .json::<P>()
                .await
                .with_context(|| format!("Failed to parse GitHub response: {url}"))?
                .into_items();
            let len = batch.len();
            items.extend(batch);
            if len < PER_PAGE {
                return Ok(Some(items));
            }
            page += 1;
        }
    }
}

#[async_trait]
impl CredentialProvider for GithubClient {
    async fn list_accessible_scopes(&self, identity: &str) -> Result<Vec<CredentialScope>> {
        let installations = self
            .get_all::<InstallationsPage>("/user/installations")
            .await?
            .with_context(|| format!("installations for {identity} are not visible"))?;
        debug!(identity, count = installations.len(), "Listed installations");
        Ok(installations
            .into_iter()
            .map(|i| CredentialScope {
                installation_id: i.id,
                account_login: i.account.login,
            })
            .collect())
    }
}

#[async_trait]
impl ContentProbe for GithubClient {
    async fn probe(&self, installation_id: i64, owner: &str, name: &str) -> Result<ProbeOutcome> {
        let path = format!("/user/installations/{installation_id}/repositories");
        let Some(repositories) = self.get_all::<RepositoriesPage>(&path).await? else {
            return Ok(ProbeOutcome::Unreachable);
        };
        let outcome = classify(&repositories, owner, name);
        debug!(installation_id, owner, name, ?outcome, "Probed repository");
        Ok(outcome)
    }
}

/// How a non-success response is treated.
#[derive(Debug, PartialEq, Eq)]
enum Rejection {
    NotVisible,
    RateLimited,
    Failed,
}

fn classify_rejection(status: StatusCode, quota_exhausted: bool, body: &str) -> Rejection {
    match status {
        StatusCode::TOO_MANY_REQUESTS => Rejection::RateLimited,
        StatusCode::FORBIDDEN
            if quota_exhausted || body.to_lowercase().contains("rate limit") =>
        {
            Rejection::RateLimited
        }
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Rejection::NotVisible,
        _ => Rejection::Failed,
    }
}

fn classify(repositories: &[Repository], owner: &str, name: &str) -> ProbeOutcome {
    let full_name = format!("{owner}/{name}");
    if repositories
        .iter()
        .any(|r| r.full_name.eq_ignore_ascii_case(&full_name))
    {
        ProbeOutcome::Reachable
    } else if repositories
        .iter()
        .any(|r| r.owner.login.eq_ignore_ascii_case(owner))
    {
        ProbeOutcome::RepositoryNotFound
    } else {
        ProbeOutcome::Unreachable
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use vector_sync_core::reconciler::{Diagnosis, NotFixableReason, Reconciler};

    use super::*;

    const TOKEN_ENV: &str = "VSYNC_GITHUB_CLIENT_TEST_TOKEN";

    /// Serve `router` on a free port and point a client at it.
    async fn client_for(router: Router) -> GithubClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        std::env::set_var(TOKEN_ENV, "test-token");
        GithubClient::new(&GithubConfig {
            api_base: format!("http://{addr}"),
            token_env: TOKEN_ENV.to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn repositories_json(full_names: &[&str]) -> Response {
        let repos: Vec<_> = full_names
            .iter()
            .map(|n| {
                let owner = n.split('/').next().unwrap_or_default();
                json!({ "full_name": n, "owner": { "login": owner } })
            })
            .collect();
        Json(json!({ "total_count": repos.len(), "repositories": repos })).into_response()
    }

    fn rate_limited() -> Response {
        (
            HttpStatus::FORBIDDEN,
            [("x-ratelimit-remaining", "0")],
            r#"{"message":"API rate limit exceeded for user ID 1."}"#,
        )
            .into_response()
    }

    /// Installation-scoped repository lists keyed by installation id.
    async fn repositories(Path(id): Path<i64>) -> Response {
        match id {
            1 => repositories_json(&["acme/widgets"]),
            2 => HttpStatus::NOT_FOUND.into_response(),
            3 => rate_limited(),
            4 => (HttpStatus::TOO_MANY_REQUESTS, "slow down").into_response(),
            5 => (
                HttpStatus::FORBIDDEN,
                r#"{"message":"Resource not accessible by integration"}"#,
            )
                .into_response(),
            6 => (
                HttpStatus::FORBIDDEN,
                r#"{"message":"You have exceeded a secondary rate limit."}"#,
            )
                .into_response(),
            _ => repositories_json(&["other/tools"]),
        }
    }

    fn repo(full_name: &str) -> Repository {
        let owner = full_name.split('/').next().unwrap_or_default();
        Repository {
            full_name: full_name.to_string(),
            owner: Account {
                login: owner.to_string(),
            },
        }
    }

    #[test]
    fn classify_matches_case_insensitively() {
        let repos = vec![repo("Acme/Widgets")];
        assert_eq!(classify(&repos, "acme", "widgets"), ProbeOutcome::Reachable);
    }

    #[test]
    fn classify_same_owner_missing_repository() {
        let repos = vec![repo("acme/gadgets")];
        assert_eq!(
            classify(&repos, "acme", "widgets"),
            ProbeOutcome::RepositoryNotFound
        );
    }

    #[test]
    fn classify_foreign_owner_is_unreachable() {
        let repos = vec![repo("other/widgets")];
        assert_eq!(classify(&repos, "acme", "widgets"), ProbeOutcome::Unreachable);
        assert_eq!(classify(&[], "acme", "widgets"), ProbeOutcome::Unreachable);
    }

    #[test]
    fn parses_installation_page() {
        let page: InstallationsPage = serde_json::from_str(
            r#"{"total_count":1,"installations":[{"id":42,"account":{"login":"acme","id":7}}]}"#,
        )
        .unwrap();
        let items = page.into_items();
        assert_eq!(items[0].id, 42);
        assert_eq!(items[0].account.login, "acme");
    }

    #[test]
    fn quota_rejections_are_not_visibility() {
        assert_eq!(
            classify_rejection(StatusCode::NOT_FOUND, false, ""),
            Rejection::NotVisible
        );
        assert_eq!(
            classify_rejection(StatusCode::FORBIDDEN, false, "Resource not accessible"),
            Rejection::NotVisible
        );
        assert_eq!(
            classify_rejection(StatusCode::FORBIDDEN, true, ""),
            Rejection::RateLimited
        );
        assert_eq!(
            classify_rejection(StatusCode::FORBIDDEN, false, "API Rate Limit exceeded"),
            Rejection::RateLimited
        );
        assert_eq!(
            classify_rejection(StatusCode::TOO_MANY_REQUESTS, false, ""),
            Rejection::RateLimited
        );
        assert_eq!(
            classify_rejection(StatusCode::BAD_GATEWAY, false, ""),
            Rejection::Failed
        );
    }

    #[tokio::test]
    async fn installations_are_read_across_pages() {
        async fn installations(
            headers: HeaderMap,
            Query(q): Query<HashMap<String, String>>,
        ) -> Response {
            if headers.get("authorization").and_then(|v| v.to_str().ok())
                != Some("Bearer test-token")
            {
                return HttpStatus::UNAUTHORIZED.into_response();
            }
            let page: i64 = q.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
            let ids = match page {
                1 => 1..=100,
                2 => 101..=101,
                _ => 1..=0,
            };
            let items: Vec<_> = ids
                .map(|id| json!({ "id": id, "account": { "login": format!("org-{id}") } }))
                .collect();
            Json(json!({ "total_count": 101, "installations": items })).into_response()
        }

        let client = client_for(Router::new().route("/user/installations", get(installations))).await;
        let scopes = client.list_accessible_scopes("octocat").await.unwrap();
        assert_eq!(scopes.len(), 101);
        assert_eq!(scopes[0].installation_id, 1);
        assert_eq!(scopes[100].installation_id, 101);
        assert_eq!(scopes[100].account_login, "org-101");
    }

    #[tokio::test]
    async fn repository_lookup_statuses() {
        let client = client_for(Router::new().route(
            "/user/installations/{id}/repositories",
            get(repositories),
        ))
        .await;

        assert_eq!(
            client.probe(1, "acme", "widgets").await.unwrap(),
            ProbeOutcome::Reachable
        );
        assert_eq!(
            client.probe(2, "acme", "widgets").await.unwrap(),
            ProbeOutcome::Unreachable
        );
        assert_eq!(
            client.probe(5, "acme", "widgets").await.unwrap(),
            ProbeOutcome::Unreachable
        );
        for throttled in [3, 4, 6] {
            let err = client.probe(throttled, "acme", "widgets").await.unwrap_err();
            assert!(err.to_string().contains("rate limit"), "{err}");
        }
    }

    #[tokio::test]
    async fn throttled_diagnosis_is_retryable() {
        async fn installations() -> Response {
            Json(json!({
                "total_count": 2,
                "installations": [
                    { "id": 7, "account": { "login": "acme" } },
                    { "id": 3, "account": { "login": "acme" } }
                ]
            }))
            .into_response()
        }

        let client = client_for(
            Router::new()
                .route("/user/installations", get(installations))
                .route("/user/installations/{id}/repositories", get(repositories)),
        )
        .await;

        let diagnosis = Reconciler::new(&client, &client)
            .diagnose("octocat", "acme", "widgets")
            .await;
        assert_eq!(
            diagnosis,
            Diagnosis::NotFixable {
                reason: NotFixableReason::DiagnosisFailed
            }
        );
    }

    #[tokio::test]
    async fn throttled_installation_listing_fails_diagnosis() {
        let client = client_for(Router::new().route(
            "/user/installations",
            get(|| async { rate_limited() }),
        ))
        .await;

        assert!(client.list_accessible_scopes("octocat").await.is_err());
        let diagnosis = Reconciler::new(&client, &client)
            .diagnose("octocat", "acme", "widgets")
            .await;
        let Diagnosis::NotFixable { reason } = diagnosis else {
            panic!("expected not fixable, got {:?}", diagnosis);
        };
        assert!(!reason.is_definitive());
    }
}
