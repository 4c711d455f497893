//! GitHub deployment environments
//!
//! Implements [`RemoteEnvironmentProvider`] over the REST API:
//! `PUT /repos/{owner}/{repo}/environments/{name}` creates or updates an
//! environment and `DELETE` on the same path removes it.

use async_trait::async_trait;
use envstack_state::{
    EnvironmentHandle, ProviderError, ProviderResult, RemoteEnvironmentProvider, SecretValue,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

/// GitHub API settings. The token never leaves this struct except as a
/// bearer header.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub api_base: String,
    /// Owner half of `owner/repo`; the provider receives only the repo half
    pub owner: String,
    pub token: Option<SecretValue>,
}

impl GithubConfig {
    pub fn new(owner: &str) -> Self {
        GithubConfig {
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.to_string(),
            token: None,
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: SecretValue) -> Self {
        self.token = Some(token).filter(|t| !t.is_empty());
        self
    }
}

/// Body GitHub returns on errors.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// Remote environment provider backed by the GitHub REST API.
pub struct GithubEnvironments {
    config: GithubConfig,
    http_client: reqwest::Client,
}

impl GithubEnvironments {
    pub fn new(config: GithubConfig) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("envstack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(GithubEnvironments {
            config,
            http_client,
        })
    }

    /// `{api_base}/repos/{owner}/{repo}/environments/{name}`
    pub fn environment_url(&self, repository: &str, environment: &str) -> String {
        format!(
            "{}/repos/{}/{}/environments/{}",
            self.config.api_base, self.config.owner, repository, environment
        )
    }

    fn token(&self) -> ProviderResult<&SecretValue> {
        self.config.token.as_ref().ok_or_else(|| {
            ProviderError::Auth("no GitHub token configured for environment management".to_string())
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> ProviderResult<reqwest::RequestBuilder> {
        Ok(self
            .http_client
            .request(method, url)
            .bearer_auth(self.token()?.expose())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION))
    }
}

/// Map a non-success status to a provider error.
fn status_error(status: StatusCode, body: &str, resource: &str) -> ProviderError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Auth(format!("{} for {}: {}", status, resource, message))
        }
        StatusCode::NOT_FOUND => ProviderError::NotFound {
            resource: resource.to_string(),
        },
        _ => ProviderError::Http(format!("{} for {}: {}", status, resource, message)),
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Http(err.to_string())
}

#[async_trait]
impl RemoteEnvironmentProvider for GithubEnvironments {
    async fn ensure_environment(
        &self,
        name: &str,
        repository: &str,
        protect: bool,
    ) -> ProviderResult<EnvironmentHandle> {
        let url = self.environment_url(repository, name);
        debug!(url = %url, "ensuring GitHub environment");

        let response = self
            .request(reqwest::Method::PUT, &url)?
            .json(&json!({}))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(
                status,
                &body,
                &format!("{}/{}:{}", self.config.owner, repository, name),
            ));
        }

        info!(repository = %repository, environment = %name, protect, "GitHub environment ensured");
        Ok(EnvironmentHandle {
            repository: repository.to_string(),
            environment: name.to_string(),
        })
    }

    async fn delete_environment(&self, handle: &EnvironmentHandle) -> ProviderResult<()> {
        let url = self.environment_url(&handle.repository, &handle.environment);
        let response = self
            .request(reqwest::Method::DELETE, &url)?
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            info!(
                repository = %handle.repository,
                environment = %handle.environment,
                "GitHub environment deleted"
            );
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(
            status,
            &body,
            &format!("{}/{}:{}", self.config.owner, handle.repository, handle.environment),
        ))
    }
}
