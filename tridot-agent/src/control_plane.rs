use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use thiserror::Error;
use tracing::{debug, info};
use tridot_core::{AgentHealthReport, RegisterNodeRequest, RegisterNodeResponse};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} failed with status {status}")]
    Status { endpoint: &'static str, status: u16 },

    #[error("invalid control plane url: {0}")]
    Url(#[from] url::ParseError),
}

/// The two calls the agent makes against the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the node id when the control plane assigned one.
    async fn register(&self) -> Result<Option<Uuid>, ControlPlaneError>;
    async fn report_health(&self, report: &AgentHealthReport) -> Result<(), ControlPlaneError>;
}

pub struct HttpControlPlane {
    client: Client,
    register_url: Url,
    health_url: Url,
    token: String,
    registration: Option<RegisterNodeRequest>,
}

impl HttpControlPlane {
    pub fn new(
        client: Client,
        base_url: &str,
        register_path: &str,
        health_path: &str,
        token: impl Into<String>,
    ) -> Result<Self, ControlPlaneError> {
        Ok(Self {
            client,
            register_url: join_url(base_url, register_path)?,
            health_url: join_url(base_url, health_path)?,
            token: token.into(),
            registration: None,
        })
    }

    /// Sends `request` as the register body. Without it the register call has
    /// no body and the response is not parsed.
    pub fn with_registration(mut self, request: RegisterNodeRequest) -> Self {
        self.registration = Some(request);
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn register(&self) -> Result<Option<Uuid>, ControlPlaneError> {
        debug!(url = %self.register_url, "Registering node");
        let mut request = self.authorize(self.client.post(self.register_url.clone()));
        if let Some(body) = &self.registration {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ControlPlaneError::Status {
                endpoint: "register",
                status: status.as_u16(),
            });
        }

        if self.registration.is_none() {
            return Ok(None);
        }
        let body: RegisterNodeResponse = response.json().await?;
        info!(node_id = %body.node_id, "Node registered");
        Ok(Some(body.node_id))
    }

    async fn report_health(&self, report: &AgentHealthReport) -> Result<(), ControlPlaneError> {
        let response = self
            .authorize(self.client.post(self.health_url.clone()))
            .json(report)
            .send()
            .await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ControlPlaneError::Status {
                endpoint: "health report",
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Appends `path` to the path of `base`. An empty `path` returns `base`
/// unchanged.
pub fn join_url(base: &str, path: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return Ok(url);
    }
    let joined = format!("{}/{}", url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_appends_to_base_path() {
        assert_eq!(
            join_url("https://cp.example.com", "/api/v1/nodes/register").unwrap().as_str(),
            "https://cp.example.com/api/v1/nodes/register"
        );
        assert_eq!(
            join_url("https://cp.example.com/base/", "api/v1/nodes/health").unwrap().as_str(),
            "https://cp.example.com/base/api/v1/nodes/health"
        );
        assert_eq!(
            join_url("https://cp.example.com/base", "").unwrap().as_str(),
            "https://cp.example.com/base"
        );
    }

    #[test]
    fn join_url_rejects_relative_base() {
        assert!(join_url("cp.example.com", "/api").is_err());
    }

    #[test]
    fn new_resolves_both_endpoints() {
        let cp = HttpControlPlane::new(
            Client::new(),
            "https://cp.example.com",
            "/api/v1/nodes/register",
            "/api/v1/nodes/health",
            "token",
        )
        .unwrap();
        assert_eq!(cp.register_url.path(), "/api/v1/nodes/register");
        assert_eq!(cp.health_url.path(), "/api/v1/nodes/health");
    }
}
