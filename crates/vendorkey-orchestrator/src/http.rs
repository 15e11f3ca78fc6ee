//! HTTP client for the identity server's admin resources
//!
//! Implements [`AuthorizationBackend`] and [`AuditSink`] over the realm's
//! vendor and admin REST endpoints.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;

use crate::audit::{AuditEvent, AuditSink};
use crate::backend::AuthorizationBackend;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use vendorkey_core::{AuthorizationProof, PublicPoint, VendorId};

const VENDOR_RESOURCES: &str = "vendorResources";
const ADMIN_RESOURCES: &str = "tideAdminResources";

#[derive(Debug, Clone)]
pub struct AdminClient {
    client: Client,
    realm_url: String,
    bearer_token: Option<String>,
}

impl AdminClient {
    /// Client for `realm` on the server at `base_url`
    pub fn new(base_url: &str, realm: &str) -> Result<Self> {
        Self::with_timeout(base_url, realm, Duration::from_secs(30))
    }

    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let client = Self::with_timeout(
            &config.admin_base_url,
            &config.realm,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(match &config.bearer_token {
            Some(token) => client.with_bearer_token(token),
            None => client,
        })
    }

    fn with_timeout(base_url: &str, realm: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            realm_url: format!(
                "{}/admin/realms/{}",
                base_url.trim_end_matches('/'),
                realm
            ),
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn url(&self, resource: &str, path: &str) -> String {
        format!("{}/{}/{}", self.realm_url, resource, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_form(
        &self,
        resource: &str,
        path: &str,
        form: &[(&str, &str)],
        kind: fn(String) -> OrchestratorError,
    ) -> Result<Response> {
        let url = self.url(resource, path);
        debug!("POST {}", url);
        let request = self.authorized(self.client.post(&url).form(form));
        check(request.send().await?, kind).await
    }

    async fn post_empty(&self, resource: &str, path: &str, kind: fn(String) -> OrchestratorError) -> Result<()> {
        let url = self.url(resource, path);
        debug!("POST {}", url);
        let request = self.authorized(self.client.post(&url));
        check(request.send().await?, kind).await?;
        Ok(())
    }

    async fn get(&self, resource: &str, path: &str, kind: fn(String) -> OrchestratorError) -> Result<Response> {
        let url = self.url(resource, path);
        debug!("GET {}", url);
        let request = self.authorized(self.client.get(&url));
        check(request.send().await?, kind).await
    }

    async fn post_for_text(
        &self,
        resource: &str,
        path: &str,
        form: &[(&str, &str)],
        kind: fn(String) -> OrchestratorError,
    ) -> Result<String> {
        let body = self.post_form(resource, path, form, kind).await?.text().await?;
        let body = body.trim();
        if body.is_empty() {
            return Err(kind(format!("{} returned an empty body", path)));
        }
        Ok(body.to_string())
    }
}

/// Map a non-success status to `kind`, keeping the response body
async fn check(response: Response, kind: fn(String) -> OrchestratorError) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(kind(format!("{} {}", status, body.trim())))
}

#[async_trait]
impl AuthorizationBackend for AdminClient {
    async fn sign_message(&self, data: &str) -> Result<AuthorizationProof> {
        let proof = self
            .post_for_text(
                VENDOR_RESOURCES,
                "sign-message",
                &[("data", data)],
                OrchestratorError::Authorization,
            )
            .await?;
        Ok(AuthorizationProof::new(proof))
    }

    async fn generate_vendor_id(&self, hashed_point: &PublicPoint) -> Result<VendorId> {
        let point = hashed_point.to_hex();
        let vendor_id = self
            .post_for_text(
                VENDOR_RESOURCES,
                "generate-vendor-id",
                &[("point", point.as_str())],
                OrchestratorError::KeyGeneration,
            )
            .await?;
        Ok(VendorId::new(vendor_id))
    }

    async fn new_vouchers(&self, voucher_request: &str) -> Result<serde_json::Value> {
        let response = self
            .post_form(
                ADMIN_RESOURCES,
                "new-voucher",
                &[("voucherRequest", voucher_request)],
                OrchestratorError::Voucher,
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| OrchestratorError::Voucher(format!("malformed voucher response: {}", e)))
    }

    async fn authorize_payer_request(&self, data: &str) -> Result<AuthorizationProof> {
        let proof = self
            .post_for_text(
                VENDOR_RESOURCES,
                "authorize-stripe-request",
                &[("data", data)],
                OrchestratorError::Authorization,
            )
            .await?;
        Ok(AuthorizationProof::new(proof))
    }

    async fn confirm_rotating_key(&self) -> Result<()> {
        self.post_empty(VENDOR_RESOURCES, "confirm-vrk", OrchestratorError::KeyGeneration)
            .await
    }

    async fn clear_candidate_key(&self) -> Result<()> {
        self.post_empty(VENDOR_RESOURCES, "clear-temp-vrk", OrchestratorError::Store)
            .await
    }

    async fn export_jwk(&self) -> Result<serde_json::Value> {
        let response = self
            .get(VENDOR_RESOURCES, "get-tide-jwk", OrchestratorError::Transport)
            .await?;
        response
            .json()
            .await
            .map_err(|e| OrchestratorError::Serialization(format!("malformed JWK: {}", e)))
    }
}

#[async_trait]
impl AuditSink for AdminClient {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        self.get(
            VENDOR_RESOURCES,
            &format!("{}/{}", event.kind.trigger_path(), event.error),
            OrchestratorError::Transport,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realm_url_trims_slash() {
        let client = AdminClient::new("https://id.example.com/", "acme").unwrap();
        assert_eq!(
            client.url(VENDOR_RESOURCES, "sign-message"),
            "https://id.example.com/admin/realms/acme/vendorResources/sign-message"
        );
    }

    #[test]
    fn test_from_config_sets_token() {
        let config = OrchestratorConfig {
            bearer_token: Some("t0k3n".to_string()),
            ..Default::default()
        };
        let client = AdminClient::from_config(&config).unwrap();
        assert_eq!(client.bearer_token.as_deref(), Some("t0k3n"));
    }
}
