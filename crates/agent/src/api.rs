// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST client for the orchestrator's registration boundary.
//!
//! Only the three endpoints the credential bootstrap needs: registration
//! status, machine-user sign-up, and token refresh.

use crate::credentials::Credentials;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Registration policy reported by the orchestrator.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatus {
    pub needs_setup: bool,
    pub registration_enabled: bool,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid API base url: {0}")]
    BadUrl(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {endpoint}")]
    Status { endpoint: &'static str, status: u16 },

    #[error("public registration is disabled on this orchestrator")]
    RegistrationClosed,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// HTTP client bound to one orchestrator.
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Result<Self, ApiError> {
        let base = base.into();
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(ApiError::BadUrl(base));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { base: base.trim_end_matches('/').to_string(), http })
    }

    pub async fn registration_status(&self) -> Result<RegistrationStatus, ApiError> {
        let url = format!("{}/api/registration", self.base);
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                endpoint: "registration",
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Register a machine user with a generated credential. The caller
    /// persists the returned credentials keyed by orchestrator URL.
    pub async fn register_machine_user(&self, node_name: &str) -> Result<Credentials, ApiError> {
        let status = self.registration_status().await?;
        if !status.registration_enabled {
            return Err(ApiError::RegistrationClosed);
        }

        let email = format!("{}-{}@machine.local", node_name, nanoid::nanoid!(6));
        let password = nanoid::nanoid!(32);
        let url = format!("{}/api/register", self.base);
        let response = self
            .http
            .post(url)
            .json(&RegisterRequest { email: &email, password: &password })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                endpoint: "register",
                status: response.status().as_u16(),
            });
        }
        info!(email, "registered machine user");
        Ok(response.json().await?)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Credentials, ApiError> {
        let url = format!("{}/api/refresh", self.base);
        let response = self
            .http
            .post(url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                endpoint: "refresh",
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
