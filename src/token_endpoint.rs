use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::deployment::Deployment;
use crate::error::ExchangeError;

/// Successful token endpoint reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub session_state: Option<String>,
    #[serde(default, rename = "not-before-policy")]
    pub not_before_policy: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges an authorization code for tokens. Blocks for the round trip.
pub trait TokenEndpoint: Send + Sync {
    fn exchange_code(
        &self,
        deployment: &Deployment,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, ExchangeError>;
}

/// `TokenEndpoint` that POSTs to the deployment's token URL over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: Client,
}

impl HttpTokenEndpoint {
    pub fn new() -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl TokenEndpoint for HttpTokenEndpoint {
    fn exchange_code(
        &self,
        deployment: &Deployment,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, ExchangeError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let mut request = self.client.post(deployment.token_url().as_str());
        match deployment.client_secret() {
            Some(secret) => {
                request = request.basic_auth(deployment.client_id(), Some(secret));
            }
            None => form.push(("client_id", deployment.client_id())),
        }

        let response = request.form(&form).send()?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                error: error_detail(status, &body),
            });
        }

        Ok(response.json()?)
    }
}

fn error_detail(status: StatusCode, body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if status == StatusCode::BAD_REQUEST
        && let Ok(parsed) = serde_json::from_str::<ErrorBody>(body)
        && let Some(error) = parsed.error
    {
        return Some(match parsed.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        });
    }

    Some(body.to_string())
}
