//! Browser-redirect OAuth2/OIDC authorization code login for a protected web resource.
//!
//! [`OAuthLogin`] performs the handshake on behalf of the host web framework:
//!
//! 1. An unauthenticated request arrives. [`OAuthLogin::login_redirect`] issues a
//!    state token, stores it in a cookie and redirects the browser to the
//!    authorization endpoint.
//! 2. The user authenticates and the browser comes back with `code` and `state`.
//! 3. [`OAuthLogin::resolve_code`] checks transport security and the state
//!    cookie, exchanges the code at the token endpoint, verifies the returned
//!    tokens, applies the realm's not-before watermark and finally redirects to
//!    the request URL without the protocol parameters.
//!
//! Every failure ends the exchange with exactly one error response: `400` for
//! state problems, `403` for everything else. Token endpoint detail is logged,
//! never sent to the client.
//!
//! ```ignore
//! let deployment = Arc::new(Deployment::from_path("adapter.json")?);
//! let login = OAuthLogin::new(deployment)?;
//!
//! let request = HttpRequest::new(full_url)
//!     .secure(is_tls)
//!     .cookie_header(cookie_header)
//!     .context_path("/portal");
//! let handled = login.handle(&request);
//! apply(handled.response);
//! if let Ok(Some(authenticated)) = handled.outcome {
//!     start_session(authenticated.token, authenticated.refresh_token);
//! }
//! ```

mod callback;
mod deployment;
mod error;
mod helpers;
mod http;
mod redirect;
mod state;
mod token_endpoint;
mod verifier;

use std::sync::Arc;

pub use callback::validate_state;
pub use deployment::{
    AdapterConfig, Credentials, DEFAULT_CONFIDENTIAL_PORT, DEFAULT_STATE_COOKIE_NAME, Deployment,
    DeploymentBuilder, NotBefore,
};
pub use error::{ConfigError, ExchangeError, LoginError, RedirectError, VerificationError};
pub use http::{HttpRequest, HttpResponse};
pub use redirect::{PROTOCOL_PARAMS, login_redirect_url, sanitize_redirect};
pub use state::{StateSource, StateTokenIssuer};
pub use token_endpoint::{HttpTokenEndpoint, TokenEndpoint, TokenResponse};
pub use verifier::{IdToken, RsaTokenVerifier, TokenVerifier, VerificationKey, VerifiedToken};

use error::STATUS_BAD_REQUEST;
use helpers::build_set_cookie;

/// Progress of one callback through the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoginStage {
    Start,
    TransportChecked,
    StateValidated,
    CodeExchanged,
    TokenVerified,
    FreshnessChecked,
    Complete,
}

/// Terminal failure: the error and the last stage the exchange had reached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("login rejected after {stage:?}: {error}")]
pub struct Rejection {
    pub stage: LoginStage,
    pub error: LoginError,
}

/// Response for the host plus what happened.
#[derive(Debug, Clone)]
pub struct Handled<T> {
    pub response: HttpResponse,
    pub outcome: Result<T, Rejection>,
}

impl<T> Handled<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Handled<U> {
        Handled {
            response: self.response,
            outcome: self.outcome.map(f),
        }
    }
}

/// The protocol values carried by one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    redirect_target: String,
}

impl LoginAttempt {
    pub fn from_request(request: &HttpRequest) -> Self {
        Self {
            code: request.query_param("code"),
            state: request.query_param("state"),
            error: request.query_param("error"),
            redirect_target: sanitize_redirect(request.url()),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    /// Error reported by the authorization server, if any. Not acted on here.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn redirect_target(&self) -> &str {
        &self.redirect_target
    }
}

/// Result of a completed handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedLogin {
    pub token_string: String,
    pub token: VerifiedToken,
    pub id_token_string: Option<String>,
    pub id_token: Option<IdToken>,
    pub refresh_token: Option<String>,
    pub redirect_target: String,
}

pub struct OAuthLogin {
    deployment: Arc<Deployment>,
    states: Arc<dyn StateSource>,
    token_endpoint: Arc<dyn TokenEndpoint>,
    verifier: Arc<dyn TokenVerifier>,
}

impl OAuthLogin {
    /// Handler with the stock collaborators: counter+uuid state tokens, an
    /// HTTP token endpoint client and the RS256 verifier.
    pub fn new(deployment: Arc<Deployment>) -> Result<Self, ExchangeError> {
        Ok(Self::with_collaborators(
            deployment,
            Arc::new(StateTokenIssuer::new()),
            Arc::new(HttpTokenEndpoint::new()?),
            Arc::new(RsaTokenVerifier::new()),
        ))
    }

    pub fn with_collaborators(
        deployment: Arc<Deployment>,
        states: Arc<dyn StateSource>,
        token_endpoint: Arc<dyn TokenEndpoint>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            deployment,
            states,
            token_endpoint,
            verifier,
        }
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Redirects to the authorization endpoint when the request carries no
    /// `code`, otherwise resolves the code. `outcome` is `Ok(None)` for a
    /// login redirect.
    ///
    /// An authorization-server `error` parameter is not handled; hosts that
    /// care should check [`LoginAttempt::error`] first.
    pub fn handle(&self, request: &HttpRequest) -> Handled<Option<AuthenticatedLogin>> {
        if request.query_param("code").is_some() {
            self.resolve_code(request).map(Some)
        } else {
            self.login_redirect(request).map(|_| None)
        }
    }

    /// Starts a login. On success the response carries the state cookie and
    /// the redirect, and `outcome` holds the issued state.
    pub fn login_redirect(&self, request: &HttpRequest) -> Handled<String> {
        let mut response = HttpResponse::new();
        let state = self.states.issue();

        let url = match login_redirect_url(
            &self.deployment,
            request.url(),
            request.is_secure(),
            &state,
        ) {
            Ok(url) => url,
            Err(err) => {
                log::error!("cannot redirect to login: {err}");
                let error = LoginError::from(err);
                response.send_error(error.status());
                return Handled {
                    response,
                    outcome: Err(Rejection {
                        stage: LoginStage::Start,
                        error,
                    }),
                };
            }
        };

        response.add_cookie(build_set_cookie(
            self.deployment.state_cookie_name(),
            &state,
            request.cookie_path(),
            None,
            self.deployment.require_secure_transport(),
        ));
        response.send_redirect(&url);

        Handled {
            response,
            outcome: Ok(state),
        }
    }

    /// Completes a login from the authorization server's callback.
    pub fn resolve_code(&self, request: &HttpRequest) -> Handled<AuthenticatedLogin> {
        let mut response = HttpResponse::new();
        let mut stage = LoginStage::Start;

        match self.run_callback(request, &mut response, &mut stage) {
            Ok(login) => {
                response.send_redirect(&login.redirect_target);
                Handled {
                    response,
                    outcome: Ok(login),
                }
            }
            Err(error) => {
                response.send_error(error.status());
                Handled {
                    response,
                    outcome: Err(Rejection { stage, error }),
                }
            }
        }
    }

    fn run_callback(
        &self,
        request: &HttpRequest,
        response: &mut HttpResponse,
        stage: &mut LoginStage,
    ) -> Result<AuthenticatedLogin, LoginError> {
        self.check_transport(request)?;
        *stage = LoginStage::TransportChecked;

        validate_state(&self.deployment, request, response)?;
        *stage = LoginStage::StateValidated;

        let attempt = LoginAttempt::from_request(request);
        let tokens = self.exchange_code(&attempt)?;
        *stage = LoginStage::CodeExchanged;

        let (token, id_token) = self.verify_tokens(&tokens)?;
        *stage = LoginStage::TokenVerified;

        self.check_freshness(&tokens, &token)?;
        *stage = LoginStage::FreshnessChecked;

        let login = AuthenticatedLogin {
            token_string: tokens.access_token,
            token,
            id_token_string: tokens.id_token,
            id_token,
            refresh_token: tokens.refresh_token,
            redirect_target: attempt.redirect_target,
        };
        *stage = LoginStage::Complete;
        Ok(login)
    }

    fn check_transport(&self, request: &HttpRequest) -> Result<(), LoginError> {
        if self.deployment.require_secure_transport() && !request.is_secure() {
            log::error!("SSL is required");
            return Err(LoginError::TransportNotSecure);
        }
        Ok(())
    }

    fn exchange_code(&self, attempt: &LoginAttempt) -> Result<TokenResponse, LoginError> {
        let Some(code) = attempt.code().filter(|c| !c.trim().is_empty()) else {
            log::error!("callback carries no authorization code");
            return Err(LoginError::ExchangeRejected {
                status: STATUS_BAD_REQUEST,
                detail: Some("missing authorization code".to_string()),
            });
        };

        self.token_endpoint
            .exchange_code(&self.deployment, code, attempt.redirect_target())
            .map_err(|err| {
                log::error!("failed to turn code into token");
                match &err {
                    ExchangeError::Http { status, error } => {
                        log::error!("status from server: {status}");
                        if *status == STATUS_BAD_REQUEST
                            && let Some(error) = error
                        {
                            log::error!("   {error}");
                        }
                    }
                    ExchangeError::Transport(msg) => log::error!("   {msg}"),
                }
                LoginError::from(err)
            })
    }

    fn verify_tokens(
        &self,
        tokens: &TokenResponse,
    ) -> Result<(VerifiedToken, Option<IdToken>), LoginError> {
        let key = self.deployment.realm_key();

        let verified = self
            .verifier
            .verify_access_token(&tokens.access_token, key, self.deployment.realm())
            .and_then(|token| {
                let id_token = tokens
                    .id_token
                    .as_deref()
                    .map(|id| self.verifier.parse_id_token(id, key))
                    .transpose()?;
                Ok((token, id_token))
            });

        match verified {
            Ok(tokens) => {
                log::debug!("Token Verification succeeded!");
                Ok(tokens)
            }
            Err(err) => {
                log::error!("failed verification of token: {err}");
                Err(err.into())
            }
        }
    }

    fn check_freshness(
        &self,
        tokens: &TokenResponse,
        token: &VerifiedToken,
    ) -> Result<(), LoginError> {
        if tokens.not_before_policy > self.deployment.not_before() {
            self.deployment.advance_not_before(tokens.not_before_policy);
        }

        let not_before = self.deployment.not_before();
        if token.issued_at < not_before {
            log::error!(
                "Stale token: issued at {} before not-before {not_before}",
                token.issued_at
            );
            return Err(LoginError::StaleToken);
        }
        Ok(())
    }
}
