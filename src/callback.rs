use crate::deployment::Deployment;
use crate::error::LoginError;
use crate::helpers::build_clear_cookie;
use crate::http::{HttpRequest, HttpResponse};

/// Checks the callback `state` parameter against the state cookie.
///
/// The state cookie is cleared on every call, whatever the outcome, so a
/// state value is never accepted twice.
pub fn validate_state(
    deployment: &Deployment,
    request: &HttpRequest,
    response: &mut HttpResponse,
) -> Result<(), LoginError> {
    let cookie_name = deployment.state_cookie_name();

    log::debug!("resetting state cookie {cookie_name}");
    response.add_cookie(build_clear_cookie(cookie_name, request.cookie_path()));

    let Some(expected) = request.cookie(cookie_name).filter(|v| !v.is_empty()) else {
        log::warn!("No state cookie");
        return Err(LoginError::MissingStateCookie);
    };

    let Some(state) = request.query_param("state").filter(|v| !v.is_empty()) else {
        log::warn!("state parameter was null");
        return Err(LoginError::MissingStateParameter);
    };

    if state != expected {
        log::warn!("state parameter invalid");
        log::warn!("cookie: {expected}");
        log::warn!("queryParam: {state}");
        return Err(LoginError::StateMismatch);
    }

    Ok(())
}
