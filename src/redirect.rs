use url::{Url, form_urlencoded};

use crate::deployment::Deployment;
use crate::error::RedirectError;

/// Query parameters that only mean something to the handshake itself.
pub const PROTOCOL_PARAMS: [&str; 2] = ["code", "state"];

const DEFAULT_SECURE_PORT: u16 = 443;

/// Authorization endpoint URL the browser is sent to for `state`.
///
/// The callback is the current request URL without protocol parameters. When
/// the deployment requires secure transport and the request arrived insecure,
/// the callback is upgraded to `https` on the confidential port; with no such
/// port configured there is no safe redirect.
pub fn login_redirect_url(
    deployment: &Deployment,
    request_url: &str,
    request_secure: bool,
    state: &str,
) -> Result<String, RedirectError> {
    let invalid = |reason: String| RedirectError::InvalidRequestUrl {
        url: request_url.to_string(),
        reason,
    };

    let mut callback =
        Url::parse(&sanitize_redirect(request_url)).map_err(|err| invalid(err.to_string()))?;
    callback.set_fragment(None);

    if !request_secure && deployment.require_secure_transport() {
        let port = deployment
            .confidential_port()
            .ok_or(RedirectError::NoConfidentialPort)?;
        callback
            .set_scheme("https")
            .map_err(|_| invalid("scheme cannot be upgraded to https".to_string()))?;
        let port = (port != DEFAULT_SECURE_PORT).then_some(port);
        callback
            .set_port(port)
            .map_err(|_| invalid("url cannot carry a port".to_string()))?;
    }

    let mut auth_url = deployment.auth_url().clone();
    {
        let mut query = auth_url.query_pairs_mut();
        query
            .append_pair("client_id", deployment.client_id())
            .append_pair("redirect_uri", callback.as_str())
            .append_pair("state", state)
            .append_pair("login", "true");
        if let Some(scope) = deployment.scope() {
            query.append_pair("scope", scope);
        }
    }

    Ok(auth_url.to_string())
}

/// Drops `code` and `state` from `request_url`, leaving every other
/// parameter byte-for-byte and in its original order.
pub fn sanitize_redirect(request_url: &str) -> String {
    let (head, fragment) = match request_url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (request_url, None),
    };
    let Some((base, query)) = head.split_once('?') else {
        return request_url.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|segment| !segment.is_empty() && !is_protocol_param(segment))
        .collect();

    let mut out = base.to_string();
    if !kept.is_empty() {
        out.push('?');
        out.push_str(&kept.join("&"));
    }
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

fn is_protocol_param(segment: &str) -> bool {
    form_urlencoded::parse(segment.as_bytes())
        .next()
        .is_some_and(|(name, _)| PROTOCOL_PARAMS.contains(&name.as_ref()))
}
