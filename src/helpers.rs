use url::Url;

pub(crate) fn cookie_value<'a>(cookie_header: Option<&'a str>, cookie_name: &str) -> Option<&'a str> {
    cookie_header.and_then(|cookie_header| {
        cookie_header.split(';').find_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            if name == cookie_name {
                Some(value)
            } else {
                None
            }
        })
    })
}

pub(crate) fn query_param(url_or_path: &str, key: &str) -> Option<String> {
    let parsed = parse_url_or_path(url_or_path)?;
    parsed
        .query_pairs()
        .find_map(|(k, v)| if k == key { Some(v.into_owned()) } else { None })
}

pub(crate) fn parse_url_or_path(url_or_path: &str) -> Option<Url> {
    if let Ok(url) = Url::parse(url_or_path) {
        return Some(url);
    }

    let normalized = if url_or_path.starts_with('/') {
        format!("http://localhost{url_or_path}")
    } else {
        format!("http://localhost/{url_or_path}")
    };

    Url::parse(&normalized).ok()
}

/// Renders a `Set-Cookie` value. `max_age_secs == None` yields a browser-session cookie.
pub(crate) fn build_set_cookie(
    name: &str,
    value: &str,
    path: &str,
    max_age_secs: Option<u64>,
    secure: bool,
) -> String {
    let mut out = format!("{name}={value}; Path={path}; HttpOnly; SameSite=Lax");
    if let Some(max_age) = max_age_secs {
        out.push_str(&format!("; Max-Age={max_age}"));
    }
    if secure {
        out.push_str("; Secure");
    }
    out
}

pub(crate) fn build_clear_cookie(name: &str, path: &str) -> String {
    build_set_cookie(name, "", path, Some(0), false)
}

pub(crate) fn cookie_path(context_path: &str) -> &str {
    if context_path.is_empty() { "/" } else { context_path }
}

#[cfg(test)]
pub(crate) fn now_secs() -> u64 {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
