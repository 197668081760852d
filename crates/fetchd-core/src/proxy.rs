//! Proxy resolution: `system` (environment / OS defaults) vs `manual` (explicit mapping).

use std::collections::HashMap;
use std::env;

/// How proxy settings are chosen for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// Consult environment variables (and, where available, OS configuration).
    System,
    /// Use only the explicit mapping passed alongside this mode.
    Manual,
}

/// Resolve the effective proxy mapping (scheme -> endpoint URL).
///
/// Never fails: any lookup error is swallowed and treated as "no proxy" for
/// that scheme. In `Manual` mode, `explicit` is used verbatim (empty maps to
/// `None`). In `System` mode, the `HTTP_PROXY`/`HTTPS_PROXY` environment
/// variables (checked case-insensitively) take precedence over OS-level
/// configuration; on this platform there is no separate OS registry to
/// consult, so the environment is authoritative.
pub fn resolve_proxies(
    mode: ProxyMode,
    explicit: Option<&HashMap<String, String>>,
) -> Option<HashMap<String, String>> {
    match mode {
        ProxyMode::Manual => explicit.filter(|m| !m.is_empty()).cloned(),
        ProxyMode::System => resolve_system_proxies(),
    }
}

fn resolve_system_proxies() -> Option<HashMap<String, String>> {
    let mut proxies = HashMap::new();

    if let Some(v) = env_var_ci("HTTP_PROXY") {
        proxies.insert("http".to_string(), v);
    }
    if let Some(v) = env_var_ci("HTTPS_PROXY") {
        proxies.insert("https".to_string(), v);
    }
    // ALL_PROXY covers both schemes when neither scheme-specific variable is set.
    if let Some(v) = env_var_ci("ALL_PROXY") {
        proxies.entry("http".to_string()).or_insert_with(|| v.clone());
        proxies.entry("https".to_string()).or_insert(v);
    }

    if proxies.is_empty() {
        None
    } else {
        Some(proxies)
    }
}

/// Applies a resolved proxy mapping to a curl handle for a request against
/// `target_url`, matching by URL scheme. No-op when there is no proxy
/// configured for that scheme (including when `proxies` is `None`).
pub fn apply_to_easy(
    easy: &mut curl::easy::Easy,
    proxies: &Option<HashMap<String, String>>,
    target_url: &str,
) -> Result<(), curl::Error> {
    let Some(proxies) = proxies else { return Ok(()) };
    let Some(scheme) = target_url.split_once("://").map(|(s, _)| s.to_ascii_lowercase()) else {
        return Ok(());
    };
    let Some(proxy_url) = proxies.get(&scheme) else { return Ok(()) };

    easy.proxy(proxy_url)?;
    if let Some(proxy_scheme) = proxy_url.split_once("://").map(|(s, _)| s.to_ascii_lowercase()) {
        let proxy_type = match proxy_scheme.as_str() {
            "socks5h" => curl::easy::ProxyType::Socks5Hostname,
            "socks5" => curl::easy::ProxyType::Socks5,
            "socks4a" => curl::easy::ProxyType::Socks4a,
            "socks4" => curl::easy::ProxyType::Socks4,
            _ => curl::easy::ProxyType::Http,
        };
        easy.proxy_type(proxy_type)?;
    }
    Ok(())
}

/// Looks up an environment variable by name, then by its lowercase form,
/// matching the common shell convention of exporting both `HTTP_PROXY` and
/// `http_proxy`.
fn env_var_ci(name: &str) -> Option<String> {
    env::var(name)
        .or_else(|_| env::var(name.to_ascii_lowercase()))
        .ok()
        .filter(|v| !v.is_empty())
}
