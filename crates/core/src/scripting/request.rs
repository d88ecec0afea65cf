//! Outbound HTTP for plugin scripts.
//!
//! Scripts may call public HTTP(S) endpoints only. Targets are checked by
//! parsed host before any connection is attempted; redirects are not
//! followed, so a public endpoint cannot bounce a request into the private
//! network.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use reqwest::Url;
use serde_json::{json, Map, Value};

/// `User-Agent` sent when the script does not set one.
pub const DEFAULT_USER_AGENT: &str = "panelgate-plugin/1.0";

/// Timeout applied when the script does not ask for one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on any script-requested timeout.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether scripts may reach the network at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPolicy {
    /// Public destinations only.
    #[default]
    PublicOnly,
    /// Every request fails without touching the network.
    Deny,
}

/// Why a target URL was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlRejection {
    #[error("Invalid URL: {0}")]
    Malformed(String),
    #[error("URL not allowed")]
    Forbidden,
}

/// Parse `raw` and ensure it points at a public HTTP(S) host.
pub fn check_url(raw: &str) -> Result<Url, UrlRejection> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlRejection::Malformed(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlRejection::Forbidden);
    }
    let host = url.host_str().ok_or(UrlRejection::Forbidden)?;
    if is_forbidden_host(host) {
        return Err(UrlRejection::Forbidden);
    }
    Ok(url)
}

fn is_forbidden_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_forbidden_ip(ip);
    }
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == "localhost" || host.ends_with(".localhost")
}

fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_forbidden_v4(v4),
            None => is_forbidden_v6(v6),
        },
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    ip.is_loopback() || ip.is_unspecified() || unique_local || link_local
}

/// Timeout for one request: the script's value in milliseconds, capped.
pub fn request_timeout(requested: Option<&Value>) -> Duration {
    let ms = requested
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .filter(|ms| *ms > 0);
    match ms {
        Some(ms) => Duration::from_millis(ms).min(MAX_REQUEST_TIMEOUT),
        None => DEFAULT_REQUEST_TIMEOUT,
    }
}

/// Perform the request described by `options` and shape the result for
/// the script.
///
/// `options` fields: `url` (required), `method` (default `GET`), `headers`
/// (object of strings), `data` (string or JSON body), `timeout` (ms).
///
/// A JSON response body is returned parsed. Any other body comes back as
/// `{status, body, headers}`. Failures come back as `{error}`; this
/// function never fails the script itself.
pub fn perform_request(options: &Value, policy: RequestPolicy) -> Value {
    match send(options, policy) {
        Ok(value) => value,
        Err(message) => json!({ "error": message }),
    }
}

fn send(options: &Value, policy: RequestPolicy) -> Result<Value, String> {
    let raw_url = options
        .get("url")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| "URL is required".to_string())?;

    if policy == RequestPolicy::Deny {
        return Err("Outbound requests are disabled".to_string());
    }
    let url = check_url(raw_url).map_err(|e| e.to_string())?;

    let method_name = options
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_ascii_uppercase();
    let method = reqwest::Method::from_bytes(method_name.as_bytes())
        .map_err(|_| format!("Invalid method: {method_name}"))?;

    let client = reqwest::blocking::Client::builder()
        .timeout(request_timeout(options.get("timeout")))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| e.to_string())?;

    let mut request = client.request(method, url);
    let mut has_user_agent = false;
    if let Some(Value::Object(headers)) = options.get("headers") {
        for (name, value) in headers {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            has_user_agent |= name.eq_ignore_ascii_case("user-agent");
            request = request.header(name.as_str(), value);
        }
    }
    if !has_user_agent {
        request = request.header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT);
    }
    match options.get("data") {
        None | Some(Value::Null) => {}
        Some(Value::String(body)) => request = request.body(body.clone()),
        Some(other) => {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(other.to_string())
        }
    }

    let response = request.send().map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let mut headers = Map::new();
    for (name, value) in response.headers() {
        headers
            .entry(name.as_str().to_string())
            .or_insert_with(|| Value::String(value.to_str().unwrap_or_default().to_string()));
    }
    let body = response.text().map_err(|e| e.to_string())?;

    Ok(match serde_json::from_str::<Value>(&body) {
        Ok(parsed) => parsed,
        Err(_) => json!({ "status": status, "body": body, "headers": headers }),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn public_hosts_are_allowed() {
        assert!(check_url("https://example.com/api").is_ok());
        assert!(check_url("http://8.8.8.8/").is_ok());
        assert!(check_url("http://172.32.0.1/").is_ok());
        // Private-looking text outside the host does not matter.
        assert!(check_url("https://example.com/10.0.0.1?next=localhost").is_ok());
    }

    #[test]
    fn private_and_loopback_hosts_are_rejected() {
        for url in [
            "http://192.168.1.5/",
            "http://10.0.0.1/",
            "http://172.16.0.1/",
            "http://172.31.255.255/",
            "http://127.0.0.1:8080/",
            "http://0.0.0.0/",
            "http://169.254.169.254/latest/meta-data",
            "http://localhost/",
            "http://api.localhost/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:10.0.0.1]/",
        ] {
            assert_eq!(check_url(url), Err(UrlRejection::Forbidden), "{url}");
        }
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        assert_eq!(check_url("ftp://example.com/"), Err(UrlRejection::Forbidden));
        assert_eq!(check_url("file:///etc/passwd"), Err(UrlRejection::Forbidden));
    }

    #[test]
    fn malformed_url_is_reported() {
        assert_matches!(check_url("not a url"), Err(UrlRejection::Malformed(_)));
    }

    #[test]
    fn timeout_defaults_and_caps() {
        assert_eq!(request_timeout(None), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(request_timeout(Some(&json!(0))), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(
            request_timeout(Some(&json!(2500))),
            Duration::from_millis(2500)
        );
        assert_eq!(request_timeout(Some(&json!(120_000))), MAX_REQUEST_TIMEOUT);
        assert_eq!(request_timeout(Some(&json!("soon"))), DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn private_target_yields_error_object() {
        let out = perform_request(&json!({ "url": "http://192.168.1.5/" }), RequestPolicy::PublicOnly);
        assert_eq!(out, json!({ "error": "URL not allowed" }));
    }

    #[test]
    fn missing_url_yields_error_object() {
        let out = perform_request(&json!({ "method": "GET" }), RequestPolicy::PublicOnly);
        assert_eq!(out, json!({ "error": "URL is required" }));
    }

    #[test]
    fn deny_policy_never_sends() {
        let out = perform_request(&json!({ "url": "https://example.com" }), RequestPolicy::Deny);
        assert_eq!(out, json!({ "error": "Outbound requests are disabled" }));
    }
}
