//! Web probe: a minimal-verb request with optional expectation rules.
//!
//! HEAD is used unless a body rule forces GET. Default success is any
//! 2xx-3xx; channels fronting authenticated services can opt into treating
//! 401/403 as reachable. The HTTP client sits behind a trait so tests can
//! substitute a scripted implementation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use isahc::config::Configurable;
use serde::{Deserialize, Serialize};

use crate::core::probes::ProbeOutcome;
use crate::core::types::{FailureKind, MonitorError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebProbe {
    pub url: String,
    #[serde(default)]
    pub expect: WebExpect,
    /// Treat 401/403 as reachable (service is up, we are just unauthenticated)
    #[serde(default)]
    pub auth_reachable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebExpect {
    /// Exact allowed status codes; replaces the default 2xx-3xx rule
    pub status_in: Option<Vec<u16>>,
    /// Inclusive allowed status range; replaces the default 2xx-3xx rule
    pub status_range: Option<(u16, u16)>,
    /// Response header that must be present with this exact value
    pub header: Option<HeaderRule>,
    /// Pattern the response body must match (forces a GET)
    pub body_regex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderRule {
    pub name: String,
    pub value: String,
}

pub struct WebRequest {
    pub method: &'static str,
    pub url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub want_body: bool,
}

pub struct WebResponse {
    pub status: u16,
    pub latency_ms: u64,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

pub struct WebFailure {
    pub kind: FailureKind,
    pub latency_ms: Option<u64>,
    pub message: String,
}

/// HTTP client abstraction for dependency injection and testing
#[async_trait::async_trait]
pub trait WebClient: Send + Sync {
    async fn request(&self, request: WebRequest) -> Result<WebResponse, WebFailure>;
}

/// Production client backed by isahc
pub struct IsahcWebClient {
    client: isahc::HttpClient,
}

impl IsahcWebClient {
    pub fn new(allow_proxy: bool) -> Result<Self, MonitorError> {
        let mut builder = isahc::HttpClient::builder();
        if !allow_proxy {
            builder = builder.proxy(None);
        }
        let client = builder
            .build()
            .map_err(|e| MonitorError::Http(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl WebClient for IsahcWebClient {
    async fn request(&self, request: WebRequest) -> Result<WebResponse, WebFailure> {
        let start = Instant::now();

        let req = isahc::Request::builder()
            .method(request.method)
            .uri(&request.url)
            .header("user-agent", &request.user_agent)
            .timeout(Duration::from_millis(request.timeout_ms))
            .body(())
            .map_err(|e| WebFailure {
                kind: FailureKind::Http,
                latency_ms: None,
                message: format!("request build failed: {}", e),
            })?;

        let mut response = self.client.send_async(req).await.map_err(|e| WebFailure {
            kind: classify_isahc_error(&e),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            message: e.to_string(),
        })?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        let body = if request.want_body {
            use isahc::AsyncReadResponseExt;
            Some(response.text().await.map_err(|e| WebFailure {
                kind: FailureKind::Http,
                latency_ms: Some(latency_ms),
                message: format!("body read failed: {}", e),
            })?)
        } else {
            None
        };

        Ok(WebResponse {
            status: response.status().as_u16(),
            latency_ms,
            headers,
            body,
        })
    }
}

fn classify_isahc_error(error: &isahc::Error) -> FailureKind {
    use isahc::error::ErrorKind;
    match error.kind() {
        ErrorKind::Timeout => FailureKind::Timeout,
        ErrorKind::NameResolution => FailureKind::NameResolution,
        ErrorKind::ConnectionFailed | ErrorKind::Io => FailureKind::Socket,
        ErrorKind::TlsEngine | ErrorKind::BadServerCertificate => FailureKind::Tls,
        _ => FailureKind::Http,
    }
}

pub async fn run(
    probe: &WebProbe,
    user_agent: &str,
    timeout_ms: u64,
    client: &dyn WebClient,
) -> ProbeOutcome {
    let want_body = probe.expect.body_regex.is_some();
    let method = if want_body { "GET" } else { "HEAD" };

    let response = match client
        .request(WebRequest {
            method,
            url: probe.url.clone(),
            user_agent: user_agent.to_string(),
            timeout_ms,
            want_body,
        })
        .await
    {
        Ok(response) => response,
        Err(failure) => {
            return ProbeOutcome::failure(failure.kind, failure.latency_ms, failure.message)
                .with_detail("method", method.into())
        }
    };

    match evaluate_expectations(probe, &response) {
        Ok(()) => ProbeOutcome::success(response.latency_ms)
            .with_detail("status", response.status.into())
            .with_detail("method", method.into()),
        Err(reason) => {
            ProbeOutcome::failure(FailureKind::Http, Some(response.latency_ms), reason)
                .with_detail("status", response.status.into())
                .with_detail("method", method.into())
        }
    }
}

fn evaluate_expectations(probe: &WebProbe, response: &WebResponse) -> Result<(), String> {
    let status = response.status;

    let status_ok = if probe.auth_reachable && (status == 401 || status == 403) {
        true
    } else if let Some(allowed) = &probe.expect.status_in {
        allowed.contains(&status)
    } else if let Some((low, high)) = probe.expect.status_range {
        status >= low && status <= high
    } else {
        (200..400).contains(&status)
    };
    if !status_ok {
        return Err(format!("status {} outside expectation", status));
    }

    if let Some(rule) = &probe.expect.header {
        let actual = response.headers.get(&rule.name.to_ascii_lowercase());
        if actual.map(|v| v.as_str()) != Some(rule.value.as_str()) {
            return Err(format!(
                "header {} is {:?}, expected {:?}",
                rule.name, actual, rule.value
            ));
        }
    }

    if let Some(pattern) = &probe.expect.body_regex {
        let regex = regex::Regex::new(pattern)
            .map_err(|e| format!("invalid body pattern {:?}: {}", pattern, e))?;
        let body = response.body.as_deref().unwrap_or("");
        if !regex.is_match(body) {
            return Err(format!("body does not match {:?}", pattern));
        }
    }

    Ok(())
}
