use regex::Regex;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::{Duration, Instant};
use url::Url;

use super::settings::{self, Settings, millis};
use super::{Check, CheckError};
use crate::monitoring::types::CheckResult;

const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

/// Settings of an HTTP or HTTPS check
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub url: Url,
    pub port: u16,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub expect_regex: Option<Regex>,
    pub timeout: Duration,
    pub validate_cert: bool,
}

impl HttpSettings {
    pub(super) fn parse(raw: &Settings, tls: bool) -> Result<Self, CheckError> {
        let host = settings::required_str(raw, "host")?;
        let path = settings::optional_str(raw, "path")?.unwrap_or_else(|| "/".to_string());
        let port = settings::optional_u16(raw, "port")?.unwrap_or(if tls { 443 } else { 80 });

        let scheme = if tls { "https" } else { "http" };
        let path = if path.starts_with('/') { path } else { format!("/{path}") };
        let url = Url::parse(&format!("{scheme}://{host}:{port}{path}"))
            .map_err(|e| CheckError::invalid("host", format!("does not form a valid URL: {e}")))?;
        if url.host_str().is_none() {
            return Err(CheckError::invalid("host", "is empty"));
        }

        let method = match settings::optional_str(raw, "method")? {
            None => Method::GET,
            Some(method) => parse_method(&method)?,
        };

        let headers = match settings::optional_str(raw, "headers")? {
            None => HeaderMap::new(),
            Some(raw_headers) => parse_headers(&raw_headers)?,
        };

        let expect_regex = settings::optional_str(raw, "expectRegex")?
            .map(|pattern| Regex::new(&pattern))
            .transpose()
            .map_err(|e| CheckError::invalid("expectRegex", e.to_string()))?;

        Ok(Self {
            url,
            port,
            method,
            headers,
            body: settings::optional_str(raw, "body")?,
            expect_regex,
            timeout: settings::timeout(raw, DEFAULT_TIMEOUT_SECS)?,
            validate_cert: settings::optional_bool(raw, "validateCert")?.unwrap_or(true),
        })
    }
}

fn parse_method(method: &str) -> Result<Method, CheckError> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "HEAD" => Ok(Method::HEAD),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        "OPTIONS" => Ok(Method::OPTIONS),
        other => Err(CheckError::invalid("method", format!("'{other}' is not supported"))),
    }
}

/// Parses newline separated `Name: value` pairs
fn parse_headers(raw: &str) -> Result<HeaderMap, CheckError> {
    let mut headers = HeaderMap::new();
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CheckError::invalid("headers", format!("'{line}' is not 'Name: value'")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| CheckError::invalid("headers", e.to_string()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| CheckError::invalid("headers", e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// HTTP/HTTPS check
pub struct HttpCheck {
    client: reqwest::Client,
    settings: HttpSettings,
}

impl HttpCheck {
    pub fn new(settings: HttpSettings) -> Result<Self, CheckError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(!settings.validate_cert)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CheckError::Execution(format!("unable to build HTTP client: {e}")))?;

        Ok(Self { client, settings })
    }
}

#[async_trait::async_trait]
impl Check for HttpCheck {
    async fn run(&self) -> Result<CheckResult, CheckError> {
        let start = Instant::now();

        let mut request = self
            .client
            .request(self.settings.method.clone(), self.settings.url.clone())
            .headers(self.settings.headers.clone());
        if let Some(body) = &self.settings.body {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Err(CheckError::Execution(e.to_string())),
            Err(e) if e.is_timeout() => return Ok(CheckResult::failure("timeout")),
            Err(e) => return Ok(CheckResult::failure(format!("HTTP request failed: {e}"))),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Ok(CheckResult::failure(format!("failed to read response body: {e}"))),
        };
        let total = millis(start.elapsed());

        let result = if status.is_client_error() || status.is_server_error() {
            CheckResult::failure(format!("invalid status code {}", status.as_u16()))
        } else if self
            .settings
            .expect_regex
            .as_ref()
            .is_some_and(|regex| !regex.is_match(&body))
        {
            CheckResult::failure("expectRegex did not match")
        } else {
            CheckResult::success()
        };

        Ok(result
            .with_metric("total", total)
            .with_metric("statusCode", f64::from(status.as_u16()))
            .with_metric("dataLength", body.len() as f64))
    }
}
