use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode, redirect};

use super::checker::Checker;
use super::ntlm::{self, Credentials};
use super::status_codes::AcceptedStatusCodes;
use super::tls::certificate_info;
use super::types::{CertificateInfo, ProbeResult};
use crate::database::models::{HttpAuth, HttpSettings, KeywordRule, Proxy};

/// How much of a body is quoted when a keyword rule fails
const BODY_EXCERPT_CHARS: usize = 50;

const USER_AGENT: &str = concat!("Vigil/", env!("CARGO_PKG_VERSION"));

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
    url: reqwest::Url,
    method: Method,
    headers: HeaderMap,
    body: Option<String>,
    auth: HttpAuth,
    accepted: AcceptedStatusCodes,
    keyword: Option<KeywordRule>,
}

impl HttpChecker {
    /// Build the client once per loop; every setting problem is reported here
    pub fn new(settings: &HttpSettings, proxy: Option<&Proxy>, timeout: Duration) -> Result<Self, String> {
        let url = reqwest::Url::parse(&settings.url).map_err(|e| format!("invalid URL: {e}"))?;
        let method = Method::from_bytes(settings.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid HTTP method `{}`", settings.method))?;
        let accepted = AcceptedStatusCodes::parse(&settings.accepted_status_codes)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| format!("invalid header name `{name}`"))?;
            let value = HeaderValue::from_str(value).map_err(|_| format!("invalid value for header `{name}`"))?;
            headers.insert(name, value);
        }

        let redirect_policy = if settings.max_redirects == 0 {
            redirect::Policy::none()
        } else {
            redirect::Policy::limited(settings.max_redirects as usize)
        };

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(redirect_policy)
            .danger_accept_invalid_certs(settings.ignore_tls)
            .tls_info(true);

        // NTLM authenticates the connection, so the handshake must stay on one socket
        if matches!(settings.auth, HttpAuth::Ntlm { .. }) {
            builder = builder.http1_only().pool_max_idle_per_host(1);
        }

        if let Some(proxy) = proxy {
            let mut reqwest_proxy =
                reqwest::Proxy::all(proxy.url()).map_err(|e| format!("invalid proxy `{}`: {e}", proxy.name))?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                reqwest_proxy = reqwest_proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(reqwest_proxy);
        }

        let client = builder.build().map_err(|e| format!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            client,
            url,
            method,
            headers,
            body: settings.body.clone(),
            auth: settings.auth.clone(),
            accepted,
            keyword: settings.keyword.clone(),
        })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let mut request = self.client.request(self.method.clone(), self.url.clone()).headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }
        if let HttpAuth::Basic { username, password } = &self.auth {
            request = request.basic_auth(username, Some(password));
        }
        request
    }

    async fn send(&self) -> Result<reqwest::Response, String> {
        let HttpAuth::Ntlm { username, password, domain, workstation } = &self.auth else {
            return self.request().send().await.map_err(describe_error);
        };

        let first = self
            .request()
            .header(AUTHORIZATION, format!("NTLM {}", ntlm::negotiate_message()))
            .send()
            .await
            .map_err(describe_error)?;

        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        let encoded = first
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| value.strip_prefix("NTLM "))
            .map(str::to_string);
        let Some(encoded) = encoded else {
            return Ok(first);
        };
        // drain so the connection goes back to the pool for the second leg
        let _ = first.bytes().await;

        let challenge = ntlm::parse_challenge(&encoded).map_err(|e| format!("NTLM: {e}"))?;
        let credentials = Credentials { username, password, domain, workstation };
        let answer = ntlm::authenticate_message(&credentials, &challenge).map_err(|e| format!("NTLM: {e}"))?;

        self.request()
            .header(AUTHORIZATION, format!("NTLM {answer}"))
            .send()
            .await
            .map_err(describe_error)
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self) -> ProbeResult {
        let start = Instant::now();

        let response = match self.send().await {
            Ok(response) => response,
            Err(message) => return ProbeResult::down(message),
        };

        let certificate = peer_certificate(&response);
        let status = response.status();
        let status_line = format!("{} - {}", status.as_u16(), status.canonical_reason().unwrap_or("Unknown"));

        if !self.accepted.contains(status.as_u16()) {
            let latency = start.elapsed().as_millis() as u64;
            return ProbeResult::down(status_line).with_latency(latency).with_certificate(certificate);
        }

        let Some(rule) = &self.keyword else {
            let latency = start.elapsed().as_millis() as u64;
            return ProbeResult::up(latency, status_line).with_certificate(certificate);
        };

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return ProbeResult::down(describe_error(e)).with_certificate(certificate),
        };
        let latency = start.elapsed().as_millis() as u64;

        let found = body.contains(&rule.keyword);
        if found != rule.invert {
            let verdict = if rule.invert { "not found" } else { "is found" };
            ProbeResult::up(latency, format!("{status_line}, keyword {verdict}")).with_certificate(certificate)
        } else {
            let excerpt: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
            let verdict = if rule.invert { "is present" } else { "is not" };
            ProbeResult::down(format!("{status_line}, but keyword {verdict} in [{excerpt}...]"))
                .with_latency(latency)
                .with_certificate(certificate)
        }
    }
}

fn peer_certificate(response: &reqwest::Response) -> Option<CertificateInfo> {
    response
        .extensions()
        .get::<reqwest::tls::TlsInfo>()
        .and_then(|info| info.peer_certificate())
        .and_then(certificate_info)
}

fn describe_error(error: reqwest::Error) -> String {
    if error.is_timeout() {
        "timeout exceeded".to_string()
    } else if error.is_redirect() {
        format!("too many redirects: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    }
}
