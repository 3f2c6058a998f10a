//! HTTP transport collaborator.
//!
//! The order machinery never touches sockets; every request goes through an [`HttpClient`]. The
//! default implementation is [`ReqwestClient`].

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::{
    api::Problem,
    error::{Error, Result},
};

/// HTTP methods used by ACME.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: Method::Get,
            url: url.to_owned(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn head(url: &str) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    /// A JWS POST with the `application/jose+json` content type.
    pub fn post_jose(url: &str, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.to_owned(),
            headers: vec![(
                "content-type".to_owned(),
                "application/jose+json".to_owned(),
            )],
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,

    /// Header names are expected in lowercase.
    pub headers: Vec<(String, String)>,

    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns the first value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends HTTP requests on behalf of the client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends `req`, returning any response the server gives (including error statuses).
    ///
    /// Errors are reserved for failures to obtain a response at all.
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpClient`] over `reqwest` with 30 second timeouts.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| Error::Transport(err.to_string()))?;

        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let method = match req.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
        };

        log::trace!("{} {}", req.method.as_str(), req.url);

        let mut builder = self.client.request(method, &req.url);

        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let res = builder
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;

        let status = res.status().as_u16();

        let headers = res
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_owned(), value.to_owned()))
            })
            .collect();

        // letsencrypt sometimes closes the TLS abruptly causing io error
        // even though we did capture the body.
        let body = res.bytes().await.map(|b| b.to_vec()).unwrap_or_default();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Passes 2xx responses through and turns everything else into a [`Problem`].
pub(crate) fn handle_error(res: HttpResponse) -> std::result::Result<HttpResponse, Problem> {
    // ok responses pass through
    if res.is_success() {
        return Ok(res);
    }

    let is_problem_json = res
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("application/problem+json"));

    let mut problem = if is_problem_json {
        // if we were sent a problem+json, deserialize it
        serde_json::from_slice(&res.body).unwrap_or_else(|err| Problem {
            _type: "problemJsonFail".into(),
            detail: Some(format!(
                "Failed to deserialize application/problem+json ({err}) body: {}",
                res.text()
            )),
            ..Default::default()
        })
    } else {
        // some other problem
        Problem {
            _type: "httpReqError".into(),
            detail: Some(format!("{} body: {}", res.status, res.text())),
            ..Default::default()
        }
    };

    problem.status.get_or_insert(res.status);

    Err(problem)
}

pub(crate) fn expect_header(res: &HttpResponse, name: &'static str) -> Result<String> {
    res.header(name)
        .map(str::to_owned)
        .ok_or(Error::MissingHeader(name))
}
