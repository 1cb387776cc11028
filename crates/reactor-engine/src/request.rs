//! The immutable Request type (spec.md §3) and its case-insensitive header
//! multi-map.

use std::collections::BTreeMap;
use std::fmt;

use reactor_core::CallbackArgs;

/// HTTP method, restricted to the closed set the reactor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// GET. Never carries a body.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE. Never carries a body.
    Delete,
}

impl Method {
    /// True for methods the Request construction refuses to pair with a body.
    pub fn forbids_body(self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }

    /// The lower-case wire form (`http_method` field of the envelopes, §6).
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Patch => "patch",
            Method::Delete => "delete",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A case-insensitive header multi-map whose canonical key form is
/// lower-case, as required by spec.md §3 and §6.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    /// An empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header value, appending to any existing values under the
    /// same (lower-cased) key.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Set a header, replacing any existing values under the same key.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    /// Look up the first value for a header, case-insensitively.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.0
            .get(&name.as_ref().to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// True if no header under this name has been set.
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.0.contains_key(&name.as_ref().to_ascii_lowercase())
    }

    /// Iterate over every (lower-case key, value) pair, one per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// True if this map has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An immutable HTTP request (spec.md §3).
///
/// Only ever produced fresh: the redirect transition (§4.6) builds a new
/// `Request`, it never mutates one in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    url: reqwest::Url,
    headers: Headers,
    body: Option<Vec<u8>>,
    timeout: Option<std::time::Duration>,
    connect_timeout: Option<std::time::Duration>,
    max_redirects: Option<u32>,
    raise_error_responses: Option<bool>,
}

impl Request {
    /// Construct a request, rejecting a body paired with GET/DELETE.
    pub fn new(
        method: Method,
        url: reqwest::Url,
        headers: Headers,
        body: Option<Vec<u8>>,
    ) -> Result<Self, crate::error::ReactorError> {
        if body.is_some() && method.forbids_body() {
            return Err(crate::error::ReactorError::InvalidRequest(format!(
                "{method} requests cannot carry a body"
            )));
        }
        Ok(Self {
            method,
            url,
            headers,
            body,
            timeout: None,
            connect_timeout: None,
            max_redirects: None,
            raise_error_responses: None,
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the per-request connect timeout.
    pub fn with_connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Override the per-request max-redirects cap.
    pub fn with_max_redirects(mut self, cap: u32) -> Self {
        self.max_redirects = Some(cap);
        self
    }

    /// Override whether 4xx/5xx responses route to the error path for this
    /// request only (spec.md §7's per-call override of `raise_error_responses`).
    pub fn with_raise_error_responses(mut self, raise: bool) -> Self {
        self.raise_error_responses = Some(raise);
        self
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The absolute request URL.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    /// The request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The request body, if any.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// The per-request timeout override, if set.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout
    }

    /// The per-request connect-timeout override, if set.
    pub fn connect_timeout(&self) -> Option<std::time::Duration> {
        self.connect_timeout
    }

    /// The per-request max-redirects override, if set.
    pub fn max_redirects(&self) -> Option<u32> {
        self.max_redirects
    }

    /// The per-request `raise_error_responses` override, if set.
    pub fn raise_error_responses(&self) -> Option<bool> {
        self.raise_error_responses
    }

    /// Produce the redirect-transition Request for a given status/location,
    /// resolving `location` against this request's URL.
    ///
    /// Per spec.md §4.6: 301/302/303 downgrade to GET and drop the body;
    /// 307/308 preserve method and body.
    pub fn for_redirect(
        &self,
        status: u16,
        location: &str,
    ) -> Result<Self, crate::error::ReactorError> {
        let new_url = self.url.join(location).map_err(|e| {
            crate::error::ReactorError::InvalidRequest(format!("bad redirect location: {e}"))
        })?;
        let (method, body) = match status {
            301 | 302 | 303 => (Method::Get, None),
            307 | 308 => (self.method, self.body.clone()),
            other => {
                return Err(crate::error::ReactorError::InvalidRequest(format!(
                    "status {other} is not a redirect status"
                )))
            }
        };
        Ok(Self {
            method,
            url: new_url,
            headers: self.headers.clone(),
            body,
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            max_redirects: self.max_redirects,
            raise_error_responses: self.raise_error_responses,
        })
    }
}

/// True if `status` is one of the redirect statuses the reactor follows.
pub fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Attach callback-args to a request at task-construction time; kept here
/// rather than on `Request` since callback-args belong to the task, not the
/// wire request (spec.md §3).
pub fn validate_callback_args(
    args: serde_json::Map<String, serde_json::Value>,
) -> Result<CallbackArgs, crate::error::ReactorError> {
    CallbackArgs::try_from_map(args).map_err(crate::error::ReactorError::from)
}
