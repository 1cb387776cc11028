//! Pure Request -> protocol-level request translation (spec.md §4.5).

use crate::request::Request;

/// Builds a [`reqwest::Request`] from a [`Request`], applying headers
/// verbatim and a default user-agent only when the request has none.
///
/// No I/O: the returned request is not sent until the Processor hands it to
/// a pooled client.
pub fn build(client: &reqwest::Client, request: &Request, default_user_agent: Option<&str>) -> reqwest::RequestBuilder {
    let mut builder = client.request(request.method().into(), request.url().clone());

    if !request.headers().contains("user-agent") {
        if let Some(ua) = default_user_agent {
            builder = builder.header("user-agent", ua);
        }
    }
    for (name, value) in request.headers().iter() {
        builder = builder.header(name, value);
    }

    if let Some(body) = request.body() {
        builder = builder.body(body.to_vec());
    }

    if let Some(timeout) = request.timeout() {
        builder = builder.timeout(timeout);
    }

    builder
}
