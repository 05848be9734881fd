//! Bridges application requests to network requests.
//!
//! Adds the headers a wire request needs (`Host`, `Connection`, body
//! headers, `Cookie`, `User-Agent`, `Accept-Encoding`), then on the way
//! back stores cookies and undoes gzip that was requested transparently.

use crate::body::ResponseBody;
use crate::cache::promises_body;
use crate::cookie::Cookie;
use crate::cookie_jar::CookieJar;
use crate::error::Error;
use crate::headers::Headers;
use crate::interceptor::Chain;
use crate::response::Response;
use crate::url::UnoUrl;

pub(crate) async fn intercept(chain: Chain<'_>) -> crate::Result<Response> {
    let client = chain.client();
    let user_request = chain.request().clone();
    let url = user_request.url();
    let mut builder = user_request.new_builder();

    if let Some(body) = user_request.body() {
        if let Some(content_type) = body.content_type() {
            builder = builder.header("Content-Type", content_type);
        }
        builder = builder
            .header("Content-Length", &body.content_length().to_string())
            .remove_header("Transfer-Encoding");
    }
    if user_request.header("Host").is_none() {
        builder = builder.header("Host", &url.host_header());
    }
    if user_request.header("Connection").is_none() {
        builder = builder.header("Connection", "Keep-Alive");
    }

    // Only decode what we asked for; a caller-set Accept-Encoding gets
    // the raw bytes.
    let transparent_gzip = cfg!(feature = "gzip")
        && user_request.header("Accept-Encoding").is_none()
        && user_request.header("Range").is_none();
    if transparent_gzip {
        builder = builder.header("Accept-Encoding", "gzip");
    }

    let cookies = client.cookie_jar().load_for_request(url);
    if !cookies.is_empty() {
        builder = builder.header("Cookie", &Cookie::header_value(&cookies));
    }
    if user_request.header("User-Agent").is_none() {
        builder = builder.header("User-Agent", client.user_agent());
    }

    let network_response = chain.proceed(builder.build()?).await?;

    receive_headers(&**client.cookie_jar(), url, network_response.headers());

    let gzipped = network_response
        .header("Content-Encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    let mut builder = network_response.new_builder().request(user_request.clone());
    if transparent_gzip && gzipped && promises_body(&network_response) {
        if let Some(body) = network_response.body() {
            let decoded = gunzip(body.bytes())?;
            trace!(compressed = body.bytes().len(), decoded = decoded.len(), "gunzipped response body");
            builder = builder
                .remove_header("Content-Encoding")
                .remove_header("Content-Length")
                .body(Some(ResponseBody::new(body.content_type(), decoded)));
        }
    }
    builder.build()
}

/// Hand the cookies in `headers` to `jar`.
pub(crate) fn receive_headers(jar: &dyn CookieJar, url: &UnoUrl, headers: &Headers) {
    let cookies = Cookie::parse_all(url, headers);
    if cookies.is_empty() {
        return;
    }
    trace!(count = cookies.len(), url = %url.redact(), "saving cookies");
    jar.save_from_response(url, cookies);
}

#[cfg(feature = "gzip")]
fn gunzip(data: &[u8]) -> crate::Result<Vec<u8>> {
    use std::io::Read;

    let mut out = Vec::with_capacity(data.len() * 2);
    flate2::read::GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::decode("invalid gzip response body").with_source(e))?;
    Ok(out)
}

#[cfg(not(feature = "gzip"))]
fn gunzip(_data: &[u8]) -> crate::Result<Vec<u8>> {
    Err(Error::decode("gzip support is disabled"))
}
