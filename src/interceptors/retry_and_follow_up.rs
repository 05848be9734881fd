//! Retries and follow-ups.
//!
//! Loops over attempts until an outcome is final.  A failed or
//! classified-retryable attempt is repeated under the client's retry
//! policy.  A response that calls for a follow-up (redirect, auth
//! challenge, 408, 503 with `Retry-After: 0`) produces the next request,
//! and the response becomes that request's prior response.

use crate::client::Httpd;
use crate::error::Error;
use crate::interceptor::Chain;
use crate::redirect;
use crate::request::Request;
use crate::response::Response;
use crate::retry::Action;

pub(crate) async fn intercept(chain: Chain<'_>) -> crate::Result<Response> {
    let client = chain.client();
    let policy = client.retry_policy();
    let mut request = chain.request().clone();
    let mut prior: Option<Response> = None;
    let mut follow_ups: u32 = 0;
    let mut retries: u32 = 0;

    loop {
        if retries == 0 {
            policy.deposit();
        }
        let result = chain.clone().proceed(request.clone()).await;
        if let Err(e) = &result
            && e.is_canceled()
        {
            return result;
        }

        let may_retry = client.retry_on_connection_failure()
            && request.is_replayable()
            && retries < policy.max_retries()
            && policy.classify(request.url(), request.method(), &result) == Action::Retryable;
        if may_retry {
            if policy.can_withdraw() {
                retries += 1;
                debug!(url = %request.url().redact(), attempt = retries, "retrying request");
                continue;
            }
            debug!(url = %request.url().redact(), "retry budget exhausted");
        }

        let mut response = result?;
        if let Some(prior) = prior.take() {
            response = response.new_builder().prior_response(Some(prior.stripped())).build()?;
        }

        let Some(next) = follow_up(client, &response)? else {
            return Ok(response);
        };
        if next.body().is_some_and(|b| b.is_one_shot()) {
            debug!("follow-up needs a one-shot body again; returning response");
            return Ok(response);
        }
        follow_ups += 1;
        if follow_ups > client.max_follow_ups() {
            return Err(Error::redirect(format!("too many follow-up requests: {follow_ups}")));
        }
        debug!(
            code = response.code().as_u16(),
            to = %next.url().redact(),
            follow_ups,
            "following up"
        );
        prior = Some(response);
        request = next;
        retries = 0;
    }
}

/// The request answering `response`, or `None` if it is final.
fn follow_up(client: &Httpd, response: &Response) -> crate::Result<Option<Request>> {
    let route = response.route.as_ref();
    match response.code().as_u16() {
        407 => {
            if !route.is_some_and(|r| r.proxy().is_http()) {
                return Err(Error::protocol("received HTTP 407 while not using a proxy")
                    .with_status(response.code()));
            }
            client.proxy_authenticator().authenticate(route, response)
        }
        401 => client.authenticator().authenticate(route, response),
        300..=303 | 307 | 308 => {
            if !client.follow_redirects() {
                return Ok(None);
            }
            redirect::follow_redirect(response, client.follow_ssl_redirects())
        }
        408 => {
            // Rare; servers like HAProxy send it on idle keep-alive
            // connections.  Retry once, immediately.
            if !client.retry_on_connection_failure() || !response.request().is_replayable() {
                return Ok(None);
            }
            if response.prior_response().is_some_and(|p| p.code().as_u16() == 408) {
                return Ok(None);
            }
            if retry_after(response, 0) > 0 {
                return Ok(None);
            }
            Ok(Some(response.request().clone()))
        }
        503 => {
            if response.prior_response().is_some_and(|p| p.code().as_u16() == 503) {
                return Ok(None);
            }
            if retry_after(response, i32::MAX) == 0 {
                return Ok(Some(response.request().clone()));
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// `Retry-After` in whole seconds.  Dates and other forms count as "not
/// soon".
fn retry_after(response: &Response, default: i32) -> i32 {
    match response.header("Retry-After") {
        None => default,
        Some(value) if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
            value.parse().unwrap_or(i32::MAX)
        }
        Some(_) => i32::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::tests::response;

    #[test]
    fn retry_after_table() {
        // (header, default, expected, desc)
        let cases: &[(Option<&str>, i32, i32, &str)] = &[
            (None, 0, 0, "absent uses default"),
            (None, i32::MAX, i32::MAX, "absent uses other default"),
            (Some("0"), i32::MAX, 0, "zero"),
            (Some("120"), 0, 120, "seconds"),
            (Some("Wed, 21 Oct 2015 07:28:00 GMT"), 0, i32::MAX, "date"),
            (Some("99999999999"), 0, i32::MAX, "overflow"),
            (Some("-1"), 0, i32::MAX, "negative"),
        ];
        for &(header, default, expected, desc) in cases {
            let headers: Vec<(&str, &str)> = header.map(|h| ("Retry-After", h)).into_iter().collect();
            assert_eq!(retry_after(&response(503, &headers), default), expected, "{desc}");
        }
    }

    #[test]
    fn follow_up_table() {
        let client = Httpd::new();
        let no_follow = Httpd::builder().redirect(redirect::Policy::none()).build();
        // (client, code, headers, follows, desc)
        let cases: &[(&Httpd, u16, &[(&str, &str)], bool, &str)] = &[
            (&client, 200, &[], false, "success is final"),
            (&client, 301, &[("Location", "/b")], true, "redirect"),
            (&no_follow, 301, &[("Location", "/b")], false, "redirects disabled"),
            (&client, 401, &[("WWW-Authenticate", "Basic realm=\"x\"")], false, "no authenticator"),
            (&client, 408, &[], true, "request timeout retried"),
            (&client, 408, &[("Retry-After", "5")], false, "request timeout with delay"),
            (&client, 503, &[("Retry-After", "0")], true, "unavailable with zero delay"),
            (&client, 503, &[], false, "unavailable without header"),
            (&client, 500, &[], false, "server error is final"),
        ];
        for &(client, code, headers, follows, desc) in cases {
            let next = follow_up(client, &response(code, headers)).unwrap();
            assert_eq!(next.is_some(), follows, "{desc}");
        }
    }

    #[test]
    fn proxy_challenge_without_proxy_is_protocol_error() {
        let err = follow_up(&Httpd::new(), &response(407, &[])).unwrap_err();
        assert!(err.is_protocol());
        assert_eq!(err.status().map(|s| s.as_u16()), Some(407));
    }

    #[test]
    fn repeated_timeouts_are_final() {
        let first = response(408, &[]);
        let second = response(408, &[])
            .new_builder()
            .prior_response(Some(first.stripped()))
            .build()
            .unwrap();
        assert!(follow_up(&Httpd::new(), &second).unwrap().is_none());
    }
}
