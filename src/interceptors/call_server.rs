//! The last stage: writes the request on the leased connection and reads
//! the response.  The connection goes back to the pool only when the
//! exchange left it reusable and neither side asked to close.

use crate::body::ResponseBody;
use crate::dates;
use crate::error::Error;
use crate::exchange::{ExchangeCodec, ResponseHead};
use crate::headers::Headers;
use crate::interceptor::Chain;
use crate::pool::Lease;
use crate::request::{Request, permits_request_body};
use crate::response::Response;
use bytes::Bytes;

pub(crate) async fn intercept(chain: Chain<'_>) -> crate::Result<Response> {
    let ctx = chain.ctx();
    let request = chain.request().clone();
    let mut lease = ctx
        .take_connection()
        .ok_or_else(|| Error::illegal_state("no connection for the call server stage"))?;

    let result = exchange(&chain, &mut lease, &request).await;
    if let Some(route) = lease.route() {
        ctx.listener.connection_released(route);
    }
    match result {
        Ok((response, true)) => {
            chain.client().connection_pool().release(lease);
            Ok(response)
        }
        Ok((response, false)) => {
            trace!(route = ?lease.route(), "closing connection after exchange");
            Ok(response)
        }
        Err(e) => Err(e),
    }
}

fn wants_close(headers: &Headers) -> bool {
    headers
        .get("Connection")
        .is_some_and(|v| v.eq_ignore_ascii_case("close"))
}

/// Run one exchange.  Returns the response and whether the connection
/// may carry another.
async fn exchange(chain: &Chain<'_>, lease: &mut Lease, request: &Request) -> crate::Result<(Response, bool)> {
    let conn = lease
        .conn()
        .ok_or_else(|| Error::illegal_state("connection already released"))?;
    let route = conn.route().clone();
    let handshake = conn.handshake().cloned();
    let mut codec = conn.codec(chain.read_timeout(), chain.write_timeout());

    let sent_at = dates::now_millis();
    codec.write_request_headers(request).await?;

    let mut early: Option<ResponseHead> = None;
    if let Some(body) = request.body()
        && permits_request_body(request.method())
    {
        let expect_continue = request
            .header("Expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
        if expect_continue {
            codec.finish_request().await?;
            let head = codec.read_response_headers().await?;
            if head.code.as_u16() != 100 {
                debug!(code = head.code.as_u16(), "server answered before the request body was sent");
                early = Some(head);
            }
        }
        if early.is_none() {
            codec.write_request_body(body).await?;
        }
    }
    codec.finish_request().await?;

    let skipped_body = early.is_some();
    let mut head = match early {
        Some(head) => head,
        None => codec.read_response_headers().await?,
    };
    while head.code.is_informational() && head.code.as_u16() != 101 {
        trace!(code = head.code.as_u16(), "skipping informational response");
        head = codec.read_response_headers().await?;
    }

    let upgraded = head.code.as_u16() == 101;
    let body = if upgraded {
        Bytes::new()
    } else {
        codec.read_response_body(&head, request.method()).await?
    };
    let reusable = codec.is_reusable()
        && !upgraded
        && !skipped_body
        && !wants_close(request.headers())
        && !wants_close(&head.headers);

    let code = head.code;
    let declared_length = head.headers.content_length();
    let content_type = head.headers.get("Content-Type").map(str::to_owned);
    let response = Response::builder()
        .request(request.clone())
        .protocol(head.protocol)
        .code(head.code)
        .message(head.message)
        .headers(&head.headers)
        .body(Some(ResponseBody::new(content_type.as_deref(), body)))
        .sent_request_at_millis(sent_at)
        .received_response_at_millis(dates::now_millis())
        .handshake(handshake)
        .route(Some(route))
        .build()?;
    chain.ctx().listener.response_headers_end(&response);

    if matches!(code.as_u16(), 204 | 205)
        && let Some(len) = declared_length.filter(|&n| n > 0)
    {
        return Err(Error::protocol(format!(
            "HTTP {} had non-zero Content-Length: {len}",
            code.as_u16()
        )));
    }
    Ok((response, reusable))
}
