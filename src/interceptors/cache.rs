//! Serves requests from the client's [`Cache`](crate::cache::Cache) and
//! writes responses to it.

use crate::cache::{self, CacheStrategy};
use crate::dates;
use crate::interceptor::Chain;
use crate::response::Response;

pub(crate) async fn intercept(chain: Chain<'_>) -> crate::Result<Response> {
    let store = chain.client().cache();
    let request = chain.request().clone();
    let candidate = store.and_then(|c| c.get(&request));
    let now = dates::now_millis();
    let strategy = CacheStrategy::compute(now, &request, candidate);
    if let Some(store) = store {
        store.track_response(&strategy);
    }
    let (network_request, cache_response) = strategy.into_parts();

    let Some(network_request) = network_request else {
        return match cache_response {
            None => {
                debug!(url = %request.url().redact(), "only-if-cached miss");
                cache::unsatisfiable(&request, now)
            }
            Some(cached) => {
                debug!(url = %request.url().redact(), "cache hit");
                cached.new_builder().cache_response(Some(cached.stripped())).build()
            }
        };
    };

    let network_response = chain.proceed(network_request).await?;

    if let Some(cached) = &cache_response
        && network_response.code().as_u16() == 304
    {
        debug!(url = %request.url().redact(), "conditional cache hit");
        let response = cached
            .new_builder()
            .headers(&cache::combine(cached.headers(), network_response.headers()))
            .sent_request_at_millis(network_response.sent_request_at_millis())
            .received_response_at_millis(network_response.received_response_at_millis())
            .cache_response(Some(cached.stripped()))
            .network_response(Some(network_response.stripped()))
            .build()?;
        if let Some(store) = store {
            store.track_conditional_cache_hit();
            store.update(cached, &response);
        }
        return Ok(response);
    }

    let response = network_response
        .new_builder()
        .cache_response(cache_response.map(|c| c.stripped()))
        .network_response(Some(network_response.stripped()))
        .build()?;

    if let Some(store) = store {
        if cache::promises_body(&response) && cache::is_cacheable(&response, &request) {
            trace!(url = %request.url().redact(), "storing response");
            store.put(&response);
        }
        if cache::invalidates_cache(request.method()) {
            store.remove(&request);
        }
    }
    Ok(response)
}
