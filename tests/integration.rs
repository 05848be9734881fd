//! Integration tests for uno -- runs whole calls through the interceptor
//! chain, pool and HTTP/1.1 codec against a local wiremock `MockServer`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use uno::authenticator::BasicAuthenticator;
use uno::cache::MemoryCache;
use uno::event_listener::EventListener;
use uno::{
    Dispatcher, Httpd, MemoryCookieJar, Method, Proxy, RealCall, Request, RequestBody, Response,
    Route, interceptor, redirect,
};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A minimal tracing subscriber that accepts every event/span but discards
/// all output.  Installing it as the global default makes the engine's log
/// field expressions run.
#[cfg(feature = "tracing")]
struct SinkSubscriber;

#[cfg(feature = "tracing")]
impl tracing::Subscriber for SinkSubscriber {
    fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
        true
    }
    fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
        tracing::span::Id::from_u64(1)
    }
    fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}
    fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}
    fn event(&self, _: &tracing::Event<'_>) {}
    fn enter(&self, _: &tracing::span::Id) {}
    fn exit(&self, _: &tracing::span::Id) {}
}

fn install_sink() {
    #[cfg(feature = "tracing")]
    {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            let _ = tracing::subscriber::set_global_default(SinkSubscriber);
        });
    }
}

/// Helper: a builder that never consults the environment's proxies.
fn builder() -> uno::HttpdBuilder {
    install_sink();
    Httpd::builder()
        .proxy(Proxy::direct())
        .read_timeout(Duration::from_secs(5))
}

fn test_client() -> Httpd {
    builder().build()
}

async fn execute(client: &Httpd, request: Request) -> uno::Result<Response> {
    client.new_call(request).execute().await
}

/// Records connection events.
#[derive(Default)]
struct Connections {
    acquired: Mutex<Vec<bool>>,
}

impl EventListener for Connections {
    fn connection_acquired(&self, _route: &Route, pooled: bool) {
        self.acquired.lock().unwrap().push(pooled);
    }
}

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// -----------------------------------------------------------------------
// Core request / response
// -----------------------------------------------------------------------

#[tokio::test]
async fn get_200() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("Connection", "Keep-Alive"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::get(format!("{}/data", server.uri())).unwrap();
    let response = execute(&test_client(), request).await.unwrap();
    assert_eq!(response.code().as_u16(), 200);
    assert!(response.is_successful());
    assert_eq!(response.text().unwrap(), "hello world");
    assert!(response.network_response().is_some());
    assert!(response.prior_response().is_none());
}

#[tokio::test]
async fn dot_segments_are_resolved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::get(format!("{}/a/../b", server.uri())).unwrap();
    assert_eq!(request.url().encoded_path(), "/b");
    let response = execute(&test_client(), request).await.unwrap();
    assert_eq!(response.code().as_u16(), 200);
}

#[tokio::test]
async fn post_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .and(header("Content-Type", "text/plain"))
        .and(header("Content-Length", "7"))
        .and(header("User-Agent", "uno-tests"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;

    let client = builder().user_agent("uno-tests").build();
    let request = Request::builder()
        .url(format!("{}/echo", server.uri()).as_str())
        .post(RequestBody::new(Some("text/plain"), "payload"))
        .build()
        .unwrap();
    let response = execute(&client, request).await.unwrap();
    assert_eq!(response.code().as_u16(), 201);
    assert_eq!(response.text().unwrap(), "created");
}

#[tokio::test]
async fn http_errors_are_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let response = execute(&test_client(), Request::get(server.uri()).unwrap()).await.unwrap();
    assert_eq!(response.code().as_u16(), 500);
    assert!(!response.is_successful());
    assert_eq!(response.text().unwrap(), "boom");
}

#[tokio::test]
async fn connect_error() {
    // Bind then drop a listener so the port is very likely closed.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = builder().retry_on_connection_failure(false).build();
    let err = execute(&client, Request::get(format!("http://127.0.0.1:{port}/")).unwrap())
        .await
        .unwrap_err();
    assert!(err.is_connect(), "{err}");
    assert!(err.url().is_some());
}

#[tokio::test]
async fn read_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let client = builder().read_timeout(Duration::from_millis(100)).build();
    let err = execute(&client, Request::get(server.uri()).unwrap()).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
}

// -----------------------------------------------------------------------
// Connection reuse
// -----------------------------------------------------------------------

#[tokio::test]
async fn keep_alive_connection_is_reused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(2)
        .mount(&server)
        .await;

    let events = Arc::new(Connections::default());
    let client = builder().event_listener(events.clone()).build();
    for _ in 0..2 {
        let response = execute(&client, Request::get(server.uri()).unwrap()).await.unwrap();
        assert_eq!(response.text().unwrap(), "ok");
    }
    assert_eq!(*events.acquired.lock().unwrap(), [false, true]);
    assert_eq!(client.connection_pool().idle_connection_count(), 1);

    client.connection_pool().evict_all();
    assert_eq!(client.connection_pool().idle_connection_count(), 0);
}

#[tokio::test]
async fn connection_close_is_not_pooled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).insert_header("Connection", "close"))
        .mount(&server)
        .await;

    let client = test_client();
    execute(&client, Request::get(server.uri()).unwrap()).await.unwrap();
    assert_eq!(client.connection_pool().idle_connection_count(), 0);
}

// -----------------------------------------------------------------------
// Follow-ups
// -----------------------------------------------------------------------

async fn redirecting_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/b"))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn redirect_is_followed_once() {
    let server = redirecting_server().await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
        .expect(1)
        .mount(&server)
        .await;

    let response = execute(&test_client(), Request::get(format!("{}/a", server.uri())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.code().as_u16(), 200);
    assert_eq!(response.text().unwrap(), "moved here");
    assert_eq!(response.request().url().encoded_path(), "/b");
    let prior = response.prior_response().expect("redirect recorded");
    assert_eq!(prior.code().as_u16(), 301);
    assert!(prior.body().is_none());
    assert_eq!(response.prior_response_count(), 1);
}

#[tokio::test]
async fn redirect_not_followed_when_disabled() {
    let server = redirecting_server().await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = builder().redirect(redirect::Policy::none()).build();
    let response = execute(&client, Request::get(format!("{}/a", server.uri())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.code().as_u16(), 301);
    assert!(response.is_redirect());
    assert!(response.prior_response().is_none());
}

#[tokio::test]
async fn see_other_turns_post_into_get() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .respond_with(ResponseTemplate::new(303).insert_header("Location", "/done"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/done"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::builder()
        .url(format!("{}/form", server.uri()).as_str())
        .post(RequestBody::from("a=1"))
        .build()
        .unwrap();
    let response = execute(&test_client(), request).await.unwrap();
    assert_eq!(response.code().as_u16(), 200);
    assert_eq!(response.request().method(), Method::GET);
    assert!(response.request().body().is_none());
}

#[tokio::test]
async fn too_many_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .mount(&server)
        .await;

    let client = builder().redirect(redirect::Policy::limited(3)).build();
    let err = execute(&client, Request::get(format!("{}/loop", server.uri())).unwrap())
        .await
        .unwrap_err();
    assert!(err.is_redirect(), "{err}");
}

#[tokio::test]
async fn basic_auth_challenge_is_answered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .and(header("Authorization", "Basic dTpw"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"test\""))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let client = builder().authenticator(BasicAuthenticator::new("u", "p")).build();
    let response = execute(&client, Request::get(format!("{}/secret", server.uri())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.code().as_u16(), 200);
    assert_eq!(response.text().unwrap(), "welcome");
    let prior = response.prior_response().expect("challenge recorded");
    assert_eq!(prior.code().as_u16(), 401);
    assert_eq!(prior.challenges()[0].scheme(), "Basic");
}

#[tokio::test]
async fn unanswered_challenge_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"test\""))
        .expect(1)
        .mount(&server)
        .await;

    let response = execute(&test_client(), Request::get(server.uri()).unwrap()).await.unwrap();
    assert_eq!(response.code().as_u16(), 401);
}

// -----------------------------------------------------------------------
// Bridge: cookies and gzip
// -----------------------------------------------------------------------

#[tokio::test]
async fn cookies_round_trip_through_jar() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Set-Cookie", "session=abc; Path=/")
                .append_header("Set-Cookie", "gone=1; Max-Age=0"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("Cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hi"))
        .expect(1)
        .mount(&server)
        .await;

    let jar = Arc::new(MemoryCookieJar::new());
    let client = builder().cookie_jar(jar.clone()).build();
    execute(&client, Request::get(format!("{}/login", server.uri())).unwrap())
        .await
        .unwrap();
    assert_eq!(jar.all().len(), 2, "expired cookie kept until the next load");

    let response = execute(&client, Request::get(format!("{}/account", server.uri())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.text().unwrap(), "hi");
    let names: Vec<String> = jar.all().iter().map(|c| c.name().to_owned()).collect();
    assert_eq!(names, ["session"]);
}

#[cfg(feature = "gzip")]
#[tokio::test]
async fn gzip_is_decoded_transparently() {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"compressed hello").unwrap();
    let compressed = encoder.finish().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Accept-Encoding", "gzip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(compressed),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = execute(&test_client(), Request::get(server.uri()).unwrap()).await.unwrap();
    assert_eq!(response.text().unwrap(), "compressed hello");
    assert!(response.header("Content-Encoding").is_none());
    assert!(response.header("Content-Length").is_none());
}

#[cfg(feature = "gzip")]
#[tokio::test]
async fn caller_accept_encoding_gets_raw_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(b"not really gzip".to_vec()),
        )
        .mount(&server)
        .await;

    let request = Request::builder()
        .url(server.uri().as_str())
        .header("Accept-Encoding", "gzip")
        .build()
        .unwrap();
    let response = execute(&test_client(), request).await.unwrap();
    assert_eq!(response.text().unwrap(), "not really gzip");
    assert_eq!(response.header("Content-Encoding"), Some("gzip"));
}

// -----------------------------------------------------------------------
// Cache
// -----------------------------------------------------------------------

#[tokio::test]
async fn conditional_cache_hit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304).insert_header("ETag", "\"v1\""))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .insert_header("Cache-Control", "max-age=0")
                .set_body_string("cached body"),
        )
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let client = builder().cache(cache.clone()).build();
    let url = format!("{}/doc", server.uri());

    let first = execute(&client, Request::get(url.as_str()).unwrap()).await.unwrap();
    assert_eq!(first.text().unwrap(), "cached body");
    assert!(first.cache_response().is_none());
    assert_eq!(cache.size(), 1);

    let second = execute(&client, Request::get(url.as_str()).unwrap()).await.unwrap();
    assert_eq!(second.code().as_u16(), 200);
    assert_eq!(second.text().unwrap(), "cached body");
    assert!(second.cache_response().is_some());
    assert_eq!(second.network_response().map(|r| r.code().as_u16()), Some(304));
    assert_eq!(cache.request_count(), 2);
    assert_eq!(cache.network_count(), 2);
    assert_eq!(cache.hit_count(), 1);
}

#[tokio::test]
async fn only_if_cached_miss_is_504() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = builder().cache(Arc::new(MemoryCache::new())).build();
    let request = Request::builder()
        .url(server.uri().as_str())
        .header("Cache-Control", "only-if-cached")
        .build()
        .unwrap();
    let response = execute(&client, request).await.unwrap();
    assert_eq!(response.code().as_u16(), 504);
}

// -----------------------------------------------------------------------
// Interceptors
// -----------------------------------------------------------------------

#[tokio::test]
async fn interceptors_see_their_layers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("X-App", "1"))
        .and(header("X-Net", "1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let app_saw_host = Arc::new(Mutex::new(None::<bool>));
    let net_saw_host = Arc::new(Mutex::new(None::<bool>));
    let app = {
        let saw = Arc::clone(&app_saw_host);
        interceptor::from_fn(move |chain| {
            *saw.lock().unwrap() = Some(chain.request().header("Host").is_some());
            let request = chain.request().new_builder().header("X-App", "1").build();
            async move { chain.proceed(request?).await }.boxed()
        })
    };
    let net = {
        let saw = Arc::clone(&net_saw_host);
        interceptor::from_fn(move |chain| {
            *saw.lock().unwrap() = Some(chain.request().header("Host").is_some());
            assert!(chain.route().is_some());
            let request = chain.request().new_builder().header("X-Net", "1").build();
            async move { chain.proceed(request?).await }.boxed()
        })
    };
    let client = builder().add_interceptor(app).add_network_interceptor(net).build();
    let response = execute(&client, Request::get(server.uri()).unwrap()).await.unwrap();
    assert_eq!(response.code().as_u16(), 200);
    assert_eq!(*app_saw_host.lock().unwrap(), Some(false), "application layer sees the caller's request");
    assert_eq!(*net_saw_host.lock().unwrap(), Some(true), "network layer sees bridged headers");
}

#[tokio::test]
async fn network_interceptor_proceeding_twice_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let twice = interceptor::from_fn(|chain| {
        async move {
            let request = chain.request().clone();
            let _ = chain.clone().proceed(request.clone()).await?;
            chain.proceed(request).await
        }
        .boxed()
    });
    let client = builder().add_network_interceptor(twice).build();
    let err = execute(&client, Request::get(server.uri()).unwrap()).await.unwrap_err();
    assert!(err.is_illegal_state(), "{err}");
}

#[tokio::test]
async fn application_interceptor_may_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let twice = interceptor::from_fn(|chain| {
        async move {
            let request = chain.request().clone();
            let first = chain.clone().proceed(request.clone()).await?;
            assert_eq!(first.code().as_u16(), 200);
            chain.proceed(request).await
        }
        .boxed()
    });
    let client = builder().add_interceptor(twice).build();
    let response = execute(&client, Request::get(server.uri()).unwrap()).await.unwrap();
    assert_eq!(response.code().as_u16(), 200);
}

// -----------------------------------------------------------------------
// Call lifecycle
// -----------------------------------------------------------------------

#[tokio::test]
async fn second_execute_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let call = test_client().new_call(Request::get(server.uri()).unwrap());
    call.execute().await.unwrap();
    let err = call.execute().await.unwrap_err();
    assert!(err.is_illegal_state(), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_interrupts_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = test_client();
    let call = Arc::new(client.new_call(Request::get(server.uri()).unwrap()));
    let running = {
        let call = Arc::clone(&call);
        tokio::spawn(async move { call.execute().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    call.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("cancel should end the call promptly")
        .unwrap();
    assert!(result.unwrap_err().is_canceled());
    assert_eq!(client.connection_pool().idle_connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_respects_per_host_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .expect(3)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new();
    dispatcher.set_max_requests_per_host(1).unwrap();
    let client = builder().dispatcher(dispatcher.clone()).build();
    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..3 {
        let done = Arc::clone(&done);
        client
            .new_call(Request::get(format!("{}/{i}", server.uri())).unwrap())
            .enqueue(move |_: &RealCall, result: uno::Result<Response>| {
                if result.is_ok_and(|r| r.code().as_u16() == 200) {
                    done.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
    }
    assert_eq!(dispatcher.running_calls_count(), 1);
    assert_eq!(dispatcher.queued_calls_count(), 2);

    wait_for("all callbacks", || done.load(Ordering::SeqCst) == 3).await;
    wait_for("dispatcher idle", || dispatcher.running_calls_count() == 0).await;
    assert_eq!(dispatcher.queued_calls_count(), 0);
}

#[test]
fn execute_blocking_from_plain_thread() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("sync"))
            .expect(1)
            .mount(&server)
            .await;
        server
    });

    let client = test_client();
    let response = client
        .new_call(Request::get(server.uri()).unwrap())
        .execute_blocking()
        .unwrap();
    assert_eq!(response.text().unwrap(), "sync");
    drop(client);
    drop(server);
}
