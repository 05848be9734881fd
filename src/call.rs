//! Calls: one request, executed once.
//!
//! A [`RealCall`] moves from created to executing (or enqueued) to a
//! response, an error or cancellation.  Executing a call a second time
//! fails with an illegal-state error.  [`RealCall::cancel`] may be called
//! from any thread at any time; it aborts in-flight I/O and the call
//! resolves to a canceled error, even if a response had already arrived.

use crate::client::Httpd;
use crate::dispatcher::AsyncCall;
use crate::error::Error;
use crate::event_listener::EventListener;
use crate::interceptor::{self, CallContext, Chain};
use crate::request::Request;
use crate::response::Response;
use crate::util::{lock_or_clear, with_timeout};
use futures_util::FutureExt;
use futures_util::future::{AbortHandle, AbortRegistration, Abortable, BoxFuture};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A request prepared for execution.
pub trait Call: Send + Sync {
    /// The original request.
    fn request(&self) -> &Request;

    /// Run the call and wait for its response.
    fn execute(&self) -> BoxFuture<'_, crate::Result<Response>>;

    /// Run the call on the client's dispatcher and report to `callback`.
    fn enqueue(&self, callback: Arc<dyn Callback>) -> crate::Result<()>;

    /// Cancel the call.  Idempotent.
    fn cancel(&self);

    /// Whether `execute` or `enqueue` has been called.
    fn is_executed(&self) -> bool;

    /// Whether `cancel` has been called.
    fn is_canceled(&self) -> bool;

    /// A fresh, unexecuted call for the same request.
    fn clone_call(&self) -> Box<dyn Call>;
}

/// Receives the outcome of an enqueued call, on a dispatcher thread.
///
/// Closures taking `(&RealCall, uno::Result<Response>)` implement this
/// trait.
pub trait Callback: Send + Sync + 'static {
    /// The call failed, was canceled or timed out.  The server may have
    /// received the request.
    fn on_failure(&self, call: &RealCall, error: Error);

    /// The server answered, with any status code.
    fn on_response(&self, call: &RealCall, response: Response);
}

impl<F> Callback for F
where
    F: Fn(&RealCall, crate::Result<Response>) + Send + Sync + 'static,
{
    fn on_failure(&self, call: &RealCall, error: Error) {
        self(call, Err(error))
    }

    fn on_response(&self, call: &RealCall, response: Response) {
        self(call, Ok(response))
    }
}

/// The client's [`Call`] implementation.
///
/// ```rust,no_run
/// # async fn run() -> uno::Result<()> {
/// let client = uno::Httpd::new();
/// let call = client.new_call(uno::Request::get("https://example.com/")?);
/// let response = call.execute().await?;
/// println!("{}", response.code());
/// # Ok(())
/// # }
/// ```
pub struct RealCall {
    inner: Arc<CallInner>,
}

struct CallInner {
    client: Httpd,
    request: Request,
    for_web_socket: bool,
    executed: AtomicBool,
    canceled: Arc<AtomicBool>,
    abort: AbortHandle,
    registration: Mutex<Option<AbortRegistration>>,
    listener: Arc<dyn EventListener>,
}

impl fmt::Debug for RealCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealCall")
            .field("method", self.inner.request.method())
            .field("url", &self.inner.request.url().redact())
            .field("executed", &self.is_executed())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Unregisters a synchronous call from the dispatcher, even when the
/// caller drops the future.
struct SyncGuard<'a>(&'a RealCall);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.client.dispatcher().finished_sync(self.0);
    }
}

impl RealCall {
    pub(crate) fn new(client: Httpd, request: Request, for_web_socket: bool) -> Self {
        let listener = client.event_listener_factory().create(&request);
        let (abort, registration) = AbortHandle::new_pair();
        RealCall {
            inner: Arc::new(CallInner {
                client,
                request,
                for_web_socket,
                executed: AtomicBool::new(false),
                canceled: Arc::new(AtomicBool::new(false)),
                abort,
                registration: Mutex::new(Some(registration)),
                listener,
            }),
        }
    }

    /// Another handle to this same call.
    pub(crate) fn share(&self) -> RealCall {
        RealCall {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn same_call(&self, other: &RealCall) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The original request.
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Whether `execute`, `execute_blocking` or `enqueue` has been called.
    pub fn is_executed(&self) -> bool {
        self.inner.executed.load(Ordering::Acquire)
    }

    /// Whether `cancel` has been called.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Cancel the call.  In-flight I/O is dropped and the call fails with a
    /// canceled error.  Calling it again does nothing.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.abort.abort();
        debug!(url = %self.inner.request.url().redact(), "call canceled");
        self.inner.listener.canceled(&self.inner.request);
    }

    fn mark_executed(&self) -> crate::Result<()> {
        if self.inner.executed.swap(true, Ordering::AcqRel) {
            return Err(Error::illegal_state("Already Executed"));
        }
        Ok(())
    }

    /// Run the call and wait for its response.
    pub async fn execute(&self) -> crate::Result<Response> {
        self.mark_executed()?;
        let dispatcher = self.inner.client.dispatcher();
        dispatcher.executed(self);
        let _guard = SyncGuard(self);
        self.run().await
    }

    /// Run the call on the dispatcher's runtime and block the current
    /// thread until it finishes.
    ///
    /// Must not be called from a thread of the runtime the dispatcher
    /// runs on.
    pub fn execute_blocking(&self) -> crate::Result<Response> {
        self.mark_executed()?;
        let dispatcher = self.inner.client.dispatcher();
        dispatcher.executed(self);
        let _guard = SyncGuard(self);

        let (tx, rx) = std::sync::mpsc::channel();
        let call = self.share();
        dispatcher.spawn(async move {
            let _ = tx.send(call.run().await);
        })?;
        rx.recv().unwrap_or_else(|_| Err(Error::canceled()))
    }

    /// Run the call on the client's dispatcher; `callback` receives the
    /// outcome.
    pub fn enqueue(&self, callback: impl Callback) -> crate::Result<()> {
        self.enqueue_shared(Arc::new(callback))
    }

    fn enqueue_shared(&self, callback: Arc<dyn Callback>) -> crate::Result<()> {
        self.mark_executed()?;
        self.inner.client.dispatcher().enqueue(AsyncCall {
            call: self.share(),
            callback,
        });
        Ok(())
    }

    /// A fresh, unexecuted call for the same request.
    pub fn clone_call(&self) -> RealCall {
        RealCall::new(self.inner.client.clone(), self.inner.request.clone(), self.inner.for_web_socket)
    }

    /// Drive the pipeline.  Cancellation wins over any other outcome.
    pub(crate) async fn run(&self) -> crate::Result<Response> {
        let inner = &self.inner;
        let request = &inner.request;
        debug!(method = %request.method(), url = %request.url().redact(), "call start");
        inner.listener.call_start(request);

        let registration = lock_or_clear(&inner.registration).take();
        let result = match registration {
            None => Err(Error::illegal_state("call already ran")),
            Some(_) if self.is_canceled() => Err(Error::canceled()),
            Some(registration) => {
                let ctx = CallContext::new(inner.client.clone(), Arc::clone(&inner.listener), Arc::clone(&inner.canceled));
                let stages = interceptor::stages(&inner.client, inner.for_web_socket);
                let pipeline = Abortable::new(
                    async { Chain::start(&stages, request.clone(), &ctx).proceed(request.clone()).await },
                    registration,
                );
                let pipeline = pipeline.map(|outcome| outcome.unwrap_or_else(|aborted| Err(aborted.into())));
                with_timeout(inner.client.call_timeout(), "call", pipeline).await
            }
        };

        let result = if self.is_canceled() { Err(Error::canceled()) } else { result };
        let result = result.map_err(|e| match e.url() {
            Some(_) => e,
            None => e.with_url(request.url().clone()),
        });

        match &result {
            Ok(response) => {
                debug!(
                    url = %request.url().redact(),
                    code = response.code().as_u16(),
                    follow_ups = response.prior_response_count(),
                    "call finished"
                );
                inner.listener.call_end(request);
            }
            Err(e) => {
                debug!(url = %request.url().redact(), error = %e, "call failed");
                inner.listener.call_failed(request, e);
            }
        }
        result
    }
}

impl Call for RealCall {
    fn request(&self) -> &Request {
        RealCall::request(self)
    }

    fn execute(&self) -> BoxFuture<'_, crate::Result<Response>> {
        RealCall::execute(self).boxed()
    }

    fn enqueue(&self, callback: Arc<dyn Callback>) -> crate::Result<()> {
        self.enqueue_shared(callback)
    }

    fn cancel(&self) {
        RealCall::cancel(self)
    }

    fn is_executed(&self) -> bool {
        RealCall::is_executed(self)
    }

    fn is_canceled(&self) -> bool {
        RealCall::is_canceled(self)
    }

    fn clone_call(&self) -> Box<dyn Call> {
        Box::new(RealCall::clone_call(self))
    }
}
