//! Policy for running enqueued calls.
//!
//! The [`Dispatcher`] bounds how many asynchronous calls run at once, in
//! total and per host.  Calls beyond either bound wait in FIFO order and
//! are promoted as running calls finish.  Synchronous calls are counted
//! as running but never wait.
//!
//! Enqueued calls run on the dispatcher's own multi-threaded Tokio
//! runtime, created on first use, or on a runtime handed in with
//! [`Dispatcher::with_handle`].

use crate::call::{Callback, RealCall};
use crate::error::Error;
use crate::util::lock_or_clear;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::runtime::{Handle, Runtime};

/// Limits on concurrent calls, shared by every clone.
///
/// ```rust
/// use uno::Dispatcher;
///
/// let dispatcher = Dispatcher::new();
/// dispatcher.set_max_requests_per_host(2)?;
/// let client = uno::Httpd::builder().dispatcher(dispatcher.clone()).build();
/// assert_eq!(client.dispatcher().max_requests_per_host(), 2);
/// # Ok::<(), uno::Error>(())
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    state: Mutex<State>,
    executor: Executor,
}

enum Executor {
    /// Built on first use; shut down without blocking when dropped.
    Owned(Mutex<Option<Runtime>>),
    Handle(Handle),
}

type IdleCallback = Arc<dyn Fn() + Send + Sync>;

struct State {
    max_requests: usize,
    max_requests_per_host: usize,
    ready: VecDeque<AsyncCall>,
    running_async: Vec<AsyncCall>,
    running_sync: Vec<RealCall>,
    idle_callback: Option<IdleCallback>,
}

/// A call waiting for, or holding, a dispatcher slot.
pub(crate) struct AsyncCall {
    pub(crate) call: RealCall,
    pub(crate) callback: Arc<dyn Callback>,
}

impl AsyncCall {
    fn host(&self) -> &str {
        self.call.request().url().host()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock_or_clear(&self.inner.state);
        f.debug_struct("Dispatcher")
            .field("max_requests", &state.max_requests)
            .field("max_requests_per_host", &state.max_requests_per_host)
            .field("queued", &state.ready.len())
            .field("running", &(state.running_async.len() + state.running_sync.len()))
            .finish()
    }
}

impl Dispatcher {
    /// 64 concurrent calls, 5 per host, on a runtime built on first use.
    pub fn new() -> Self {
        Self::with_executor(Executor::Owned(Mutex::new(None)))
    }

    /// Run enqueued calls on an existing runtime.
    ///
    /// [`RealCall::execute_blocking`] must not be called from that
    /// runtime's threads.
    pub fn with_handle(handle: Handle) -> Self {
        Self::with_executor(Executor::Handle(handle))
    }

    fn with_executor(executor: Executor) -> Self {
        Dispatcher {
            inner: Arc::new(DispatcherInner {
                state: Mutex::new(State {
                    max_requests: 64,
                    max_requests_per_host: 5,
                    ready: VecDeque::new(),
                    running_async: Vec::new(),
                    running_sync: Vec::new(),
                    idle_callback: None,
                }),
                executor,
            }),
        }
    }

    /// The bound on concurrently running asynchronous calls.
    pub fn max_requests(&self) -> usize {
        lock_or_clear(&self.inner.state).max_requests
    }

    /// Change the total bound.  Raising it promotes waiting calls.
    pub fn set_max_requests(&self, max: usize) -> crate::Result<()> {
        if max < 1 {
            return Err(Error::builder(format!("max_requests < 1: {max}")));
        }
        lock_or_clear(&self.inner.state).max_requests = max;
        self.promote_and_execute();
        Ok(())
    }

    /// The bound on concurrently running asynchronous calls per host.
    pub fn max_requests_per_host(&self) -> usize {
        lock_or_clear(&self.inner.state).max_requests_per_host
    }

    /// Change the per-host bound.  Raising it promotes waiting calls.
    pub fn set_max_requests_per_host(&self, max: usize) -> crate::Result<()> {
        if max < 1 {
            return Err(Error::builder(format!("max_requests_per_host < 1: {max}")));
        }
        lock_or_clear(&self.inner.state).max_requests_per_host = max;
        self.promote_and_execute();
        Ok(())
    }

    /// Run `callback` each time the dispatcher becomes idle (no running
    /// calls).
    pub fn set_idle_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock_or_clear(&self.inner.state).idle_callback = Some(Arc::new(callback));
    }

    /// Calls waiting for a slot.
    pub fn queued_calls_count(&self) -> usize {
        lock_or_clear(&self.inner.state).ready.len()
    }

    /// Calls currently running, synchronous and asynchronous.
    pub fn running_calls_count(&self) -> usize {
        let state = lock_or_clear(&self.inner.state);
        state.running_async.len() + state.running_sync.len()
    }

    /// Requests of the calls waiting for a slot.
    pub fn queued_requests(&self) -> Vec<crate::Request> {
        lock_or_clear(&self.inner.state)
            .ready
            .iter()
            .map(|c| c.call.request().clone())
            .collect()
    }

    /// Cancel every queued and running call.
    pub fn cancel_all(&self) {
        let calls: Vec<RealCall> = {
            let state = lock_or_clear(&self.inner.state);
            state
                .ready
                .iter()
                .chain(state.running_async.iter())
                .map(|c| c.call.share())
                .chain(state.running_sync.iter().map(RealCall::share))
                .collect()
        };
        debug!(count = calls.len(), "canceling all calls");
        for call in calls {
            call.cancel();
        }
    }

    pub(crate) fn enqueue(&self, call: AsyncCall) {
        trace!(url = %call.call.request().url().redact(), "call enqueued");
        lock_or_clear(&self.inner.state).ready.push_back(call);
        self.promote_and_execute();
    }

    /// Register a synchronous call as running.
    pub(crate) fn executed(&self, call: &RealCall) {
        lock_or_clear(&self.inner.state).running_sync.push(call.share());
    }

    pub(crate) fn finished_sync(&self, call: &RealCall) {
        {
            let mut state = lock_or_clear(&self.inner.state);
            if let Some(i) = state.running_sync.iter().position(|c| c.same_call(call)) {
                state.running_sync.swap_remove(i);
            }
        }
        self.after_finish();
    }

    fn finished_async(&self, call: &RealCall) {
        {
            let mut state = lock_or_clear(&self.inner.state);
            if let Some(i) = state.running_async.iter().position(|c| c.call.same_call(call)) {
                state.running_async.remove(i);
            }
        }
        self.after_finish();
    }

    fn after_finish(&self) {
        let running = self.promote_and_execute();
        if running == 0 {
            let idle = lock_or_clear(&self.inner.state).idle_callback.clone();
            if let Some(idle) = idle {
                idle();
            }
        }
    }

    /// Move waiting calls into free slots and start them.  Returns the
    /// number of running calls.
    fn promote_and_execute(&self) -> usize {
        let (promoted, running) = {
            let mut state = lock_or_clear(&self.inner.state);
            let mut promoted = Vec::new();
            let mut i = 0;
            while i < state.ready.len() {
                if state.running_async.len() >= state.max_requests {
                    break;
                }
                let host = state.ready[i].host().to_owned();
                let per_host = state.running_async.iter().filter(|c| c.host() == host).count();
                if per_host >= state.max_requests_per_host {
                    i += 1;
                    continue;
                }
                if let Some(call) = state.ready.remove(i) {
                    state
                        .running_async
                        .push(AsyncCall { call: call.call.share(), callback: Arc::clone(&call.callback) });
                    promoted.push(call);
                }
            }
            (promoted, state.running_async.len() + state.running_sync.len())
        };
        for call in promoted {
            trace!(url = %call.call.request().url().redact(), "call promoted");
            self.start(call);
        }
        running
    }

    fn start(&self, async_call: AsyncCall) {
        let weak: Weak<DispatcherInner> = Arc::downgrade(&self.inner);
        let AsyncCall { call, callback } = async_call;
        let spawned = self.spawn({
            let call = call.share();
            let callback = Arc::clone(&callback);
            async move {
                match call.run().await {
                    Ok(response) => callback.on_response(&call, response),
                    Err(e) => callback.on_failure(&call, e),
                }
                if let Some(inner) = weak.upgrade() {
                    Dispatcher { inner }.finished_async(&call);
                }
            }
        });
        if let Err(e) = spawned {
            warn!("dispatcher could not start call: {}", e);
            callback.on_failure(&call, e);
            self.finished_async(&call);
        }
    }

    /// Run `fut` on the dispatcher's runtime.
    pub(crate) fn spawn<F>(&self, fut: F) -> crate::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.inner.executor {
            Executor::Handle(handle) => {
                handle.spawn(fut);
            }
            Executor::Owned(slot) => {
                let mut slot = lock_or_clear(slot);
                if slot.is_none() {
                    let runtime = tokio::runtime::Builder::new_multi_thread()
                        .enable_all()
                        .thread_name("uno-dispatcher")
                        .build()
                        .map_err(|e| Error::request("failed to start dispatcher runtime").with_source(e))?;
                    debug!("dispatcher runtime started");
                    *slot = Some(runtime);
                }
                if let Some(runtime) = slot.as_ref() {
                    runtime.spawn(fut);
                }
            }
        }
        Ok(())
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        if let Executor::Owned(slot) = &self.executor
            && let Some(runtime) = lock_or_clear(slot).take()
        {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor;
    use crate::{Httpd, Request, Response};
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Answers every call once a permit is available, without touching
    /// the network.
    fn gated_client(gate: Arc<Semaphore>, dispatcher: Dispatcher) -> Httpd {
        let answer = interceptor::from_fn(move |chain| {
            let gate = Arc::clone(&gate);
            async move {
                let permit = gate.acquire().await.map_err(|_| crate::Error::canceled())?;
                permit.forget();
                Response::builder()
                    .request(chain.request().clone())
                    .code(http::StatusCode::OK)
                    .message("OK")
                    .build()
            }
            .boxed()
        });
        Httpd::builder().dispatcher(dispatcher).add_interceptor(answer).build()
    }

    async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn limits_must_be_positive() {
        let dispatcher = Dispatcher::new();
        // (setter, value, ok)
        let cases: &[(&str, usize, bool)] = &[
            ("total", 0, false),
            ("total", 1, true),
            ("per host", 0, false),
            ("per host", 3, true),
        ];
        for &(setter, value, ok) in cases {
            let result = match setter {
                "total" => dispatcher.set_max_requests(value),
                _ => dispatcher.set_max_requests_per_host(value),
            };
            assert_eq!(result.is_ok(), ok, "{setter} = {value}");
            if let Err(e) = result {
                assert!(e.is_builder());
            }
        }
        assert_eq!(dispatcher.max_requests(), 1);
        assert_eq!(dispatcher.max_requests_per_host(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn per_host_limit_queues_in_order() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = Dispatcher::new();
        dispatcher.set_max_requests_per_host(1).unwrap();
        let client = gated_client(Arc::clone(&gate), dispatcher.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        for (i, url) in ["http://a.test/1", "http://a.test/2", "http://b.test/1"].iter().enumerate() {
            let order = Arc::clone(&order);
            let call = client.new_call(Request::get(*url).unwrap());
            call.enqueue(move |_: &RealCall, result: crate::Result<Response>| {
                assert!(result.is_ok());
                lock_or_clear(&order).push(i);
            })
            .unwrap();
        }
        wait_for("two running", || dispatcher.running_calls_count() == 2).await;
        assert_eq!(dispatcher.queued_calls_count(), 1, "second a.test call waits");
        assert_eq!(dispatcher.queued_requests()[0].url().as_str(), "http://a.test/2");

        gate.add_permits(3);
        wait_for("all finished", || lock_or_clear(&order).len() == 3).await;
        wait_for("idle", || dispatcher.running_calls_count() == 0).await;
        let order = lock_or_clear(&order).clone();
        assert_eq!(order.last(), Some(&1), "queued call ran last");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn raising_limit_promotes() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = Dispatcher::new();
        dispatcher.set_max_requests(1).unwrap();
        let client = gated_client(Arc::clone(&gate), dispatcher.clone());
        for url in ["http://a.test/", "http://b.test/"] {
            client
                .new_call(Request::get(url).unwrap())
                .enqueue(|_: &RealCall, _: crate::Result<Response>| {})
                .unwrap();
        }
        wait_for("one running", || dispatcher.running_calls_count() == 1).await;
        assert_eq!(dispatcher.queued_calls_count(), 1);
        dispatcher.set_max_requests(2).unwrap();
        assert_eq!(dispatcher.queued_calls_count(), 0);
        assert_eq!(dispatcher.running_calls_count(), 2);
        gate.add_permits(2);
        wait_for("idle", || dispatcher.running_calls_count() == 0).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_all_fails_queued_and_running() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = Dispatcher::new();
        dispatcher.set_max_requests(1).unwrap();
        let client = gated_client(Arc::clone(&gate), dispatcher.clone());
        let canceled = Arc::new(AtomicUsize::new(0));
        for url in ["http://a.test/", "http://b.test/"] {
            let canceled = Arc::clone(&canceled);
            client
                .new_call(Request::get(url).unwrap())
                .enqueue(move |_: &RealCall, result: crate::Result<Response>| {
                    if result.is_err_and(|e| e.is_canceled()) {
                        canceled.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .unwrap();
        }
        wait_for("one running", || dispatcher.running_calls_count() == 1).await;
        dispatcher.cancel_all();
        wait_for("both canceled", || canceled.load(Ordering::SeqCst) == 2).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn idle_callback_fires() {
        let gate = Arc::new(Semaphore::new(1));
        let dispatcher = Dispatcher::new();
        let idle = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&idle);
        dispatcher.set_idle_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let client = gated_client(gate, dispatcher.clone());
        client
            .new_call(Request::get("http://a.test/").unwrap())
            .enqueue(|_: &RealCall, _: crate::Result<Response>| {})
            .unwrap();
        wait_for("idle callback", || idle.load(Ordering::SeqCst) == 1).await;
    }
}
