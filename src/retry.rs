//! Retry policies for the retry-and-follow-up stage.
//!
//! Independently of redirects and auth challenges, a call may be retried
//! when its outcome is classified as retryable.  The stage only consults a
//! policy when [`HttpdBuilder::retry_on_connection_failure`] is on and the
//! request body can be sent again.
//!
//! The default policy retries connection resets (a pooled connection the
//! server had already closed), at most twice per call.
//!
//! Custom policies are scoped to one host, because every policy carries a
//! retry budget and sharing it across unrelated hosts would let one bad
//! host starve the others.  Classifiers must only mark requests retryable
//! when the server tolerates receiving them twice.
//!
//! [`HttpdBuilder::retry_on_connection_failure`]: crate::HttpdBuilder::retry_on_connection_failure

use std::sync::Arc;
use std::time::Duration;

use crate::url::UnoUrl;
use http::Method;

use budget::Budget;
pub use classify::{Action, ReqRep};

type ClassifyFn = Arc<dyn for<'a> Fn(ReqRep<'a>) -> Action + Send + Sync>;
type ScopeFn = Arc<dyn Fn(&UnoUrl, &Method) -> bool + Send + Sync>;

/// A retry builder for requests to `host`.
///
/// ```rust
/// use uno::retry;
///
/// let policy = retry::for_host("api.example.com")
///     .max_retries_per_request(3)
///     .classify_fn(|rr| {
///         if rr.status() == Some(http::StatusCode::SERVICE_UNAVAILABLE) {
///             rr.retryable()
///         } else {
///             rr.success()
///         }
///     });
/// let client = uno::Httpd::builder().retry(policy).build();
/// # drop(client);
/// ```
pub fn for_host<S>(host: S) -> Builder
where
    S: for<'a> PartialEq<&'a str> + Send + Sync + 'static,
{
    Builder::scoped(move |url: &UnoUrl, _: &Method| host == url.host())
}

/// A policy that never retries, not even connection resets.
pub fn never() -> Builder {
    Builder::scoped(|_, _| false).no_budget()
}

/// Configures a retry policy.
///
/// Construct with [`for_host()`] or [`never()`].
pub struct Builder {
    budget: Option<f32>,
    classify: Option<ClassifyFn>,
    max_retries_per_request: u32,
    scope: Option<ScopeFn>,
}

impl Builder {
    fn scoped(scope: impl Fn(&UnoUrl, &Method) -> bool + Send + Sync + 'static) -> Self {
        Builder {
            budget: Some(0.2),
            classify: None,
            max_retries_per_request: 2,
            scope: Some(Arc::new(scope)),
        }
    }

    /// The default: connection resets on any host, unbudgeted.
    pub(crate) fn connection_resets() -> Self {
        Builder {
            budget: None,
            classify: Some(Arc::new(|rr| {
                if rr.is_connection_reset() {
                    Action::Retryable
                } else {
                    Action::Success
                }
            })),
            max_retries_per_request: 2,
            scope: None,
        }
    }

    /// Drop the retry budget.  A failing host then sees every call retried
    /// up to the per-request maximum.
    #[must_use]
    pub fn no_budget(mut self) -> Self {
        self.budget = None;
        self
    }

    /// Extra load retries may add, as a fraction of successful calls.
    /// `0.2` allows 20% extra requests.  Clamped to `0.0..=1000.0`.
    #[must_use]
    pub fn max_extra_load(mut self, extra: f32) -> Self {
        let extra = if extra.is_nan() { 0.0 } else { extra.clamp(0.0, 1000.0) };
        self.budget = Some(extra);
        self
    }

    /// Upper bound on retries of one call, budget permitting.  Default 2.
    #[must_use]
    pub fn max_retries_per_request(mut self, max: u32) -> Self {
        self.max_retries_per_request = max;
        self
    }

    /// Decide retryability with a closure.
    #[must_use]
    pub fn classify_fn<F>(mut self, func: F) -> Self
    where
        F: Fn(ReqRep<'_>) -> Action + Send + Sync + 'static,
    {
        self.classify = Some(Arc::new(func));
        self
    }

    pub(crate) fn into_policy(self) -> Policy {
        Policy {
            budget: self
                .budget
                .map(|extra| Arc::new(Budget::new(Duration::from_secs(10), 10, extra))),
            classify: self.classify,
            max_retries_per_request: self.max_retries_per_request,
            scope: self.scope,
        }
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("budget", &self.budget)
            .field("max_retries_per_request", &self.max_retries_per_request)
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}

/// A built policy, shared by every call of a client.
#[derive(Clone)]
pub(crate) struct Policy {
    budget: Option<Arc<Budget>>,
    classify: Option<ClassifyFn>,
    max_retries_per_request: u32,
    scope: Option<ScopeFn>,
}

impl Policy {
    /// Classify the outcome of one attempt at `method url`.
    pub(crate) fn classify(
        &self,
        url: &UnoUrl,
        method: &Method,
        result: &Result<crate::Response, crate::Error>,
    ) -> Action {
        if let Some(scope) = &self.scope
            && !scope(url, method)
        {
            return Action::Success;
        }
        match &self.classify {
            Some(classify) => classify(ReqRep::new(url, method, result)),
            None => Action::Success,
        }
    }

    /// Credit the budget with a call that needed no retry.
    pub(crate) fn deposit(&self) {
        if let Some(budget) = &self.budget {
            budget.deposit();
        }
    }

    /// Spend one retry from the budget, if there is one left.
    pub(crate) fn can_withdraw(&self) -> bool {
        self.budget.as_ref().is_none_or(|b| b.withdraw())
    }

    pub(crate) fn max_retries(&self) -> u32 {
        self.max_retries_per_request
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("budget", &self.budget)
            .field("max_retries_per_request", &self.max_retries_per_request)
            .finish()
    }
}

mod budget {
    //! Sliding-window retry budget.
    //!
    //! The window (`ttl`) is split into ten slots.  Deposits and
    //! withdrawals land in an open accumulator that is committed to the
    //! current slot when time moves past it; slots older than the window
    //! are zeroed.  A withdrawal succeeds while
    //! `reserve + accumulator + sum(slots) >= withdraw_cost`.
    //!
    //! With an extra-load fraction `p`:
    //!
    //! | `p`        | deposit | withdraw cost |
    //! |------------|---------|---------------|
    //! | `0`        | 0       | 1             |
    //! | `(0, 1]`   | 1       | `1 / p`       |
    //! | `> 1`      | 1000    | `1000 / p`    |
    //!
    //! `reserve = min_per_sec * ttl_secs * withdraw_cost`: a floor of
    //! retries available with no successful traffic at all.

    use crate::util::lock_or_clear;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    const SLOTS: usize = 10;

    pub(super) struct Budget {
        window: Mutex<Window>,
        reserve: isize,
        slot_len: Duration,
        pub(super) deposit: isize,
        pub(super) cost: isize,
    }

    struct Window {
        slots: [isize; SLOTS],
        open: isize,
        current: usize,
        opened_at: Instant,
    }

    impl Budget {
        /// `ttl` is clamped to 1..=60 s and `extra` to 0..=1000.
        pub(super) fn new(ttl: Duration, min_per_sec: u32, extra: f32) -> Self {
            let ttl = ttl.clamp(Duration::from_secs(1), Duration::from_secs(60));
            let extra = extra.clamp(0.0, 1000.0);
            let (deposit, cost) = if extra == 0.0 {
                (0, 1)
            } else if extra <= 1.0 {
                (1, (1.0 / extra) as isize)
            } else {
                (1000, (1000.0 / extra) as isize)
            };
            let reserve = (min_per_sec as isize)
                .saturating_mul(ttl.as_secs() as isize)
                .saturating_mul(cost);
            Budget {
                window: Mutex::new(Window {
                    slots: [0; SLOTS],
                    open: 0,
                    current: 0,
                    opened_at: Instant::now(),
                }),
                reserve,
                slot_len: ttl / SLOTS as u32,
                deposit,
                cost,
            }
        }

        pub(super) fn deposit(&self) {
            let mut w = lock_or_clear(&self.window);
            self.roll(&mut w, Instant::now());
            w.open += self.deposit;
        }

        pub(super) fn withdraw(&self) -> bool {
            let mut w = lock_or_clear(&self.window);
            self.roll(&mut w, Instant::now());
            let balance = w
                .slots
                .iter()
                .fold(w.open, |acc, s| acc.saturating_add(*s))
                .saturating_add(self.reserve);
            if balance < self.cost {
                return false;
            }
            w.open -= self.cost;
            true
        }

        /// Commit the open accumulator once its slot has elapsed, and zero
        /// every slot skipped since.
        fn roll(&self, w: &mut Window, now: Instant) {
            let mut elapsed = now.duration_since(w.opened_at);
            if elapsed < self.slot_len {
                return;
            }
            let current = w.current;
            w.slots[current] = std::mem::take(&mut w.open);
            let mut next = (current + 1) % SLOTS;
            while elapsed > self.slot_len {
                w.slots[next] = 0;
                elapsed -= self.slot_len;
                next = (next + 1) % SLOTS;
            }
            w.current = next;
            w.opened_at = now;
        }
    }

    impl std::fmt::Debug for Budget {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Budget")
                .field("deposit", &self.deposit)
                .field("cost", &self.cost)
                .field("reserve", &self.reserve)
                .finish()
        }
    }
}

mod classify {
    use crate::url::UnoUrl;
    use http::{Method, StatusCode};

    /// One attempt's request and outcome, handed to a classifier.
    #[derive(Debug)]
    pub struct ReqRep<'a> {
        url: &'a UnoUrl,
        method: &'a Method,
        result: Result<StatusCode, &'a crate::Error>,
    }

    impl<'a> ReqRep<'a> {
        pub(super) fn new(
            url: &'a UnoUrl,
            method: &'a Method,
            result: &'a Result<crate::Response, crate::Error>,
        ) -> Self {
            ReqRep {
                url,
                method,
                result: match result {
                    Ok(resp) => Ok(resp.code()),
                    Err(e) => Err(e),
                },
            }
        }

        /// The request method.
        pub fn method(&self) -> &Method {
            self.method
        }

        /// The request URL.
        pub fn url(&self) -> &UnoUrl {
            self.url
        }

        /// The response status, if a response arrived.
        pub fn status(&self) -> Option<StatusCode> {
            self.result.ok()
        }

        /// The failure, if no response arrived.
        pub fn error(&self) -> Option<&crate::Error> {
            self.result.err()
        }

        /// Retry this attempt.
        pub fn retryable(self) -> Action {
            Action::Retryable
        }

        /// Keep this outcome.
        pub fn success(self) -> Action {
            Action::Success
        }

        pub(super) fn is_connection_reset(&self) -> bool {
            self.result.err().is_some_and(|e| e.is_connection_reset())
        }
    }

    /// A classifier's verdict.
    #[must_use]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Action {
        /// Keep the outcome.
        Success,
        /// Try again.
        Retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::tests::response;

    #[test]
    fn budget_amounts_table() {
        // (extra, deposit, cost, desc)
        let cases: &[(f32, isize, isize, &str)] = &[
            (0.0, 0, 1, "zero"),
            (0.2, 1, 5, "twenty percent"),
            (1.0, 1, 1, "one to one"),
            (2.5, 1000, 400, "above one"),
            (-3.0, 0, 1, "negative clamps to zero"),
        ];
        for &(extra, deposit, cost, desc) in cases {
            let b = Budget::new(Duration::from_secs(10), 0, extra);
            assert_eq!(b.deposit, deposit, "{desc}");
            assert_eq!(b.cost, cost, "{desc}");
        }
    }

    #[test]
    fn budget_withdrawals_table() {
        // (min_per_sec, ttl secs, extra, deposits, withdrawals, desc)
        let cases: &[(u32, u64, f32, u32, u32, &str)] = &[
            // reserve 5*10*5 = 250 -> 50, plus 10 deposits -> 2 more
            (5, 10, 0.2, 10, 52, "reserve and deposits"),
            (0, 10, 1.0, 5, 5, "deposits only"),
            (3, 10, 0.0, 0, 30, "reserve only"),
            (0, 10, 0.5, 0, 0, "nothing"),
        ];
        for &(min_per_sec, ttl, extra, deposits, expected, desc) in cases {
            let budget = Budget::new(Duration::from_secs(ttl), min_per_sec, extra);
            for _ in 0..deposits {
                budget.deposit();
            }
            let mut count = 0u32;
            while budget.withdraw() && count <= 10_000 {
                count += 1;
            }
            assert_eq!(count, expected, "{desc}");
        }
    }

    #[test]
    fn budget_survives_slot_rollover() {
        let budget = Budget::new(Duration::from_secs(1), 0, 1.0);
        for _ in 0..5 {
            budget.deposit();
        }
        std::thread::sleep(Duration::from_millis(350));
        budget.deposit();
        assert!(budget.withdraw());
    }

    #[test]
    fn scope_table() {
        let policy = for_host("example.com").into_policy();
        let scope = policy.scope.as_ref().unwrap();
        // (url, in scope, desc)
        let cases: &[(&str, bool, &str)] = &[
            ("https://example.com/test", true, "same host"),
            ("http://example.com:8080/", true, "other scheme and port"),
            ("https://other.com/", false, "other host"),
            ("https://sub.example.com/", false, "subdomain"),
        ];
        for &(url, expected, desc) in cases {
            assert_eq!(scope(&UnoUrl::get(url).unwrap(), &Method::GET), expected, "{desc}");
        }
    }

    #[test]
    fn classify_table() {
        let retry_503 = for_host("example.com")
            .no_budget()
            .classify_fn(|rr| {
                if rr.status() == Some(http::StatusCode::SERVICE_UNAVAILABLE) {
                    rr.retryable()
                } else {
                    rr.success()
                }
            })
            .into_policy();
        let never = never().into_policy();
        let default = Builder::connection_resets().into_policy();
        let unclassified = for_host("example.com").into_policy();

        type Outcome = Result<crate::Response, crate::Error>;
        let builder_err: Outcome = Err(crate::Error::builder("x"));
        let reset: Outcome = Err(crate::Error::request("reset")
            .with_source(std::io::Error::from(std::io::ErrorKind::ConnectionReset)));
        let eof: Outcome = Err(crate::Error::io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)));
        let unavailable: Outcome = Ok(response(503, &[]));

        // (policy, url, outcome, expected, desc)
        let cases: &[(&Policy, &str, &Outcome, Action, &str)] = &[
            (&retry_503, "https://example.com/", &unavailable, Action::Retryable, "503 in scope"),
            (&retry_503, "https://other.com/", &unavailable, Action::Success, "503 out of scope"),
            (&retry_503, "https://example.com/", &builder_err, Action::Success, "error is not 503"),
            (&never, "https://example.com/", &reset, Action::Success, "never"),
            (&default, "https://any.host/", &reset, Action::Retryable, "default retries reset"),
            (&default, "https://any.host/", &eof, Action::Retryable, "default retries eof"),
            (&default, "https://any.host/", &builder_err, Action::Success, "default keeps other errors"),
            (&default, "https://any.host/", &unavailable, Action::Success, "default keeps responses"),
            (&unclassified, "https://example.com/", &reset, Action::Success, "no classifier"),
        ];
        for (policy, url, outcome, expected, desc) in cases {
            let action = policy.classify(&UnoUrl::get(url).unwrap(), &Method::GET, outcome);
            assert_eq!(action, *expected, "{desc}");
        }
    }

    #[test]
    fn classifier_sees_request() {
        let policy = for_host("example.com")
            .no_budget()
            .classify_fn(|rr| {
                if rr.method() == Method::POST && rr.url().encoded_path() == "/api" && rr.error().is_some() {
                    rr.retryable()
                } else {
                    rr.success()
                }
            })
            .into_policy();
        let url = UnoUrl::get("https://example.com/api").unwrap();
        let outcome: Result<crate::Response, crate::Error> = Err(crate::Error::builder("x"));
        assert_eq!(policy.classify(&url, &Method::POST, &outcome), Action::Retryable);
        assert_eq!(policy.classify(&url, &Method::GET, &outcome), Action::Success);
    }

    #[test]
    fn extra_load_and_limits() {
        // cost 2, reserve 10*10*2 = 200 -> 100, plus 20 deposits -> 10 more
        let policy = for_host("x").max_extra_load(0.5).into_policy();
        for _ in 0..20 {
            policy.deposit();
        }
        let mut count = 0;
        while policy.can_withdraw() && count <= 200 {
            count += 1;
        }
        assert_eq!(count, 110);

        let unbudgeted = for_host("x").no_budget().max_retries_per_request(7).into_policy();
        assert!((0..100).all(|_| unbudgeted.can_withdraw()));
        assert_eq!(unbudgeted.max_retries(), 7);

        let clamped = for_host("x").max_extra_load(f32::NAN).into_policy();
        assert!(format!("{clamped:?}").contains("cost: 1"));
    }
}
