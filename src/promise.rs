//! A settle-once promise that doubles as a [`Future`].
//!
//! Extensions return [`Value::Promise`] when their result is not available
//! yet. Rendering in [`ExecutionMode::Async`] awaits them, while
//! [`ExecutionMode::Sync`] polls once and fails with
//! [`TwigError::AsyncInSyncMode`] if nothing has settled.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::{Pin, pin};
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll, Waker};

use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::task::noop_waker_ref;

use crate::error::{TwigError, TwigResult};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Unknown,
    Resolved,
    Rejected,
}

enum Settlement {
    Pending {
        waiters: Vec<Waker>,
        driver: Option<LocalBoxFuture<'static, TwigResult<Value>>>,
    },
    Resolved(Value),
    Rejected(TwigError),
}

impl Settlement {
    fn from_result(result: TwigResult<Value>) -> Self {
        match result {
            Ok(value) => Self::Resolved(value),
            Err(err) => Self::Rejected(err),
        }
    }
}

#[derive(Clone)]
pub struct Promise {
    inner: Rc<RefCell<Settlement>>,
}

/// The settling half of [`Promise::pending`].
pub struct Resolver {
    inner: Rc<RefCell<Settlement>>,
}

thread_local! {
    static UNDEFINED: Promise = Promise::settled(Settlement::Resolved(Value::Undefined));
    static EMPTY: Promise = Promise::settled(Settlement::Resolved(Value::String(String::new())));
}

impl Promise {
    fn settled(settlement: Settlement) -> Self {
        Self {
            inner: Rc::new(RefCell::new(settlement)),
        }
    }

    /// A resolved promise. `undefined` and `""` share one instance per thread.
    pub fn resolve(value: Value) -> Self {
        match &value {
            Value::Undefined => UNDEFINED.with(Clone::clone),
            Value::String(s) if s.is_empty() => EMPTY.with(Clone::clone),
            _ => Self::settled(Settlement::Resolved(value)),
        }
    }

    pub fn reject(error: TwigError) -> Self {
        Self::settled(Settlement::Rejected(error))
    }

    pub fn pending() -> (Self, Resolver) {
        let inner = Rc::new(RefCell::new(Settlement::Pending {
            waiters: Vec::new(),
            driver: None,
        }));
        (
            Self {
                inner: Rc::clone(&inner),
            },
            Resolver { inner },
        )
    }

    /// Wraps a future; it is driven by whoever awaits the promise first.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = TwigResult<Value>> + 'static,
    {
        Self::settled(Settlement::Pending {
            waiters: Vec::new(),
            driver: Some(future.boxed_local()),
        })
    }

    pub fn state(&self) -> PromiseState {
        let state = self.inner.borrow();
        match &*state {
            Settlement::Pending { .. } => PromiseState::Unknown,
            Settlement::Resolved(_) => PromiseState::Resolved,
            Settlement::Rejected(_) => PromiseState::Rejected,
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Polls once without a real waker. `None` while still pending.
    pub fn try_settle_now(&self) -> Option<TwigResult<Value>> {
        let mut cx = TaskContext::from_waker(noop_waker_ref());
        match Pin::new(&mut self.clone()).poll(&mut cx) {
            Poll::Ready(result) => Some(result),
            Poll::Pending => None,
        }
    }
}

fn settle(inner: &RefCell<Settlement>, result: TwigResult<Value>) -> bool {
    let previous = {
        let mut state = inner.borrow_mut();
        if !matches!(*state, Settlement::Pending { .. }) {
            return false;
        }
        std::mem::replace(&mut *state, Settlement::from_result(result))
    };
    if let Settlement::Pending { waiters, .. } = previous {
        for waker in waiters {
            waker.wake();
        }
    }
    true
}

impl Resolver {
    /// Returns `false` if the promise had already settled.
    pub fn resolve(&self, value: Value) -> bool {
        settle(&self.inner, Ok(value))
    }

    pub fn reject(&self, error: TwigError) -> bool {
        settle(&self.inner, Err(error))
    }
}

impl Future for Promise {
    type Output = TwigResult<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let driver = {
            let mut state = self.inner.borrow_mut();
            match &mut *state {
                Settlement::Resolved(value) => return Poll::Ready(Ok(value.clone())),
                Settlement::Rejected(err) => return Poll::Ready(Err(err.clone())),
                Settlement::Pending { driver, .. } => driver.take(),
            }
        };

        if let Some(mut driver) = driver {
            match driver.as_mut().poll(cx) {
                Poll::Ready(result) => {
                    settle(&self.inner, result.clone());
                    return Poll::Ready(result);
                }
                Poll::Pending => {
                    let mut state = self.inner.borrow_mut();
                    if let Settlement::Pending { driver: slot, .. } = &mut *state {
                        *slot = Some(driver);
                    }
                }
            }
        }

        let mut state = self.inner.borrow_mut();
        match &mut *state {
            Settlement::Resolved(value) => Poll::Ready(Ok(value.clone())),
            Settlement::Rejected(err) => Poll::Ready(Err(err.clone())),
            Settlement::Pending { waiters, .. } => {
                if !waiters.iter().any(|w| w.will_wake(cx.waker())) {
                    waiters.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish()
    }
}

/// How extension results that are still pending are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sync,
    Async,
}

impl ExecutionMode {
    /// Unwraps (possibly nested) promises.
    pub(crate) async fn settle(self, mut value: Value) -> TwigResult<Value> {
        while let Value::Promise(promise) = value {
            value = match self {
                Self::Sync => promise
                    .try_settle_now()
                    .unwrap_or(Err(TwigError::AsyncInSyncMode))?,
                Self::Async => promise.await?,
            };
        }
        Ok(value)
    }
}

/// Drives `future` to completion with a single poll.
pub(crate) fn run_sync<T, F>(future: F) -> TwigResult<T>
where
    F: Future<Output = TwigResult<T>>,
{
    let mut future = pin!(future);
    let mut cx = TaskContext::from_waker(noop_waker_ref());
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => Err(TwigError::AsyncInSyncMode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_first_settle_wins() {
        let (promise, resolver) = Promise::pending();
        assert_eq!(promise.state(), PromiseState::Unknown, "starts pending");
        assert!(resolver.resolve(Value::from(1)), "first settle applies");
        assert!(!resolver.reject(TwigError::runtime("late")), "second is ignored");
        assert_eq!(promise.state(), PromiseState::Resolved, "resolved");
        assert_eq!(
            promise.try_settle_now(),
            Some(Ok(Value::from(1))),
            "keeps first value"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_shared_instances() {
        assert!(
            Promise::resolve(Value::Undefined).ptr_eq(&Promise::resolve(Value::Undefined)),
            "undefined is shared"
        );
        assert!(
            Promise::resolve(Value::from("")).ptr_eq(&Promise::resolve(Value::from(""))),
            "empty string is shared"
        );
        assert!(
            !Promise::resolve(Value::from(1)).ptr_eq(&Promise::resolve(Value::from(1))),
            "other values are not"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_sync_settle_of_pending_fails() {
        let (promise, _resolver) = Promise::pending();
        let result = run_sync(ExecutionMode::Sync.settle(Value::Promise(promise)));
        assert_eq!(result, Err(TwigError::AsyncInSyncMode), "pending in sync mode");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_ready_future_settles_synchronously() {
        let promise = Promise::from_future(async { Ok(Value::from("done")) });
        let result = run_sync(ExecutionMode::Sync.settle(Value::Promise(promise.clone())));
        assert_eq!(result, Ok(Value::from("done")), "ready future");
        assert_eq!(promise.state(), PromiseState::Resolved, "driver settled it");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_rejection_propagates() {
        let promise = Promise::reject(TwigError::runtime("nope"));
        let result = run_sync(ExecutionMode::Async.settle(Value::Promise(promise)));
        assert_eq!(result, Err(TwigError::runtime("nope")), "rejected");
    }
}
