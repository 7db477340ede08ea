//! Main-thread promises.
//!
//! A [`Promise`] settles at most once. Reactions attached with
//! [`Promise::then`] / [`Promise::catch`] each run as their own microtask once
//! the promise settles, and awaiting a promise from an async unit always
//! suspends at least once, resuming through the microtask queue.
//!
//! A promise that is rejected while nothing observes it is recorded with the
//! loop. If a reaction or an awaiter attaches later the record is withdrawn;
//! records still open when the loop runs out of work become unhandled
//! rejection diagnostics.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use crate::context::LoopContext;
use crate::error::CallbackError;
use crate::task::panic_message;

static NEXT_PROMISE_ID: AtomicU64 = AtomicU64::new(0);

type Reaction<T> = Box<dyn FnOnce(&mut LoopContext, Result<T, CallbackError>)>;

/// Settlement state of a promise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseState<T> {
    Pending,
    Fulfilled(T),
    Rejected(CallbackError),
}

/// Something waiting for a promise to settle, kept in attach order.
enum Observer<T> {
    Reaction(Reaction<T>),
    Waker(Waker),
}

struct PromiseInner<T> {
    id: u64,
    state: PromiseState<T>,
    observers: Vec<Observer<T>>,
    handled: Rc<Cell<bool>>,
}

/// A rejection nobody has observed yet.
#[derive(Debug)]
pub(crate) struct PendingRejection {
    pub(crate) promise: u64,
    pub(crate) error: CallbackError,
    handled: Rc<Cell<bool>>,
}

impl PendingRejection {
    pub(crate) fn is_handled(&self) -> bool {
        self.handled.get()
    }
}

/// A single-threaded promise owned by the loop thread.
pub struct Promise<T> {
    inner: Rc<RefCell<PromiseInner<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let state = match inner.state {
            PromiseState::Pending => "pending",
            PromiseState::Fulfilled(_) => "fulfilled",
            PromiseState::Rejected(_) => "rejected",
        };
        f.debug_struct("Promise")
            .field("id", &inner.id)
            .field("state", &state)
            .finish()
    }
}

/// The settling side of a pending promise.
pub struct Resolver<T> {
    promise: Promise<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("promise", &self.promise).finish()
    }
}

impl<T: Clone + 'static> Resolver<T> {
    /// Fulfills the promise. Ignored if it already settled.
    pub fn resolve(&self, ctx: &mut LoopContext, value: T) {
        self.promise.settle(ctx, Ok(value));
    }

    /// Rejects the promise. Ignored if it already settled.
    pub fn reject(&self, ctx: &mut LoopContext, error: CallbackError) {
        self.promise.settle(ctx, Err(error));
    }

    pub fn settle(&self, ctx: &mut LoopContext, result: Result<T, CallbackError>) {
        self.promise.settle(ctx, result);
    }

    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }
}

impl<T: Clone + 'static> Promise<T> {
    fn with_state(state: PromiseState<T>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PromiseInner {
                id: NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed),
                state,
                observers: Vec::new(),
                handled: Rc::new(Cell::new(false)),
            })),
        }
    }

    /// A pending promise and the resolver that settles it.
    pub fn pending() -> (Promise<T>, Resolver<T>) {
        let promise = Self::with_state(PromiseState::Pending);
        let resolver = Resolver {
            promise: promise.clone(),
        };
        (promise, resolver)
    }

    /// An already fulfilled promise.
    pub fn resolved(value: T) -> Self {
        Self::with_state(PromiseState::Fulfilled(value))
    }

    /// An already rejected promise, recorded as unhandled until observed.
    pub fn rejected(ctx: &mut LoopContext, error: CallbackError) -> Self {
        let (promise, resolver) = Self::pending();
        resolver.reject(ctx, error);
        promise
    }

    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    pub fn state(&self) -> PromiseState<T> {
        self.inner.borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, PromiseState::Pending)
    }

    /// The settled result, if any.
    pub fn result(&self) -> Option<Result<T, CallbackError>> {
        match &self.inner.borrow().state {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
            PromiseState::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// Runs `f` with the fulfilled value; the returned promise settles with its result.
    /// A rejection skips `f` and passes through.
    pub fn then<U, F>(&self, ctx: &mut LoopContext, f: F) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(&mut LoopContext, T) -> Result<U, CallbackError> + 'static,
    {
        let (derived, resolver) = Promise::pending();
        self.subscribe(ctx, move |ctx, result| {
            let next = match result {
                Ok(value) => guarded(|| f(ctx, value)),
                Err(error) => Err(error),
            };
            resolver.settle(ctx, next);
        });
        derived
    }

    /// Runs `f` with the rejection reason; a fulfilled value passes through.
    pub fn catch<F>(&self, ctx: &mut LoopContext, f: F) -> Promise<T>
    where
        F: FnOnce(&mut LoopContext, CallbackError) -> Result<T, CallbackError> + 'static,
    {
        let (derived, resolver) = Promise::pending();
        self.subscribe(ctx, move |ctx, result| {
            let next = match result {
                Ok(value) => Ok(value),
                Err(error) => guarded(|| f(ctx, error)),
            };
            resolver.settle(ctx, next);
        });
        derived
    }

    /// Low-level reaction: `f` receives the settled result in its own microtask.
    pub fn subscribe<F>(&self, ctx: &mut LoopContext, f: F)
    where
        F: FnOnce(&mut LoopContext, Result<T, CallbackError>) + 'static,
    {
        let settled = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            inner.handled.set(true);
            match &inner.state {
                PromiseState::Pending => {
                    inner.observers.push(Observer::Reaction(Box::new(f)));
                    return;
                }
                PromiseState::Fulfilled(value) => Ok(value.clone()),
                PromiseState::Rejected(error) => Err(error.clone()),
            }
        };
        ctx.queue_microtask(move |ctx| {
            f(ctx, settled);
            Ok(())
        });
    }

    fn settle(&self, ctx: &mut LoopContext, result: Result<T, CallbackError>) {
        let (observers, unobserved) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, PromiseState::Pending) {
                return;
            }
            inner.state = match &result {
                Ok(value) => PromiseState::Fulfilled(value.clone()),
                Err(error) => PromiseState::Rejected(error.clone()),
            };
            let unobserved = result.is_err() && inner.observers.is_empty() && !inner.handled.get();
            let unobserved = unobserved.then(|| (inner.id, inner.handled.clone()));
            (std::mem::take(&mut inner.observers), unobserved)
        };

        for observer in observers {
            match observer {
                Observer::Reaction(reaction) => {
                    let result = result.clone();
                    ctx.queue_microtask(move |ctx| {
                        reaction(ctx, result);
                        Ok(())
                    });
                }
                Observer::Waker(waker) => {
                    waker.wake();
                    // The resume must queue before the next observer's reaction.
                    ctx.flush_wakes();
                }
            }
        }
        if let (Some((promise, handled)), Err(error)) = (unobserved, result) {
            ctx.track_rejection(PendingRejection {
                promise,
                error,
                handled,
            });
        }
    }
}

fn guarded<U, F>(f: F) -> Result<U, CallbackError>
where
    F: FnOnce() -> Result<U, CallbackError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(CallbackError::Panicked(panic_message(payload))),
    }
}

/// Future returned by awaiting a [`Promise`].
pub struct PromiseFuture<T> {
    promise: Promise<T>,
    yielded: bool,
}

impl<T: Clone + 'static> Future for PromiseFuture<T> {
    type Output = Result<T, CallbackError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut guard = this.promise.inner.borrow_mut();
        let inner = &mut *guard;
        inner.handled.set(true);

        let settled = !matches!(inner.state, PromiseState::Pending);
        if !this.yielded {
            this.yielded = true;
            if settled {
                cx.waker().wake_by_ref();
            } else {
                inner.observers.push(Observer::Waker(cx.waker().clone()));
            }
            return Poll::Pending;
        }

        match &inner.state {
            PromiseState::Pending => {
                let registered = inner.observers.iter().any(|observer| match observer {
                    Observer::Waker(waker) => waker.will_wake(cx.waker()),
                    Observer::Reaction(_) => false,
                });
                if !registered {
                    inner.observers.push(Observer::Waker(cx.waker().clone()));
                }
                Poll::Pending
            }
            PromiseState::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            PromiseState::Rejected(error) => Poll::Ready(Err(error.clone())),
        }
    }
}

impl<T: Clone + 'static> IntoFuture for Promise<T> {
    type Output = Result<T, CallbackError>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseFuture {
            promise: self,
            yielded: false,
        }
    }
}
