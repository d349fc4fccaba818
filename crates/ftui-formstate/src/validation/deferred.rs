#![forbid(unsafe_code)]

//! Single-threaded pending result handle for async validators.
//!
//! A validator that cannot answer synchronously returns
//! [`Validation::Pending`](super::Validation::Pending) with a [`Deferred`] and
//! hands the paired [`Resolver`] to whatever will produce the answer (a
//! timer, an I/O completion, a test). Settling the resolver runs the
//! registered callbacks synchronously, in registration order.
//!
//! `Deferred` is also a [`Future`] yielding the final [`Settlement`], so an
//! executor-driven caller can `.await` a validator result. Settling wakes
//! every task that polled the handle while it was pending.
//!
//! # Failure Modes
//!
//! - A `Resolver` dropped without settling leaves the handle pending forever;
//!   the node keeps reporting `is_validating`.
//! - Settling twice is impossible: `resolve`/`reject` consume the resolver.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use super::ValidationError;

/// Observable state of a [`Deferred`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Settlement {
    #[default]
    Pending,
    /// Finished; `None` means "no error".
    Resolved(Option<ValidationError>),
    /// The validator itself failed.
    Rejected(String),
}

impl Settlement {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

type SettleCallback = Box<dyn FnOnce(&Settlement)>;

#[derive(Default)]
struct Slot {
    settlement: Settlement,
    callbacks: Vec<SettleCallback>,
    wakers: Vec<Waker>,
}

/// Read side of a pending validation. Clones share the same slot.
#[derive(Clone)]
pub struct Deferred {
    slot: Rc<RefCell<Slot>>,
}

/// Write side of a pending validation.
pub struct Resolver {
    slot: Rc<RefCell<Slot>>,
}

impl Deferred {
    /// A fresh pending handle and its resolver.
    #[must_use]
    pub fn new() -> (Self, Resolver) {
        let slot = Rc::new(RefCell::new(Slot::default()));
        (Self { slot: slot.clone() }, Resolver { slot })
    }

    /// A handle that is already resolved.
    #[must_use]
    pub fn resolved(error: Option<ValidationError>) -> Self {
        let (deferred, resolver) = Self::new();
        resolver.resolve(error);
        deferred
    }

    /// A handle that is already rejected.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        let (deferred, resolver) = Self::new();
        resolver.reject(reason);
        deferred
    }

    #[must_use]
    pub fn settlement(&self) -> Settlement {
        self.slot.borrow().settlement.clone()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.borrow().settlement.is_pending()
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.slot.borrow().settlement.is_rejected()
    }

    /// Whether both handles observe the same slot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }

    /// Run `callback` once the handle settles, or right away if it already has.
    pub(crate) fn on_settle(&self, callback: impl FnOnce(&Settlement) + 'static) {
        let settled = {
            let mut slot = self.slot.borrow_mut();
            if slot.settlement.is_pending() {
                slot.callbacks.push(Box::new(callback));
                return;
            }
            slot.settlement.clone()
        };
        callback(&settled);
    }
}

impl Future for Deferred {
    type Output = Settlement;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Settlement> {
        let mut slot = self.slot.borrow_mut();
        if !slot.settlement.is_pending() {
            return Poll::Ready(slot.settlement.clone());
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred")
            .field(&self.slot.borrow().settlement)
            .finish()
    }
}

impl Resolver {
    /// Settle with a validation result (`None` = no error).
    pub fn resolve(self, error: Option<ValidationError>) {
        self.settle(Settlement::Resolved(error));
    }

    /// Settle as failed.
    pub fn reject(self, reason: impl Into<String>) {
        self.settle(Settlement::Rejected(reason.into()));
    }

    fn settle(self, settlement: Settlement) {
        let (callbacks, wakers) = {
            let mut slot = self.slot.borrow_mut();
            slot.settlement = settlement.clone();
            (
                std::mem::take(&mut slot.callbacks),
                std::mem::take(&mut slot.wakers),
            )
        };
        for callback in callbacks {
            callback(&settlement);
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}
