//! Single-flight request slot with cooperative cancellation
//!
//! Every remote client owns one slot. A request runs inside the slot; a
//! second request while one is outstanding is rejected with `Busy`.
//! [`InFlight::cancel`] settles the outstanding request with `Canceled`
//! and is a no-op when nothing is in flight.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Outstanding request: ticket number + its cancellation token
type Slot = Option<(u64, CancellationToken)>;

/// At-most-one outstanding request, cancelable from anywhere
#[derive(Debug)]
pub struct InFlight {
    name: &'static str,
    slot: Mutex<Slot>,
    next_ticket: AtomicU64,
}

impl InFlight {
    /// Create an empty slot; `name` appears in `Busy` errors and logs
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Run `request` in the slot
    ///
    /// # Errors
    ///
    /// Returns `Busy` if a request is already outstanding, `Canceled` if
    /// [`Self::cancel`] is called before `request` settles, or whatever
    /// `request` itself returns
    pub async fn run<F, T>(&self, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let (ticket, token) = self.begin()?;
        let _release = Release {
            inflight: self,
            ticket,
        };

        tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(client = self.name, "request canceled");
                Err(Error::Canceled)
            }
            result = request => result,
        }
    }

    /// Cancel the outstanding request, if any
    ///
    /// Returns whether a request was actually canceled.
    pub fn cancel(&self) -> bool {
        match self.lock().take() {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a request is outstanding
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    fn begin(&self) -> Result<(u64, CancellationToken)> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(Error::Busy(self.name));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *slot = Some((ticket, token.clone()));
        Ok((ticket, token))
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the slot when a request settles or its future is dropped
struct Release<'a> {
    inflight: &'a InFlight,
    ticket: u64,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        let mut slot = self.inflight.lock();
        if slot.as_ref().is_some_and(|(ticket, _)| *ticket == self.ticket) {
            *slot = None;
        }
    }
}
