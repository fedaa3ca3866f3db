//! Per-request execution context: wall-clock budget, cancellation and counters.
//!
//! Every backend and sandbox call in a generation request goes through
//! [`RunContext::run`], which races the call against its own timeout, the
//! request's overall deadline and the cancellation token.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Cooperative cancellation token shared between a caller and a running request.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Why a request stopped before its work was done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    BudgetExhausted,
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interrupt::Cancelled => write!(f, "cancelled"),
            Interrupt::BudgetExhausted => write!(f, "wall-clock budget exhausted"),
        }
    }
}

/// Failure of a guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    /// The whole request must stop.
    Interrupted(Interrupt),
    /// Only this call exceeded its own timeout.
    TimedOut(Duration),
}

/// Usage counters for one request.
#[derive(Debug, Default)]
pub struct RunCounters {
    backend_calls: AtomicU32,
    sandbox_calls: AtomicU32,
    tokens_used: AtomicU64,
}

impl RunCounters {
    pub fn record_backend_call(&self, tokens: u32) {
        self.backend_calls.fetch_add(1, Ordering::Relaxed);
        self.tokens_used.fetch_add(u64::from(tokens), Ordering::Relaxed);
    }

    pub fn record_sandbox_call(&self) {
        self.sandbox_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_calls(&self) -> u32 {
        self.backend_calls.load(Ordering::Relaxed)
    }

    pub fn sandbox_calls(&self) -> u32 {
        self.sandbox_calls.load(Ordering::Relaxed)
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }
}

/// Budget, cancellation and counters for a single generation request.
///
/// Not shared between requests.
#[derive(Debug)]
pub struct RunContext {
    deadline: Instant,
    cancel: CancellationToken,
    counters: RunCounters,
}

impl RunContext {
    pub fn new(budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + budget,
            cancel,
            counters: RunCounters::default(),
        }
    }

    /// Context with a budget and a token nobody else holds.
    pub fn with_budget(budget: Duration) -> Self {
        Self::new(budget, CancellationToken::new())
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Fails if the request was cancelled or its budget is spent.
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(Interrupt::BudgetExhausted);
        }
        Ok(())
    }

    /// Runs `fut` bounded by `call_timeout`, the request deadline and cancellation.
    ///
    /// Cancellation wins over every other outcome. When the request deadline
    /// is the tighter bound, expiry is reported as budget exhaustion rather
    /// than a call timeout.
    pub async fn run<F, T>(&self, call_timeout: Duration, fut: F) -> Result<T, GuardError>
    where
        F: Future<Output = T>,
    {
        self.check().map_err(GuardError::Interrupted)?;

        let call_deadline = Instant::now() + call_timeout;
        let budget_binds = self.deadline <= call_deadline;
        let deadline = if budget_binds {
            self.deadline
        } else {
            call_deadline
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GuardError::Interrupted(Interrupt::Cancelled)),
            result = tokio::time::timeout_at(deadline, fut) => match result {
                Ok(value) => Ok(value),
                Err(_) if budget_binds => Err(GuardError::Interrupted(Interrupt::BudgetExhausted)),
                Err(_) => Err(GuardError::TimedOut(call_timeout)),
            },
        }
    }
}
