use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Listens for one interrupt while alive. Dropping the guard stops listening,
/// on every exit path.
pub struct InterruptGuard {
    fired: watch::Receiver<bool>,
    listener: JoinHandle<()>,
    active: Option<Arc<AtomicUsize>>,
}

impl InterruptGuard {
    /// Fire when `signal` completes.
    pub fn from_signal<F>(signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let listener = tokio::spawn(async move {
            signal.await;
            let _ = tx.send(true);
        });
        Self {
            fired: rx,
            listener,
            active: None,
        }
    }

    fn tracked(mut self, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        self.active = Some(active);
        self
    }

    pub fn is_interrupted(&self) -> bool {
        *self.fired.borrow()
    }

    /// Resolves once the interrupt has fired; never resolves otherwise.
    pub async fn interrupted(&mut self) {
        loop {
            if *self.fired.borrow() {
                return;
            }
            if self.fired.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.listener.abort();
        if let Some(ref active) = self.active {
            active.fetch_sub(1, Ordering::SeqCst);
        }
        tracing::debug!("Interrupt handler removed");
    }
}

/// Hands out interrupt guards for execute-and-wait calls.
pub trait InterruptSource: Send + Sync {
    fn install(&self) -> InterruptGuard;
}

/// The process's Ctrl-C signal.
pub struct CtrlC;

impl InterruptSource for CtrlC {
    fn install(&self) -> InterruptGuard {
        tracing::debug!("Interrupt handler installed");
        InterruptGuard::from_signal(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
    }
}

/// Interrupt fired by hand, for tests.
#[derive(Clone, Default)]
pub struct ManualInterrupt {
    notify: Arc<Notify>,
    active: Arc<AtomicUsize>,
}

impl ManualInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the interrupt for the currently installed guard (or the next one).
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Number of guards currently installed.
    pub fn active_guards(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl InterruptSource for ManualInterrupt {
    fn install(&self) -> InterruptGuard {
        let notify = Arc::clone(&self.notify);
        InterruptGuard::from_signal(async move { notify.notified().await })
            .tracked(Arc::clone(&self.active))
    }
}
