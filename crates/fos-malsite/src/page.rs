//! Page lifecycle tokens
//!
//! Escalations outlive the check that started them. A [`PageScope`] is
//! owned by whoever owns the page; every check made on behalf of the page
//! carries a [`PageToken`]. Cancelling or dropping the scope turns every
//! pending "site blocked" continuation for that page into a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Owner side of a page lifecycle
pub struct PageScope {
    id: u64,
    cancel_tx: watch::Sender<bool>,
}

impl PageScope {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id: NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed),
            cancel_tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token to hand to checks made for this page
    pub fn token(&self) -> PageToken {
        PageToken {
            page_id: self.id,
            cancel_rx: self.cancel_tx.subscribe(),
        }
    }

    /// Tear the page down
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

impl Default for PageScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a page lifecycle
#[derive(Clone)]
pub struct PageToken {
    page_id: u64,
    cancel_rx: watch::Receiver<bool>,
}

impl PageToken {
    pub fn page_id(&self) -> u64 {
        self.page_id
    }

    /// True once the scope was cancelled or dropped
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow() || self.cancel_rx.has_changed().is_err()
    }

    /// Resolves when the scope is cancelled or dropped
    pub async fn cancelled(&mut self) {
        loop {
            if *self.cancel_rx.borrow_and_update() {
                return;
            }
            if self.cancel_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for PageToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageToken")
            .field("page_id", &self.page_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
