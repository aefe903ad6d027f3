//! Navigation Interceptor
//!
//! Connects the detector to browser navigation. The browser calls in at
//! three points:
//!
//! 1. `should_override_url_loading` for main-frame navigations and redirects
//! 2. `on_page_load_started` when the page commits
//! 3. `should_intercept` for every sub-resource request of the page
//!
//! Each page gets its own [`PageScope`]. Starting a new page cancels the
//! old scope, so late confirmations for a page the user already left are
//! dropped. A page escalates each host at most once and reports "site
//! blocked" at most once.

use crate::detector::MaliciousSiteDetector;
use crate::page::{PageScope, PageToken};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, info, trace};
use url::Url;

/// Result of interception check
#[derive(Debug, Clone)]
pub enum InterceptResult {
    /// Request is allowed to proceed
    Allow,
    /// Request is blocked
    Blocked {
        reason: BlockReason,
        /// Time spent in the synchronous check (microseconds)
        check_time_us: u64,
    },
}

impl InterceptResult {
    pub fn is_blocked(&self) -> bool {
        matches!(self, InterceptResult::Blocked { .. })
    }
}

/// Reason why a request was blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// Main-frame navigation to a malicious site
    MaliciousNavigation { host: String },
    /// Sub-resource from a malicious site
    MaliciousResource {
        host: String,
        /// Document that requested the resource
        document: Option<String>,
    },
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaliciousNavigation { host } => write!(f, "Malicious site: {}", host),
            Self::MaliciousResource {
                host,
                document: Some(document),
            } => write!(f, "Malicious resource: {} (loaded by {})", host, document),
            Self::MaliciousResource { host, document: None } => {
                write!(f, "Malicious resource: {}", host)
            }
        }
    }
}

/// Per-page bookkeeping
struct PageState {
    scope: PageScope,
    /// Set once the browser reported the page load as started
    load_started: AtomicBool,
    /// Set once the page reported "site blocked"
    reported: AtomicBool,
    /// Hosts this page already sent to background confirmation
    escalated_hosts: Mutex<HashSet<String>>,
}

impl PageState {
    fn new(load_started: bool) -> Arc<Self> {
        Arc::new(Self {
            scope: PageScope::new(),
            load_started: AtomicBool::new(load_started),
            reported: AtomicBool::new(false),
            escalated_hosts: Mutex::new(HashSet::new()),
        })
    }

    /// Claim `host` for escalation; `false` if this page already did
    fn claim_escalation(&self, host: &str) -> bool {
        self.escalated_hosts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host.to_string())
    }
}

/// Interception statistics
#[derive(Debug, Default)]
pub struct InterceptorStats {
    pub total_checks: AtomicU64,
    pub blocked: AtomicU64,
    pub escalated: AtomicU64,
    pub reported_async: AtomicU64,
    pub total_check_time_ns: AtomicU64,
}

/// Browser-facing malicious site interceptor
pub struct MaliciousSiteInterceptor {
    detector: Arc<MaliciousSiteDetector>,
    page: RwLock<Arc<PageState>>,
    stats: Arc<InterceptorStats>,
}

impl MaliciousSiteInterceptor {
    pub fn new(detector: Arc<MaliciousSiteDetector>) -> Self {
        Self {
            detector,
            page: RwLock::new(PageState::new(true)),
            stats: Arc::new(InterceptorStats::default()),
        }
    }

    /// Check a main-frame navigation before it starts.
    ///
    /// Returns `true` when the navigation must be cancelled.
    pub fn should_override_url_loading<F>(
        &self,
        url: &Url,
        is_for_main_frame: bool,
        is_redirect: bool,
        on_site_blocked: F,
    ) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !is_for_main_frame || !is_checked_scheme(url) {
            return false;
        }

        // A fresh navigation belongs to the page it is about to create;
        // a redirect continues the navigation already in flight.
        let page = if is_redirect {
            self.current_page()
        } else {
            self.begin_navigation()
        };

        match self.run_check(url, &page, on_site_blocked) {
            Some(_) => {
                info!("Cancelled navigation to {}", host_of(url));
                true
            }
            None => false,
        }
    }

    /// The browser committed a new page load
    pub fn on_page_load_started(&self) {
        let current = self.current_page();
        if !current.load_started.swap(true, Ordering::AcqRel) {
            // Page was opened by the navigation check; keep its escalations
            trace!("Page {} load started", current.scope.id());
            return;
        }
        let next = PageState::new(true);
        self.replace_page(next);
    }

    /// Check a sub-resource request of the current page
    pub fn should_intercept<F>(
        &self,
        request_url: &Url,
        document_url: Option<&Url>,
        on_site_blocked: F,
    ) -> InterceptResult
    where
        F: FnOnce() + Send + 'static,
    {
        if !is_checked_scheme(request_url) {
            return InterceptResult::Allow;
        }

        let page = self.current_page();
        match self.run_check(request_url, &page, on_site_blocked) {
            Some(check_time_us) => {
                let reason = BlockReason::MaliciousResource {
                    host: host_of(request_url).to_string(),
                    document: document_url.map(|u| u.to_string()),
                };
                debug!("Intercepted request ({}μs) - {}", check_time_us, reason);
                InterceptResult::Blocked {
                    reason,
                    check_time_us,
                }
            }
            None => InterceptResult::Allow,
        }
    }

    /// Check a URL for `page`; `Some(check time)` when it must be blocked now
    fn run_check<F>(&self, url: &Url, page: &Arc<PageState>, on_site_blocked: F) -> Option<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        let start = Instant::now();
        self.stats.total_checks.fetch_add(1, Ordering::Relaxed);

        let reporter = Arc::clone(page);
        let stats = Arc::clone(&self.stats);
        let blocked = self.detector.is_malicious_gated(
            url,
            &page_token(page),
            |host| {
                if !page.claim_escalation(host) {
                    trace!("{} already escalated on page {}", host, page.scope.id());
                    return false;
                }
                self.stats.escalated.fetch_add(1, Ordering::Relaxed);
                true
            },
            move || {
                // One warning per page
                if reporter.reported.swap(true, Ordering::AcqRel) {
                    return;
                }
                stats.reported_async.fetch_add(1, Ordering::Relaxed);
                on_site_blocked();
            },
        );

        let elapsed = start.elapsed().as_nanos() as u64;
        self.stats
            .total_check_time_ns
            .fetch_add(elapsed, Ordering::Relaxed);

        if blocked {
            self.stats.blocked.fetch_add(1, Ordering::Relaxed);
            Some(elapsed / 1000)
        } else {
            None
        }
    }

    fn current_page(&self) -> Arc<PageState> {
        Arc::clone(&self.page.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn begin_navigation(&self) -> Arc<PageState> {
        let next = PageState::new(false);
        self.replace_page(Arc::clone(&next));
        next
    }

    fn replace_page(&self, next: Arc<PageState>) {
        let previous = {
            let mut page = self.page.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *page, next)
        };
        previous.scope.cancel();
        trace!("Page {} torn down", previous.scope.id());
    }

    /// Get statistics: (checks, blocked, escalated, reported asynchronously)
    pub fn stats(&self) -> (u64, u64, u64, u64) {
        (
            self.stats.total_checks.load(Ordering::Relaxed),
            self.stats.blocked.load(Ordering::Relaxed),
            self.stats.escalated.load(Ordering::Relaxed),
            self.stats.reported_async.load(Ordering::Relaxed),
        )
    }

    /// Get average check time in nanoseconds
    pub fn avg_check_time_ns(&self) -> u64 {
        let total = self.stats.total_checks.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        self.stats.total_check_time_ns.load(Ordering::Relaxed) / total
    }
}

fn page_token(page: &PageState) -> PageToken {
    page.scope.token()
}

fn is_checked_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

fn host_of(url: &Url) -> &str {
    url.host_str().unwrap_or_default()
}
