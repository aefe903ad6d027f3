//! Malicious Site Detector
//!
//! Decides whether a URL is malicious in two tiers:
//!
//! 1. Synchronous (gates rendering, never awaits):
//!    hash the hostname, check the 8-char prefix against the in-memory
//!    index, then try the full-hash filter against the URL.
//! 2. Escalation (background, may fire after first paint):
//!    if the prefix is a candidate but no filter confirmed it, fetch the
//!    prefix's match records on the blocking pool and confirm only when
//!    regex, hostname and hash all agree.
//!
//! The caller gets its answer from tier 1 immediately. A tier 2
//! confirmation invokes the caller's continuation unless the page that
//! asked has been torn down in the meantime.

use crate::config::ProtectionConfig;
use crate::hash::{extract_hostname, HashPrefix, HostnameHash};
use crate::page::PageToken;
use crate::pattern::PatternMatcher;
use crate::repository::{MaliciousSiteRepository, RepositoryError};
use crate::settings::SettingsState;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Continuation invoked when an escalation confirms a malicious site
pub type SiteBlockedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Result of a synchronous check
#[derive(Debug)]
pub enum Verdict {
    /// Not malicious (or not a candidate)
    Safe,
    /// Confirmed on the fast path, block the load
    Malicious,
    /// Candidate not confirmed yet, the load proceeds while this runs
    Pending(Escalation),
}

impl Verdict {
    /// Whether the load must be blocked now
    pub fn is_malicious(&self) -> bool {
        matches!(self, Verdict::Malicious)
    }
}

/// How an escalation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// A match record confirmed the URL
    Confirmed,
    /// No match record confirmed the URL
    NotConfirmed,
    /// The page was torn down before the lookup finished
    Cancelled,
    /// The lookup failed; nothing was reported
    Failed,
}

/// Handle to a background confirmation
#[derive(Debug)]
pub struct Escalation {
    handle: JoinHandle<EscalationOutcome>,
}

impl Escalation {
    /// Wait for the escalation to finish
    pub async fn outcome(self) -> EscalationOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => EscalationOutcome::Cancelled,
            Err(e) => {
                warn!("Escalation task panicked: {}", e);
                EscalationOutcome::Failed
            }
        }
    }

    /// Stop the escalation; its continuation will not run
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Everything the escalation needs, owned so it can move to another task
struct Candidate {
    url: String,
    hostname: String,
    hash: HostnameHash,
    prefix: HashPrefix,
}

/// Two-tier malicious URL detector
pub struct MaliciousSiteDetector {
    repository: Arc<dyn MaliciousSiteRepository>,
    settings: Arc<SettingsState>,
    patterns: Arc<PatternMatcher>,
    config: ProtectionConfig,
    /// Application-scoped runtime escalations are spawned on
    runtime: Handle,
}

impl MaliciousSiteDetector {
    pub fn new(
        repository: Arc<dyn MaliciousSiteRepository>,
        settings: Arc<SettingsState>,
        config: ProtectionConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            repository,
            settings,
            patterns: Arc::new(PatternMatcher::new(config.max_regex_size)),
            config,
            runtime,
        }
    }

    pub fn settings(&self) -> &Arc<SettingsState> {
        &self.settings
    }

    /// Check a URL, invoking `on_site_blocked` if a background
    /// confirmation later finds it malicious.
    ///
    /// Returns whether the load must be blocked now.
    pub fn is_malicious<F>(&self, url: &Url, page: &PageToken, on_site_blocked: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.evaluate(url, page, |_| true, Some(Box::new(on_site_blocked)))
            .is_malicious()
    }

    /// Like [`is_malicious`](Self::is_malicious), but a candidate is only
    /// escalated when `admit_escalation(hostname)` returns `true`; otherwise
    /// it is treated as safe.
    pub fn is_malicious_gated<A, F>(
        &self,
        url: &Url,
        page: &PageToken,
        admit_escalation: A,
        on_site_blocked: F,
    ) -> bool
    where
        A: FnOnce(&str) -> bool,
        F: FnOnce() + Send + 'static,
    {
        self.evaluate(url, page, admit_escalation, Some(Box::new(on_site_blocked)))
            .is_malicious()
    }

    /// Check a URL without a continuation.
    ///
    /// A [`Verdict::Pending`] escalation can be awaited for its outcome.
    pub fn check(&self, url: &Url, page: &PageToken) -> Verdict {
        self.evaluate(url, page, |_| true, None)
    }

    fn evaluate<A>(
        &self,
        url: &Url,
        page: &PageToken,
        admit_escalation: A,
        on_site_blocked: Option<SiteBlockedCallback>,
    ) -> Verdict
    where
        A: FnOnce(&str) -> bool,
    {
        if !self.settings.is_feature_enabled() {
            return Verdict::Safe;
        }

        let Some(hostname) = extract_hostname(url) else {
            trace!("No hostname in {}, not checking", url);
            return Verdict::Safe;
        };

        let hash = HostnameHash::of(hostname);
        let prefix = hash.prefix();

        match self.repository.contains_hash_prefix(&prefix) {
            Ok(true) => {}
            Ok(false) => {
                trace!("No hash prefix match for {} ({})", hostname, prefix);
                return Verdict::Safe;
            }
            Err(e) => return self.lookup_failed("hash prefix", hostname, e),
        }

        match self.repository.get_filter(&hash) {
            Ok(Some(filter)) if self.patterns.full_match(&filter.regex, url.as_str()) => {
                info!("Blocking {}: filter match", hostname);
                return Verdict::Malicious;
            }
            Ok(_) => {}
            Err(e) => {
                if self.config.failure_policy.verdict() {
                    return self.lookup_failed("filter", hostname, e);
                }
                // Fail open: the prefix already made this a candidate
                warn!("Filter lookup failed for {}: {}", hostname, e);
            }
        }

        if !self.config.escalation_enabled {
            debug!("Candidate {} not confirmed, escalation disabled", hostname);
            return Verdict::Safe;
        }

        if !admit_escalation(hostname) {
            trace!("Candidate {} already escalated for page {}", hostname, page.page_id());
            return Verdict::Safe;
        }

        debug!("Candidate {} not confirmed synchronously, escalating", hostname);
        let candidate = Candidate {
            url: url.as_str().to_string(),
            hostname: hostname.to_string(),
            hash,
            prefix,
        };
        Verdict::Pending(self.escalate(candidate, page.clone(), on_site_blocked))
    }

    fn lookup_failed(&self, what: &str, hostname: &str, error: RepositoryError) -> Verdict {
        let policy = self.config.failure_policy;
        warn!(
            "{} lookup failed for {} ({:?}): {}",
            what, hostname, policy, error
        );
        if policy.verdict() {
            Verdict::Malicious
        } else {
            Verdict::Safe
        }
    }

    fn escalate(
        &self,
        candidate: Candidate,
        mut page: PageToken,
        on_site_blocked: Option<SiteBlockedCallback>,
    ) -> Escalation {
        let repository = Arc::clone(&self.repository);
        let patterns = Arc::clone(&self.patterns);
        let runtime = self.runtime.clone();

        let handle = self.runtime.spawn(async move {
            let hostname = candidate.hostname.clone();
            let page_id = page.page_id();
            let lookup =
                runtime.spawn_blocking(move || confirm(repository.as_ref(), &patterns, &candidate));

            let confirmed = tokio::select! {
                _ = page.cancelled() => {
                    debug!("Page {} torn down, dropping escalation for {}", page_id, hostname);
                    return EscalationOutcome::Cancelled;
                }
                result = lookup => match result {
                    Ok(Ok(confirmed)) => confirmed,
                    Ok(Err(e)) => {
                        warn!("Match lookup failed for {}: {}", hostname, e);
                        return EscalationOutcome::Failed;
                    }
                    Err(e) => {
                        warn!("Match lookup task failed for {}: {}", hostname, e);
                        return EscalationOutcome::Failed;
                    }
                },
            };

            if !confirmed {
                debug!("Escalation for {} not confirmed", hostname);
                return EscalationOutcome::NotConfirmed;
            }

            if page.is_cancelled() {
                debug!("Page {} torn down, not reporting {}", page_id, hostname);
                return EscalationOutcome::Cancelled;
            }

            info!("Blocking {}: confirmed by match lookup", hostname);
            if let Some(on_site_blocked) = on_site_blocked {
                on_site_blocked();
            }
            EscalationOutcome::Confirmed
        });

        Escalation { handle }
    }
}

/// A match confirms only when regex, hostname and hash all agree
fn confirm(
    repository: &dyn MaliciousSiteRepository,
    patterns: &PatternMatcher,
    candidate: &Candidate,
) -> Result<bool, RepositoryError> {
    let matches = repository.matches(&candidate.prefix)?;
    let confirmed = matches.iter().any(|m| {
        m.hostname == candidate.hostname
            && m.hash == candidate.hash
            && patterns.full_match(&m.regex, &candidate.url)
    });
    trace!(
        "{} match records for {}, confirmed: {}",
        matches.len(),
        candidate.prefix,
        confirmed
    );
    Ok(confirmed)
}
