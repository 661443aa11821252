//! Crawl state shared by fetch workers.
//!
//! One [`Frontier`] per crawl owns the FIFO queue plus the visited, in-flight
//! and discovered sets behind a single lock. Every read-modify-write happens in
//! one critical section and no lock is held across an `.await`.

use crate::controls::CrawlControls;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::Instant;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use url::Url;

/// Lifecycle of a crawl. The last three are terminal and all of them still
/// yield the accumulated link set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    /// Created, no page claimed yet.
    Initialized,
    /// At least one page has been claimed.
    Running,
    /// Frontier exhausted or page budget used up.
    Completed,
    /// Wall-clock budget exceeded before the next dequeue.
    TimeLimitReached,
    /// Frontier grew disproportionately to visited pages.
    TrapSuspected,
}

impl CrawlStatus {
    /// True for the three end states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::TimeLimitReached | Self::TrapSuspected
        )
    }
}

/// What a worker should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Fetch this URL, then report back with [`Frontier::complete`].
    Visit(Url),
    /// Nothing claimable right now, but in-flight pages may add more.
    Wait,
    /// The crawl is over.
    Finished(CrawlStatus),
}

/// Counts returned when a page's links are merged in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Links never seen before.
    pub discovered: usize,
    /// Links appended to the queue.
    pub enqueued: usize,
    /// Links already known.
    pub duplicates: usize,
}

/// Final state handed back once the crawl is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierSnapshot {
    /// Every URL ever seen, seeds included.
    pub discovered: BTreeSet<Url>,
    /// URLs fetched (successfully or not).
    pub visited: BTreeSet<Url>,
    /// URLs still queued when the crawl stopped.
    pub pending: usize,
    /// Terminal status.
    pub status: CrawlStatus,
}

struct FrontierState {
    queue: VecDeque<Url>,
    queued: HashSet<Url>,
    in_flight: HashSet<Url>,
    visited: HashSet<Url>,
    discovered: BTreeSet<Url>,
    status: CrawlStatus,
    started: Option<Instant>,
}

impl FrontierState {
    fn finish(&mut self, status: CrawlStatus) -> Claim {
        if !self.status.is_terminal() {
            self.status = status;
        }
        Claim::Finished(self.status)
    }

    fn is_known(&self, url: &Url) -> bool {
        self.visited.contains(url) || self.queued.contains(url) || self.in_flight.contains(url)
    }
}

/// Breadth-first frontier with page, time and growth bounds.
pub struct Frontier {
    state: Mutex<FrontierState>,
    changed: Notify,
    controls: CrawlControls,
}

impl Frontier {
    /// Creates a frontier whose queue and discovered set start as the deduplicated seeds.
    pub fn new(seeds: impl IntoIterator<Item = Url>, controls: &CrawlControls) -> Self {
        let mut queue = VecDeque::new();
        let mut queued = HashSet::new();
        let mut discovered = BTreeSet::new();
        for seed in seeds {
            discovered.insert(seed.clone());
            if queued.insert(seed.clone()) {
                queue.push_back(seed);
            }
        }

        Self {
            state: Mutex::new(FrontierState {
                queue,
                queued,
                in_flight: HashSet::new(),
                visited: HashSet::new(),
                discovered,
                status: CrawlStatus::Initialized,
                started: None,
            }),
            changed: Notify::new(),
            controls: controls.clone(),
        }
    }

    /// Future resolved the next time the frontier changes. Create and `enable`
    /// it before calling [`Frontier::claim`] so a wakeup cannot be missed.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Claims the next URL in FIFO order, or reports why none is available.
    pub fn claim(&self) -> Claim {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return Claim::Finished(state.status);
        }
        let started = *state.started.get_or_insert_with(Instant::now);
        state.status = CrawlStatus::Running;

        let claim = loop {
            if state.queue.is_empty() {
                break if state.in_flight.is_empty() {
                    state.finish(CrawlStatus::Completed)
                } else {
                    Claim::Wait
                };
            }
            if state.visited.len() + state.in_flight.len() >= self.controls.max_pages() {
                break if state.in_flight.is_empty() {
                    state.finish(CrawlStatus::Completed)
                } else {
                    Claim::Wait
                };
            }
            if started.elapsed() > self.controls.max_time() {
                break state.finish(CrawlStatus::TimeLimitReached);
            }

            let Some(next) = state.queue.pop_front() else {
                continue;
            };
            state.queued.remove(&next);
            if state.visited.contains(&next) {
                continue;
            }
            state.in_flight.insert(next.clone());
            break Claim::Visit(next);
        };

        if matches!(claim, Claim::Finished(_)) {
            drop(state);
            self.changed.notify_waiters();
        }
        claim
    }

    /// Marks `url` visited and merges the links found on it. Callers must only
    /// pass links that already passed the site and length checks.
    pub fn complete(&self, url: &Url, links: impl IntoIterator<Item = Url>) -> MergeStats {
        let mut stats = MergeStats::default();
        {
            let mut state = self.state.lock();
            state.in_flight.remove(url);
            state.visited.insert(url.clone());

            for link in links {
                if state.discovered.insert(link.clone()) {
                    stats.discovered += 1;
                } else {
                    stats.duplicates += 1;
                }
                if !state.is_known(&link) {
                    state.queued.insert(link.clone());
                    state.queue.push_back(link);
                    stats.enqueued += 1;
                }
            }

            let visited = state.visited.len();
            if !state.status.is_terminal()
                && visited % self.controls.trap_check_interval() == 0
                && state.queue.len() > visited.saturating_mul(self.controls.growth_factor())
            {
                state.status = CrawlStatus::TrapSuspected;
            }
        }
        self.changed.notify_waiters();
        stats
    }

    /// Current lifecycle state.
    pub fn status(&self) -> CrawlStatus {
        self.state.lock().status
    }

    /// Number of queued URLs.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Number of visited URLs.
    pub fn visited_len(&self) -> usize {
        self.state.lock().visited.len()
    }

    /// Copies out the final sets.
    pub fn snapshot(&self) -> FrontierSnapshot {
        let state = self.state.lock();
        FrontierSnapshot {
            discovered: state.discovered.clone(),
            visited: state.visited.iter().cloned().collect(),
            pending: state.queue.len(),
            status: state.status,
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let state = self.state.lock();
        assert!(state.visited.iter().all(|u| state.discovered.contains(u)));
        assert!(state.queue.iter().all(|u| !state.visited.contains(u)));
        assert_eq!(state.queue.len(), state.queued.len());
        assert!(state.visited.len() <= self.controls.max_pages());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn url(path: &str) -> Url {
        Url::parse(&format!("http://a.test{path}")).expect("url")
    }

    fn controls(max_pages: usize) -> CrawlControls {
        CrawlControls::new(max_pages, Duration::from_secs(60))
    }

    #[test]
    fn claims_in_fifo_order_without_duplicates() {
        let frontier = Frontier::new([url("/"), url("/"), url("/b")], &controls(10));
        assert_eq!(frontier.pending(), 2);

        assert_eq!(frontier.claim(), Claim::Visit(url("/")));
        frontier.complete(&url("/"), [url("/c"), url("/b"), url("/"), url("/c")]);
        frontier.assert_invariants();

        assert_eq!(frontier.claim(), Claim::Visit(url("/b")));
        frontier.complete(&url("/b"), []);
        assert_eq!(frontier.claim(), Claim::Visit(url("/c")));
        frontier.complete(&url("/c"), []);
        assert_eq!(frontier.claim(), Claim::Finished(CrawlStatus::Completed));

        let snapshot = frontier.snapshot();
        assert_eq!(snapshot.visited.len(), 3);
        assert_eq!(snapshot.discovered.len(), 3);
    }

    #[test]
    fn zero_page_budget_returns_seeds_only() {
        let frontier = Frontier::new([url("/x")], &controls(0));
        assert_eq!(frontier.claim(), Claim::Finished(CrawlStatus::Completed));

        let snapshot = frontier.snapshot();
        assert!(snapshot.visited.is_empty());
        assert_eq!(snapshot.discovered, BTreeSet::from([url("/x")]));
    }

    #[test]
    fn in_flight_pages_count_against_budget() {
        let frontier = Frontier::new([url("/a"), url("/b")], &controls(1));
        assert_eq!(frontier.claim(), Claim::Visit(url("/a")));
        assert_eq!(frontier.claim(), Claim::Wait);
        frontier.complete(&url("/a"), []);
        assert_eq!(frontier.claim(), Claim::Finished(CrawlStatus::Completed));
        assert_eq!(frontier.snapshot().pending, 1);
    }

    #[test]
    fn in_flight_url_is_not_requeued() {
        let frontier = Frontier::new([url("/a"), url("/b")], &controls(10));
        assert_eq!(frontier.claim(), Claim::Visit(url("/a")));
        assert_eq!(frontier.claim(), Claim::Visit(url("/b")));
        let stats = frontier.complete(&url("/a"), [url("/b"), url("/a")]);
        assert_eq!(stats.enqueued, 0);
        assert_eq!(stats.duplicates, 2);
    }

    #[test]
    fn expired_budget_stops_before_next_dequeue() {
        let frontier = Frontier::new(
            [url("/a"), url("/b")],
            &CrawlControls::new(10, Duration::from_millis(50)),
        );
        assert_eq!(frontier.claim(), Claim::Visit(url("/a")));
        std::thread::sleep(Duration::from_millis(80));
        frontier.complete(&url("/a"), []);
        assert_eq!(
            frontier.claim(),
            Claim::Finished(CrawlStatus::TimeLimitReached)
        );
        assert_eq!(frontier.visited_len(), 1);
    }

    #[test]
    fn runaway_growth_is_flagged() {
        let controls = controls(100).with_trap_heuristic(2, 1);
        let frontier = Frontier::new([url("/")], &controls);
        assert_eq!(frontier.claim(), Claim::Visit(url("/")));
        frontier.complete(&url("/"), (0..3).map(|i| url(&format!("/p{i}"))));
        assert_eq!(frontier.status(), CrawlStatus::TrapSuspected);
        assert_eq!(
            frontier.claim(),
            Claim::Finished(CrawlStatus::TrapSuspected)
        );
        assert_eq!(frontier.snapshot().discovered.len(), 4);
    }

    #[test]
    fn growth_within_factor_continues() {
        let controls = controls(100).with_trap_heuristic(3, 1);
        let frontier = Frontier::new([url("/")], &controls);
        assert_eq!(frontier.claim(), Claim::Visit(url("/")));
        frontier.complete(&url("/"), (0..3).map(|i| url(&format!("/p{i}"))));
        assert_eq!(frontier.status(), CrawlStatus::Running);
    }
}
