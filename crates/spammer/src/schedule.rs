//! Host submission schedule.
//!
//! A due-queue of simulated hosts ordered by when each host next reports.
//! Access is throttled so that, at steady state, `host_count` hosts each
//! report once per `interval`. Multiple consumers are expected: one slow
//! submission must not hold up the rest of the fleet.
//!
//! # Pacing
//!
//! At build time host `i` is due at `now + i * (interval / host_count) - interval`.
//! Every initial due time lies in the past, spread over the interval before
//! the schedule was built, so the first sweep over the fleet is served
//! without waiting. After each serve the host is next due one interval after
//! the instant it was actually served, not after its previous due time, so
//! a fleet that falls behind does not burst to catch up.
//!
//! # Exclusivity
//!
//! `next` pops its record under the queue lock and holds it privately while
//! it waits out the host's due time. No other consumer can observe that host
//! until the record is pushed back, so a host never has two commands
//! in flight.

use crate::corpus::{CorpusError, SampleCorpus};
use crate::mutation::mutate_in_place;
use dashmap::DashSet;
use fleetload_types::{set_certname, CommandKind, Document, HostId};
use parking_lot::Mutex;
use rand::Rng;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Indices of a host's fact, report and catalog samples in the corpus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleRefs {
    pub facts: usize,
    pub report: usize,
    pub catalog: usize,
}

/// One simulated host's slot in the due-queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct HostRecord {
    id: HostId,
    due_at: Instant,
    refs: SampleRefs,
}

impl Ord for HostRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due_at
            .cmp(&other.due_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for HostRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The commands one host submits when it comes due.
#[derive(Clone, Debug)]
pub struct HostCommands {
    /// Host that came due.
    pub host: HostId,
    /// Mutated facts command body.
    pub facts: Document,
    /// Report command body.
    pub report: Document,
    /// Catalog command body.
    pub catalog: Document,
    /// How long the consumer waited for the host to come due.
    pub waited: Duration,
}

impl HostCommands {
    /// Certname stamped on all three documents.
    pub fn certname(&self) -> String {
        self.host.certname()
    }
}

/// Time-ordered schedule of host submissions, shared by all workers.
pub struct HostSchedule {
    corpus: Arc<SampleCorpus>,
    interval: Duration,
    host_count: usize,
    orphans: bool,
    queue: Mutex<BinaryHeap<Reverse<HostRecord>>>,
    /// Signalled whenever a record goes back into the queue.
    returned: Notify,
    in_flight: DashSet<HostId>,
}

impl HostSchedule {
    /// Build a schedule for `host_count` hosts reporting every `interval`.
    ///
    /// Each host is assigned random fact, report and catalog samples for
    /// the whole run.
    pub fn build(
        corpus: Arc<SampleCorpus>,
        host_count: usize,
        interval: Duration,
        rng: &mut (impl Rng + ?Sized),
    ) -> Result<Self, ScheduleError> {
        if host_count == 0 {
            return Err(ScheduleError::NoHosts);
        }
        if interval.is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        corpus.ensure_populated()?;

        let now = Instant::now();
        let mut queue = BinaryHeap::with_capacity(host_count);

        for i in 0..host_count {
            let refs = SampleRefs {
                facts: corpus.random_index(CommandKind::Facts, rng)?,
                report: corpus.random_index(CommandKind::Reports, rng)?,
                catalog: corpus.random_index(CommandKind::Catalogs, rng)?,
            };
            let splay = interval.mul_f64(i as f64 / host_count as f64);
            // Early in the process the monotonic clock may not reach back a
            // full interval; such hosts are simply due now.
            let due_at = now.checked_sub(interval - splay).unwrap_or(now);
            queue.push(Reverse(HostRecord {
                id: HostId(i as u64),
                due_at,
                refs,
            }));
        }

        info!(
            hosts = host_count,
            interval = ?interval,
            "Built host schedule"
        );

        Ok(Self {
            corpus,
            interval,
            host_count,
            orphans: false,
            queue: Mutex::new(queue),
            returned: Notify::new(),
            in_flight: DashSet::with_capacity(host_count),
        })
    }

    /// Enable or disable orphan fact generation for facts commands.
    pub fn with_orphans(mut self, orphans: bool) -> Self {
        self.orphans = orphans;
        self
    }

    /// Number of simulated hosts.
    pub fn host_count(&self) -> usize {
        self.host_count
    }

    /// Reporting interval per host.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether facts get orphan facts merged in.
    pub fn orphans(&self) -> bool {
        self.orphans
    }

    /// Hosts currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Hosts currently held by a consumer.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Due time of the earliest queued host.
    pub fn next_due(&self) -> Option<Instant> {
        self.queue.lock().peek().map(|Reverse(record)| record.due_at)
    }

    /// Wait for the next host to come due and return its mutated commands.
    ///
    /// Never fails. If every host is held by another consumer, waits for one
    /// to be returned. Dropping the future puts the host back unchanged.
    pub async fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> HostCommands {
        let mut lease = Lease {
            schedule: self,
            record: self.take().await,
        };
        let record = lease.record;

        let waited = record.due_at.saturating_duration_since(Instant::now());
        if !waited.is_zero() {
            sleep_until(record.due_at).await;
        }
        let served_at = Instant::now();

        let commands = self.resolve(record.id, record.refs, waited, rng);
        lease.record.due_at = served_at + self.interval;

        debug!(
            host = record.id.0,
            waited_ms = waited.as_millis() as u64,
            "Host due"
        );

        drop(lease);
        commands
    }

    async fn take(&self) -> HostRecord {
        loop {
            let notified = self.returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = self.queue.lock().pop();
            if let Some(Reverse(record)) = popped {
                let fresh = self.in_flight.insert(record.id);
                debug_assert!(fresh, "{} taken while already in flight", record.id);
                return record;
            }

            notified.await;
        }
    }

    fn put_back(&self, record: HostRecord) {
        self.in_flight.remove(&record.id);
        self.queue.lock().push(Reverse(record));
        self.returned.notify_one();
    }

    fn resolve<R: Rng + ?Sized>(
        &self,
        host: HostId,
        refs: SampleRefs,
        waited: Duration,
        rng: &mut R,
    ) -> HostCommands {
        let certname = host.certname();
        let stamped = |kind: CommandKind, index: usize| {
            let mut doc = self.corpus.documents(kind)[index].clone();
            set_certname(&mut doc, &certname);
            doc
        };

        let mut facts = stamped(CommandKind::Facts, refs.facts);
        let mut report = stamped(CommandKind::Reports, refs.report);
        let mut catalog = stamped(CommandKind::Catalogs, refs.catalog);

        mutate_in_place(&mut facts, self.orphans, rng);
        mutate_in_place(&mut report, false, rng);
        mutate_in_place(&mut catalog, false, rng);

        HostCommands {
            host,
            facts,
            report,
            catalog,
            waited,
        }
    }
}

/// A record taken out of the queue. Goes back in when dropped.
struct Lease<'a> {
    schedule: &'a HostSchedule,
    record: HostRecord,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.schedule.put_back(self.record);
    }
}

/// Errors building a schedule.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Schedule needs at least one host")]
    NoHosts,

    #[error("Report interval must be non-zero")]
    ZeroInterval,

    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetload_test_helpers::{document, sample_catalog, sample_facts, sample_report};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;
    use std::collections::HashSet;

    fn corpus() -> Arc<SampleCorpus> {
        Arc::new(SampleCorpus::from_documents(
            (0..4).map(sample_facts).collect(),
            (0..3).map(sample_report).collect(),
            (0..2).map(sample_catalog).collect(),
        ))
    }

    fn build(hosts: usize, interval: Duration) -> HostSchedule {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        HostSchedule::build(corpus(), hosts, interval, &mut rng).unwrap()
    }

    #[test]
    fn test_build_rejects_zero_hosts() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = HostSchedule::build(corpus(), 0, Duration::from_secs(60), &mut rng)
            .err()
            .unwrap();
        assert!(matches!(err, ScheduleError::NoHosts));
    }

    #[test]
    fn test_build_rejects_zero_interval() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = HostSchedule::build(corpus(), 3, Duration::ZERO, &mut rng)
            .err()
            .unwrap();
        assert!(matches!(err, ScheduleError::ZeroInterval));
    }

    #[test]
    fn test_build_rejects_empty_kind() {
        let empty_facts = Arc::new(SampleCorpus::from_documents(
            Vec::new(),
            vec![sample_report(0)],
            vec![sample_catalog(0)],
        ));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = HostSchedule::build(empty_facts, 3, Duration::from_secs(60), &mut rng)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ScheduleError::Corpus(CorpusError::Empty {
                kind: CommandKind::Facts
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sweep_is_served_without_waiting() {
        let hosts = 4;
        let interval = Duration::from_secs(60);
        let schedule = build(hosts, interval);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let start = Instant::now();

        let mut seen = Vec::new();
        for _ in 0..hosts {
            let commands = schedule.next(&mut rng).await;
            assert!(commands.waited.is_zero());
            seen.push(commands.host);
        }

        assert_eq!(seen, (0..hosts as u64).map(HostId).collect::<Vec<_>>());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_sweeps_take_one_interval_per_host() {
        let hosts = 4;
        let interval = Duration::from_secs(60);
        let schedule = build(hosts, interval);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        // Serve the first sweep a quarter interval apart.
        for _ in 0..hosts {
            schedule.next(&mut rng).await;
            tokio::time::sleep(interval / hosts as u32).await;
        }
        let start = Instant::now();

        let mut seen = Vec::new();
        for _ in 0..hosts {
            seen.push(schedule.next(&mut rng).await.host);
        }

        assert_eq!(seen, (0..hosts as u64).map(HostId).collect::<Vec<_>>());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(45), "{elapsed:?}");
        assert!(elapsed <= interval, "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_hosts_first_calls_immediate_third_waits_interval() {
        let schedule = build(2, Duration::from_secs(60));
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let first = schedule.next(&mut rng).await;
        let first_served = Instant::now();
        assert_eq!(first.host, HostId(0));
        assert!(first.waited.is_zero());

        let second = schedule.next(&mut rng).await;
        assert_eq!(second.host, HostId(1));
        assert!(second.waited.is_zero(), "{:?}", second.waited);
        assert_eq!(first_served.elapsed(), Duration::ZERO);

        let third = schedule.next(&mut rng).await;
        assert_eq!(third.host, HostId(0));
        assert_eq!(third.waited, Duration::from_secs(60));
        let gap = first_served.elapsed();
        assert!(gap >= Duration::from_secs(60), "{gap:?}");
        assert!(gap < Duration::from_secs(61), "{gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_serve_resets_from_actual_submission() {
        let interval = Duration::from_secs(10);
        let schedule = build(1, interval);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        schedule.next(&mut rng).await;
        tokio::time::sleep(Duration::from_secs(25)).await;

        // Overdue by 15s: served at once, without bursting.
        let late = schedule.next(&mut rng).await;
        assert!(late.waited.is_zero());
        let late_served = Instant::now();

        let next = schedule.next(&mut rng).await;
        assert_eq!(next.waited, interval);
        assert!(late_served.elapsed() >= interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_documents_are_stamped_and_stable_per_host() {
        let corpus = Arc::new(SampleCorpus::from_documents(
            (0..5u64)
                .map(|i| document(json!({"marker": i, "values": {"n": 10}})))
                .collect(),
            vec![sample_report(0)],
            vec![sample_catalog(0)],
        ));
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let schedule = HostSchedule::build(corpus, 3, Duration::from_secs(3), &mut rng).unwrap();

        let mut markers = std::collections::HashMap::new();
        for _ in 0..9 {
            let commands = schedule.next(&mut rng).await;
            let certname = commands.certname();
            assert_eq!(fleetload_types::certname(&commands.facts), Some(certname.as_str()));
            assert_eq!(fleetload_types::certname(&commands.report), Some(certname.as_str()));
            assert_eq!(fleetload_types::certname(&commands.catalog), Some(certname.as_str()));

            let marker = commands.facts["marker"].clone();
            let previous = markers.entry(commands.host).or_insert_with(|| marker.clone());
            assert_eq!(*previous, marker, "host keeps its samples");
        }
        assert_eq!(markers.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphans_applied_to_facts_only() {
        let schedule = build(1, Duration::from_secs(1)).with_orphans(true);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let commands = schedule.next(&mut rng).await;
        let orphans = crate::mutation::generate_orphan_facts("host-0");
        let values = commands.facts["values"].as_object().unwrap();
        for name in orphans.keys() {
            assert!(values.contains_key(name));
        }
        assert!(commands.report.get("values").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_host_is_served_twice_concurrently() {
        let schedule = Arc::new(build(3, Duration::from_secs(6)));
        let airborne = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = Vec::new();
        for worker in 0..6u64 {
            let schedule = schedule.clone();
            let airborne = airborne.clone();
            handles.push(tokio::spawn(async move {
                let mut rng = ChaCha8Rng::seed_from_u64(worker);
                for _ in 0..5 {
                    let commands = schedule.next(&mut rng).await;
                    assert!(
                        airborne.lock().insert(commands.host),
                        "{} served twice at once",
                        commands.host
                    );
                    assert!(schedule.in_flight() <= schedule.host_count());
                    // Simulated submission.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    airborne.lock().remove(&commands.host);
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(schedule.queued(), 3);
        assert_eq!(schedule.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_next_returns_host() {
        let schedule = build(2, Duration::from_secs(60));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        schedule.next(&mut rng).await;
        schedule.next(&mut rng).await;

        // Host 0 is due again in 60s; give up after 1s.
        let result =
            tokio::time::timeout(Duration::from_secs(1), schedule.next(&mut rng)).await;
        assert!(result.is_err());
        assert_eq!(schedule.queued(), 2);
        assert_eq!(schedule.in_flight(), 0);

        let commands = schedule.next(&mut rng).await;
        assert_eq!(commands.host, HostId(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_due_tracks_earliest() {
        let interval = Duration::from_secs(60);
        let schedule = build(2, interval);
        let start = Instant::now();
        assert_eq!(schedule.next_due(), start.checked_sub(interval));

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        schedule.next(&mut rng).await;
        assert_eq!(
            schedule.next_due(),
            start.checked_sub(Duration::from_secs(30))
        );
        schedule.next(&mut rng).await;
        assert_eq!(schedule.next_due(), Some(start + interval));
    }
}
