//! Safe reboot time calculation.
//!
//! An unhealthy node needs a bounded amount of time to notice that it is
//! unhealthy, ask its peers, and get rebooted by its watchdog. Healthy
//! nodes must wait at least that long before they treat the node as
//! rebooted and reschedule its workloads.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use warden_common::constants::{self, conditions};
use warden_common::{
    AuditEvent, ConditionStatus, ConfigSpec, Result, RoleFilter, SafetyConfigResource,
    WardenError,
};

use crate::cluster::{ConfigStore, EventRecorder, NodeRoster};

/// Timing inputs of the floor computation. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyConfiguration {
    pub api_check_interval: Duration,
    pub api_server_timeout: Duration,
    pub peer_dial_timeout: Duration,
    pub peer_request_timeout: Duration,
    pub max_api_error_threshold: u32,
    pub watchdog_timeout: Duration,
}

impl SafetyConfiguration {
    /// Build from the resource spec plus the timeout the watchdog reported
    pub fn from_spec(spec: &ConfigSpec, watchdog_timeout: Duration) -> Self {
        Self {
            api_check_interval: Duration::from_millis(spec.api_check_interval_ms),
            api_server_timeout: Duration::from_millis(spec.api_server_timeout_ms),
            peer_dial_timeout: Duration::from_millis(spec.peer_dial_timeout_ms),
            peer_request_timeout: Duration::from_millis(spec.peer_request_timeout_ms),
            max_api_error_threshold: spec.max_api_error_threshold,
            watchdog_timeout,
        }
    }
}

/// Number of sequential peer query batches needed for `workers` nodes.
///
/// The first batch holds three nodes and up to ten more follow, so beyond
/// 33 workers the batches just grow larger and the count stays at 11.
pub fn batches_for_workers(workers: usize) -> u32 {
    let min_batch = constants::MIN_NODES_IN_BATCH as usize;
    if workers > constants::MAX_BATCHES as usize * min_batch {
        return constants::MAX_BATCHES;
    }
    // bounded by MAX_BATCHES here
    workers.div_ceil(min_batch) as u32
}

/// Closed-form safety floor:
/// `(check + api timeout) * threshold + 30s + batches * (dial + request) + watchdog + 15s`
pub fn min_time_to_assume_rebooted(safety: &SafetyConfiguration, batches: u32) -> Duration {
    // time to conclude the API is unreachable
    let api = (safety.api_check_interval.saturating_add(safety.api_server_timeout))
        .saturating_mul(safety.max_api_error_threshold);
    // time to ask the peers
    let peers = (safety.peer_dial_timeout.saturating_add(safety.peer_request_timeout))
        .saturating_mul(batches);

    api.saturating_add(constants::MAX_TIME_FOR_NO_PEERS_RESPONSE)
        .saturating_add(peers)
        .saturating_add(safety.watchdog_timeout)
        .saturating_add(constants::SAFE_TIME_BUFFER)
}

/// Whole seconds of `floor`, rounded up so the stored value never
/// undercuts the computed one.
pub fn floor_to_secs(floor: Duration) -> u64 {
    let secs = floor.as_secs();
    if floor.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Whether a freshly computed floor should replace the stored one.
///
/// Larger values always win. Smaller or different values only win once
/// the stored value is older than the recent-update window, so agents
/// running side by side don't keep overwriting each other.
pub fn should_overwrite_floor(
    new_secs: u64,
    stored_secs: u64,
    last_update: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if new_secs > stored_secs {
        return true;
    }
    let updated_recently = last_update.is_some_and(|at| {
        chrono::Duration::from_std(constants::RECENT_UPDATE_WINDOW)
            .map(|window| at + window > now)
            .unwrap_or(false)
    });
    !updated_recently && new_secs != stored_secs
}

/// Highest batch count seen by this process. Never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchRatchet {
    highest: u32,
}

impl BatchRatchet {
    pub fn observe(&mut self, batches: u32) -> u32 {
        self.highest = self.highest.max(batches);
        self.highest
    }

    pub fn highest(&self) -> u32 {
        self.highest
    }
}

#[derive(Debug, Default)]
struct CalculatorState {
    ratchet: BatchRatchet,
    floor: Option<Duration>,
    /// Configured safe time from the shared resource, once read
    shared_safe_time: Option<Duration>,
}

struct AgentRole {
    safety: SafetyConfiguration,
    /// Used until the shared resource has been read
    configured_safe_time: Duration,
    roster: Arc<dyn NodeRoster>,
    events: Arc<dyn EventRecorder>,
}

enum Role {
    Agent(AgentRole),
    Observer,
}

/// Computes, persists and serves the time to assume a node rebooted.
///
/// The agent role runs on the protected node, computes the floor from its
/// own watchdog and timing settings, and writes it to the shared
/// configuration. The observer role only reads what agents wrote.
pub struct SafeTimeCalculator {
    role: Role,
    config_name: String,
    store: Arc<dyn ConfigStore>,
    state: Mutex<CalculatorState>,
}

impl SafeTimeCalculator {
    pub fn agent(
        config_name: impl Into<String>,
        safety: SafetyConfiguration,
        configured_safe_time: Duration,
        store: Arc<dyn ConfigStore>,
        roster: Arc<dyn NodeRoster>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            role: Role::Agent(AgentRole {
                safety,
                configured_safe_time,
                roster,
                events,
            }),
            config_name: config_name.into(),
            store,
            state: Mutex::new(CalculatorState::default()),
        }
    }

    pub fn observer(config_name: impl Into<String>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            role: Role::Observer,
            config_name: config_name.into(),
            store,
            state: Mutex::new(CalculatorState::default()),
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self.role, Role::Agent(_))
    }

    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    /// Locally computed floor, once `start` has run
    pub fn floor(&self) -> Option<Duration> {
        self.state.lock().floor
    }

    pub fn highest_batch_count(&self) -> u32 {
        self.state.lock().ratchet.highest()
    }

    /// Compute the floor and persist it. No-op for observers.
    ///
    /// Safe to call again after a failure; the batch ratchet carries over.
    pub async fn start(&self) -> Result<()> {
        let Role::Agent(agent) = &self.role else {
            return Ok(());
        };

        let batches = self.calc_num_of_batches(agent).await;
        let floor = min_time_to_assume_rebooted(&agent.safety, batches);
        info!(
            floor_ms = floor.as_millis() as u64,
            batches,
            watchdog_timeout_secs = agent.safety.watchdog_timeout.as_secs(),
            "Calculated minimum time to assume node rebooted"
        );
        self.state.lock().floor = Some(floor);

        self.manage_safe_reboot_time_in_configuration(floor).await
    }

    /// Effective wait before a node may be assumed rebooted.
    ///
    /// Agents answer from the locally computed floor and fail with
    /// `NotReady` until `start` has computed it. The configured safe time
    /// is the shared resource's value, the same one the override
    /// condition is judged against. Observers read the floor agents
    /// persisted and fail if the resource or the floor is missing.
    pub async fn get_time_to_assume_node_rebooted(&self) -> Result<Duration> {
        match &self.role {
            Role::Agent(agent) => {
                let state = self.state.lock();
                let floor = state.floor.ok_or_else(|| {
                    WardenError::NotReady("safety floor not computed yet".to_string())
                })?;
                let configured = state
                    .shared_safe_time
                    .unwrap_or(agent.configured_safe_time);
                Ok(configured.max(floor))
            }
            Role::Observer => {
                let resource = self.fetch_config().await?;
                let floor_secs = resource.status.min_safe_time_to_assume_node_rebooted_seconds;
                if floor_secs == 0 {
                    error!(
                        config = %self.config_name,
                        "Minimum safe time to assume node rebooted was never written"
                    );
                    return Err(WardenError::Uninitialized(self.config_name.clone()));
                }
                let configured =
                    Duration::from_secs(resource.spec.safe_time_to_assume_node_rebooted_seconds);
                Ok(configured.max(Duration::from_secs(floor_secs)))
            }
        }
    }

    /// Write the floor and the override condition to the shared resource.
    ///
    /// Only writes when something changed, and always against the version
    /// that was read, so a concurrent writer surfaces as `Conflict`.
    pub async fn manage_safe_reboot_time_in_configuration(&self, floor: Duration) -> Result<()> {
        let Role::Agent(agent) = &self.role else {
            return Ok(());
        };

        let floor_secs = floor_to_secs(floor);
        let resource = self.fetch_config().await?;
        let now = Utc::now();
        let mut status = resource.status.clone();

        let stored = status.min_safe_time_to_assume_node_rebooted_seconds;
        if should_overwrite_floor(floor_secs, stored, status.last_update_time, now) {
            status.min_safe_time_to_assume_node_rebooted_seconds = floor_secs;
        }

        let configured = resource.spec.safe_time_to_assume_node_rebooted_seconds;
        self.state.lock().shared_safe_time = Some(Duration::from_secs(configured));
        if configured > 0 && floor_secs > configured {
            status.set_condition(
                conditions::SAFE_TIME_OVERRIDDEN,
                ConditionStatus::True,
                conditions::REASON_SAFE_TIME_INVALID,
                "configured safe time to assume node rebooted is lower than the calculated minimum, the minimum is used instead",
                now,
            );
            warn!(
                configured_secs = configured,
                floor_secs,
                "Configured safe time to assume node rebooted is overridden by the calculated value"
            );
            agent
                .events
                .record(AuditEvent::warning(
                    &self.config_name,
                    conditions::EVENT_SAFE_TIME_INVALID,
                    "SafeTimeToAssumeNodeRebootedSeconds is overridden by calculated value",
                ))
                .await;
        } else {
            status.set_condition(
                conditions::SAFE_TIME_OVERRIDDEN,
                ConditionStatus::False,
                conditions::REASON_SAFE_TIME_VALID,
                "configured safe time to assume node rebooted is not lower than the calculated minimum",
                now,
            );
        }

        if status == resource.status {
            debug!(config = %self.config_name, "Safety configuration status unchanged");
            return Ok(());
        }

        status.last_update_time = Some(now);
        let updated = self
            .store
            .patch_status(&self.config_name, resource.version, status)
            .await?;
        info!(
            config = %self.config_name,
            version = updated.version,
            stored_floor_secs = updated.status.min_safe_time_to_assume_node_rebooted_seconds,
            "Updated safety configuration status"
        );
        Ok(())
    }

    /// Run `start` until it succeeds, retrying retryable errors after
    /// `backoff`. Returns false on a permanent error or shutdown.
    pub async fn start_with_retry(
        &self,
        backoff: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> bool {
        loop {
            match self.start().await {
                Ok(()) => {
                    info!(agent = self.is_agent(), "Safe time calculator started");
                    return true;
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "Safe time calculation failed, retrying");
                }
                Err(e) => {
                    error!(error = %e, "Safe time calculation failed permanently");
                    return false;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.recv() => return false,
            }
        }
    }

    async fn calc_num_of_batches(&self, agent: &AgentRole) -> u32 {
        match agent.roster.list(RoleFilter::Workers).await {
            Ok(workers) => {
                let batches = batches_for_workers(workers.len());
                let highest = self.state.lock().ratchet.observe(batches);
                debug!(workers = workers.len(), batches, highest, "Calculated peer batches");
                highest
            }
            Err(e) => {
                warn!(error = %e, "Couldn't fetch worker nodes, assuming the maximum batch count");
                constants::MAX_BATCHES
            }
        }
    }

    async fn fetch_config(&self) -> Result<SafetyConfigResource> {
        match self.store.get(&self.config_name).await? {
            Some(resource) => Ok(resource),
            None => {
                error!(config = %self.config_name, "Safety configuration not found");
                Err(WardenError::ConfigNotFound(self.config_name.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MemoryConfigStore, MemoryEventRecorder, StaticRoster};
    use proptest::prelude::*;
    use warden_common::NodeRecord;
    use warden_common::constants::labels;

    const NAME: &str = "warden-config";

    fn safety(watchdog_secs: u64) -> SafetyConfiguration {
        SafetyConfiguration::from_spec(&ConfigSpec::default(), Duration::from_secs(watchdog_secs))
    }

    fn workers(n: usize) -> Vec<NodeRecord> {
        (0..n)
            .map(|i| NodeRecord::new(format!("worker-{i}")).with_label(labels::WORKER_ROLE, ""))
            .collect()
    }

    struct Fixture {
        store: Arc<MemoryConfigStore>,
        roster: Arc<StaticRoster>,
        events: Arc<MemoryEventRecorder>,
    }

    impl Fixture {
        async fn new(worker_count: usize) -> Self {
            let store = Arc::new(MemoryConfigStore::new());
            store
                .create(SafetyConfigResource::default_named(NAME))
                .await
                .unwrap();
            Self {
                store,
                roster: Arc::new(StaticRoster::new(workers(worker_count))),
                events: Arc::new(MemoryEventRecorder::new()),
            }
        }

        fn agent(&self, watchdog_secs: u64, configured_secs: u64) -> SafeTimeCalculator {
            SafeTimeCalculator::agent(
                NAME,
                safety(watchdog_secs),
                Duration::from_secs(configured_secs),
                self.store.clone(),
                self.roster.clone(),
                self.events.clone(),
            )
        }

        fn set_spec_safe_time(&self, secs: u64) {
            let mut res = self.store.snapshot(NAME).unwrap();
            res.spec.safe_time_to_assume_node_rebooted_seconds = secs;
            self.store.replace(res);
        }

        fn age_last_update(&self, by: chrono::Duration) {
            let mut res = self.store.snapshot(NAME).unwrap();
            res.status.last_update_time = res.status.last_update_time.map(|t| t - by);
            self.store.replace(res);
        }

        fn stored_floor(&self) -> u64 {
            self.store
                .snapshot(NAME)
                .unwrap()
                .status
                .min_safe_time_to_assume_node_rebooted_seconds
        }
    }

    #[test]
    fn test_batches_boundaries() {
        assert_eq!(batches_for_workers(0), 0);
        assert_eq!(batches_for_workers(1), 1);
        assert_eq!(batches_for_workers(3), 1);
        assert_eq!(batches_for_workers(4), 2);
        assert_eq!(batches_for_workers(33), 11);
        assert_eq!(batches_for_workers(34), 11);
        assert_eq!(batches_for_workers(500), 11);
    }

    #[test]
    fn test_floor_closed_form() {
        // (15 + 5) * 3 + 30 + 2 * (5 + 5) + 10 + 15
        let floor = min_time_to_assume_rebooted(&safety(10), 2);
        assert_eq!(floor, Duration::from_secs(135));

        let floor = min_time_to_assume_rebooted(&safety(0), 0);
        assert_eq!(floor, Duration::from_secs(105));
    }

    #[test]
    fn test_floor_to_secs_rounds_up() {
        assert_eq!(floor_to_secs(Duration::from_secs(117)), 117);
        assert_eq!(floor_to_secs(Duration::from_millis(117_700)), 118);
        assert_eq!(floor_to_secs(Duration::from_nanos(1)), 1);
        assert_eq!(floor_to_secs(Duration::ZERO), 0);
        assert_eq!(floor_to_secs(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_should_overwrite_floor() {
        let now = Utc::now();
        let recent = Some(now - chrono::Duration::seconds(5));
        let stale = Some(now - chrono::Duration::seconds(20));

        assert!(should_overwrite_floor(200, 100, recent, now));
        assert!(!should_overwrite_floor(100, 200, recent, now));
        assert!(should_overwrite_floor(100, 200, stale, now));
        assert!(should_overwrite_floor(100, 200, None, now));
        assert!(!should_overwrite_floor(200, 200, stale, now));
        assert!(!should_overwrite_floor(200, 200, None, now));
    }

    #[test]
    fn test_ratchet_keeps_highest() {
        let mut ratchet = BatchRatchet::default();
        assert_eq!(ratchet.observe(batches_for_workers(40)), 11);
        assert_eq!(ratchet.observe(batches_for_workers(5)), 11);
        assert_eq!(ratchet.highest(), 11);
    }

    proptest! {
        #[test]
        fn prop_floor_is_monotonic(
            check in 0u64..60_000,
            api in 0u64..60_000,
            dial in 0u64..60_000,
            request in 0u64..60_000,
            threshold in 0u32..20,
            watchdog in 0u64..600,
            batches in 0u32..=11,
            bump in 1u64..10_000,
        ) {
            let base = SafetyConfiguration {
                api_check_interval: Duration::from_millis(check),
                api_server_timeout: Duration::from_millis(api),
                peer_dial_timeout: Duration::from_millis(dial),
                peer_request_timeout: Duration::from_millis(request),
                max_api_error_threshold: threshold,
                watchdog_timeout: Duration::from_secs(watchdog),
            };
            let floor = min_time_to_assume_rebooted(&base, batches);
            let extra = Duration::from_millis(bump);

            let variants = [
                SafetyConfiguration { api_check_interval: base.api_check_interval + extra, ..base },
                SafetyConfiguration { api_server_timeout: base.api_server_timeout + extra, ..base },
                SafetyConfiguration { peer_dial_timeout: base.peer_dial_timeout + extra, ..base },
                SafetyConfiguration { peer_request_timeout: base.peer_request_timeout + extra, ..base },
                SafetyConfiguration { max_api_error_threshold: base.max_api_error_threshold + 1, ..base },
                SafetyConfiguration { watchdog_timeout: base.watchdog_timeout + extra, ..base },
            ];
            for variant in &variants {
                prop_assert!(min_time_to_assume_rebooted(variant, batches) >= floor);
            }
            prop_assert!(min_time_to_assume_rebooted(&base, batches + 1) >= floor);
        }

        #[test]
        fn prop_ratchet_never_decreases(counts in proptest::collection::vec(0usize..100, 1..30)) {
            let mut ratchet = BatchRatchet::default();
            let mut previous = 0;
            for count in counts {
                let current = ratchet.observe(batches_for_workers(count));
                prop_assert!(current >= previous);
                prop_assert!(current <= constants::MAX_BATCHES);
                previous = current;
            }
        }

        #[test]
        fn prop_batches_match_ceiling(workers in 0usize..=33) {
            prop_assert_eq!(batches_for_workers(workers) as usize, workers.div_ceil(3));
        }
    }

    #[tokio::test]
    async fn test_agent_not_ready_before_start() {
        let fx = Fixture::new(5).await;
        let calc = fx.agent(10, 60);
        assert!(calc.is_agent());

        let err = calc.get_time_to_assume_node_rebooted().await.unwrap_err();
        assert!(matches!(err, WardenError::NotReady(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_agent_start_persists_floor() {
        let fx = Fixture::new(5).await;
        fx.set_spec_safe_time(60);
        let calc = fx.agent(10, 60);
        calc.start().await.unwrap();

        assert_eq!(calc.floor(), Some(Duration::from_secs(135)));
        assert_eq!(fx.stored_floor(), 135);
        // configured 60s is below the floor
        assert_eq!(
            calc.get_time_to_assume_node_rebooted().await.unwrap(),
            Duration::from_secs(135)
        );

        let res = fx.store.snapshot(NAME).unwrap();
        assert_eq!(res.version, 2);
        assert!(res.status.last_update_time.is_some());
    }

    #[tokio::test]
    async fn test_agent_prefers_larger_configured_time() {
        let fx = Fixture::new(5).await;
        fx.set_spec_safe_time(300);
        let calc = fx.agent(10, 300);
        calc.start().await.unwrap();
        assert_eq!(
            calc.get_time_to_assume_node_rebooted().await.unwrap(),
            Duration::from_secs(300)
        );
    }

    #[tokio::test]
    async fn test_agent_follows_shared_configured_time() {
        let fx = Fixture::new(5).await;
        fx.set_spec_safe_time(100);
        // local setting disagrees with the shared resource
        let calc = fx.agent(10, 300);
        calc.start().await.unwrap();

        // shared 100s is overridden by the 135s floor, and the agent says so
        assert_eq!(
            calc.get_time_to_assume_node_rebooted().await.unwrap(),
            Duration::from_secs(135)
        );
        let res = fx.store.snapshot(NAME).unwrap();
        let cond = res.status.condition(conditions::SAFE_TIME_OVERRIDDEN).unwrap();
        assert_eq!(cond.status, ConditionStatus::True);

        fx.set_spec_safe_time(400);
        calc.start().await.unwrap();
        assert_eq!(
            calc.get_time_to_assume_node_rebooted().await.unwrap(),
            Duration::from_secs(400)
        );
    }

    #[tokio::test]
    async fn test_batch_ratchet_across_starts() {
        let fx = Fixture::new(40).await;
        let calc = fx.agent(10, 0);
        calc.start().await.unwrap();
        assert_eq!(calc.highest_batch_count(), 11);

        fx.roster.set_nodes(workers(5));
        calc.start().await.unwrap();
        assert_eq!(calc.highest_batch_count(), 11);
        // (15 + 5) * 3 + 30 + 11 * 10 + 10 + 15
        assert_eq!(calc.floor(), Some(Duration::from_secs(225)));
    }

    #[tokio::test]
    async fn test_roster_failure_assumes_max_batches() {
        let fx = Fixture::new(2).await;
        fx.roster.set_failing(true);
        let calc = fx.agent(10, 0);
        calc.start().await.unwrap();

        assert_eq!(calc.floor(), Some(Duration::from_secs(225)));
        // failures don't feed the ratchet
        assert_eq!(calc.highest_batch_count(), 0);
    }

    #[tokio::test]
    async fn test_persistence_coalesces_recent_updates() {
        let fx = Fixture::new(5).await;
        let calc = fx.agent(10, 0);

        calc.manage_safe_reboot_time_in_configuration(Duration::from_secs(200))
            .await
            .unwrap();
        assert_eq!(fx.stored_floor(), 200);

        // smaller value within the window is ignored
        calc.manage_safe_reboot_time_in_configuration(Duration::from_secs(150))
            .await
            .unwrap();
        assert_eq!(fx.stored_floor(), 200);

        // after the window a different value replaces it
        fx.age_last_update(chrono::Duration::seconds(20));
        calc.manage_safe_reboot_time_in_configuration(Duration::from_secs(150))
            .await
            .unwrap();
        assert_eq!(fx.stored_floor(), 150);
    }

    #[tokio::test]
    async fn test_unchanged_status_is_not_written() {
        let fx = Fixture::new(5).await;
        let calc = fx.agent(10, 0);

        calc.manage_safe_reboot_time_in_configuration(Duration::from_secs(135))
            .await
            .unwrap();
        let first = fx.store.snapshot(NAME).unwrap();

        calc.manage_safe_reboot_time_in_configuration(Duration::from_secs(135))
            .await
            .unwrap();
        let second = fx.store.snapshot(NAME).unwrap();
        assert_eq!(first.version, second.version);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn test_override_condition_and_event() {
        let fx = Fixture::new(5).await;
        fx.set_spec_safe_time(100);
        let calc = fx.agent(10, 100);
        calc.start().await.unwrap();

        let res = fx.store.snapshot(NAME).unwrap();
        let cond = res.status.condition(conditions::SAFE_TIME_OVERRIDDEN).unwrap();
        assert_eq!(cond.status, ConditionStatus::True);
        assert_eq!(cond.reason, conditions::REASON_SAFE_TIME_INVALID);

        let events = fx.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, conditions::EVENT_SAFE_TIME_INVALID);
        assert_eq!(events[0].object, NAME);
    }

    #[tokio::test]
    async fn test_override_condition_cleared() {
        let fx = Fixture::new(5).await;
        fx.set_spec_safe_time(100);
        let calc = fx.agent(10, 100);
        calc.start().await.unwrap();

        fx.set_spec_safe_time(0);
        calc.start().await.unwrap();

        let res = fx.store.snapshot(NAME).unwrap();
        let cond = res.status.condition(conditions::SAFE_TIME_OVERRIDDEN).unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, conditions::REASON_SAFE_TIME_VALID);
        assert_eq!(res.status.conditions.len(), 1);
        assert_eq!(fx.events.events().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_start_without_resource() {
        let store = Arc::new(MemoryConfigStore::new());
        let calc = SafeTimeCalculator::agent(
            NAME,
            safety(10),
            Duration::ZERO,
            store,
            Arc::new(StaticRoster::default()),
            Arc::new(MemoryEventRecorder::new()),
        );
        let err = calc.start().await.unwrap_err();
        assert!(matches!(err, WardenError::ConfigNotFound(_)));
        // the local floor is still usable
        assert!(calc.get_time_to_assume_node_rebooted().await.is_ok());
    }

    #[tokio::test]
    async fn test_observer_errors() {
        let store = Arc::new(MemoryConfigStore::new());
        let observer = SafeTimeCalculator::observer(NAME, store.clone());
        assert!(!observer.is_agent());
        observer.start().await.unwrap();

        let err = observer.get_time_to_assume_node_rebooted().await.unwrap_err();
        assert!(matches!(err, WardenError::ConfigNotFound(_)));

        store
            .create(SafetyConfigResource::default_named(NAME))
            .await
            .unwrap();
        let err = observer.get_time_to_assume_node_rebooted().await.unwrap_err();
        assert!(matches!(err, WardenError::Uninitialized(_)));
    }

    /// Fails the first `failures` reads
    struct FlakyStore {
        inner: MemoryConfigStore,
        failures: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ConfigStore for FlakyStore {
        async fn get(&self, name: &str) -> Result<Option<SafetyConfigResource>> {
            use std::sync::atomic::Ordering;
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(WardenError::Store("connection reset".to_string()));
            }
            self.inner.get(name).await
        }

        async fn list(&self) -> Result<Vec<SafetyConfigResource>> {
            self.inner.list().await
        }

        async fn create(&self, resource: SafetyConfigResource) -> Result<bool> {
            self.inner.create(resource).await
        }

        async fn patch_status(
            &self,
            name: &str,
            expected_version: u64,
            status: warden_common::ConfigStatus,
        ) -> Result<SafetyConfigResource> {
            self.inner.patch_status(name, expected_version, status).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_retry_recovers() {
        let store = Arc::new(FlakyStore {
            inner: MemoryConfigStore::new(),
            failures: std::sync::atomic::AtomicUsize::new(2),
        });
        store
            .create(SafetyConfigResource::default_named(NAME))
            .await
            .unwrap();
        let calc = SafeTimeCalculator::agent(
            NAME,
            safety(10),
            Duration::ZERO,
            store.clone(),
            Arc::new(StaticRoster::new(workers(5))),
            Arc::new(MemoryEventRecorder::new()),
        );

        let (_tx, rx) = broadcast::channel(1);
        assert!(calc.start_with_retry(Duration::from_secs(5), rx).await);
        let stored = store.inner.snapshot(NAME).unwrap();
        assert_eq!(stored.status.min_safe_time_to_assume_node_rebooted_seconds, 135);
    }

    #[tokio::test]
    async fn test_start_with_retry_gives_up_on_permanent_error() {
        let calc = SafeTimeCalculator::agent(
            NAME,
            safety(10),
            Duration::ZERO,
            Arc::new(MemoryConfigStore::new()),
            Arc::new(StaticRoster::default()),
            Arc::new(MemoryEventRecorder::new()),
        );
        let (_tx, rx) = broadcast::channel(1);
        assert!(!calc.start_with_retry(Duration::from_secs(5), rx).await);
    }

    #[tokio::test]
    async fn test_fractional_floor_not_undercut_by_observer() {
        let fx = Fixture::new(0).await;
        fx.set_spec_safe_time(0);
        let spec = ConfigSpec {
            api_check_interval_ms: 15_900,
            ..ConfigSpec::default()
        };
        let agent = SafeTimeCalculator::agent(
            NAME,
            SafetyConfiguration::from_spec(&spec, Duration::from_secs(10)),
            Duration::ZERO,
            fx.store.clone(),
            fx.roster.clone(),
            fx.events.clone(),
        );
        agent.start().await.unwrap();

        // (15.9 + 5) * 3 + 30 + 0 + 10 + 15
        let local = agent.get_time_to_assume_node_rebooted().await.unwrap();
        assert_eq!(local, Duration::from_millis(117_700));
        assert_eq!(fx.stored_floor(), 118);

        let observer = SafeTimeCalculator::observer(NAME, fx.store.clone());
        let observed = observer.get_time_to_assume_node_rebooted().await.unwrap();
        assert!(observed >= local, "observer {observed:?} below agent {local:?}");
    }

    #[tokio::test]
    async fn test_agent_to_observer_round_trip() {
        let fx = Fixture::new(40).await;
        let agent = fx.agent(10, 0);
        agent.start().await.unwrap();

        let observer = SafeTimeCalculator::observer(NAME, fx.store.clone());
        // spec default 180s is below the 225s floor
        assert_eq!(
            observer.get_time_to_assume_node_rebooted().await.unwrap(),
            Duration::from_secs(225)
        );

        fx.set_spec_safe_time(400);
        assert_eq!(
            observer.get_time_to_assume_node_rebooted().await.unwrap(),
            Duration::from_secs(400)
        );
    }
}
