use crate::promotion::{CycleReport, PromotionEngine};
use crate::salience::SalienceTracker;
use crate::telemetry::EngineTelemetry;
use crate::working::WorkingMemoryStore;
use config::{SchedulerConfig, WorkingMemoryConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background maintenance for the engine: periodic promotion cycles,
/// salience flushes, TTL cleanup, and idle-session cleanup.
///
/// Each task runs on its own tokio interval and logs failures without
/// stopping its loop. `start` is idempotent; calling it on a running
/// scheduler is a warning, not an error. Manual triggers share the same
/// code paths as the scheduled runs.
pub struct MaintenanceScheduler {
    promotion: Arc<PromotionEngine>,
    salience: Arc<SalienceTracker>,
    working: Arc<WorkingMemoryStore>,
    config: SchedulerConfig,
    working_config: WorkingMemoryConfig,
    telemetry: Arc<EngineTelemetry>,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub fn new(
        promotion: Arc<PromotionEngine>,
        salience: Arc<SalienceTracker>,
        working: Arc<WorkingMemoryStore>,
        config: SchedulerConfig,
        working_config: WorkingMemoryConfig,
        telemetry: Arc<EngineTelemetry>,
    ) -> Self {
        Self {
            promotion,
            salience,
            working,
            config,
            working_config,
            telemetry,
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running, ignoring start");
            return;
        }
        info!(
            promotion_secs = self.config.promotion_interval_secs,
            salience_secs = self.config.salience_flush_interval_secs,
            ttl_secs = self.config.ttl_cleanup_interval_secs,
            session_secs = self.config.session_cleanup_interval_secs,
            "Starting maintenance scheduler"
        );

        let mut handles = self.handles.lock().await;
        handles.push(self.spawn_promotion_loop());
        handles.push(self.spawn_salience_loop());
        handles.push(self.spawn_ttl_loop());
        handles.push(self.spawn_session_loop());
    }

    /// Signals the loops to exit at their next wake-up. An in-flight flush
    /// or cycle always runs to completion; nothing is interrupted mid-write.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Dropping the handles detaches the tasks; each observes the flag
        // at its next tick and breaks.
        self.handles.lock().await.clear();
        info!("Maintenance scheduler stopped");
    }

    /// Runs a promotion cycle now, outside the schedule.
    pub async fn run_manual_promotion(&self) -> CycleReport {
        Self::timed_promotion(&self.promotion, &self.telemetry).await
    }

    /// Runs TTL and idle-session cleanup now. Returns (facts removed,
    /// sessions removed).
    pub async fn run_manual_cleanup(&self) -> (usize, usize) {
        let facts = Self::timed_ttl_cleanup(&self.promotion, &self.telemetry).await;
        let sessions = Self::timed_session_cleanup(
            &self.working,
            self.working_config.idle_timeout_secs,
            &self.telemetry,
        );
        (facts, sessions)
    }

    fn spawn_promotion_loop(&self) -> JoinHandle<()> {
        let promotion = self.promotion.clone();
        let telemetry = self.telemetry.clone();
        let running = self.running.clone();
        let period = Duration::from_secs(self.config.promotion_interval_secs);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                Self::timed_promotion(&promotion, &telemetry).await;
            }
        })
    }

    fn spawn_salience_loop(&self) -> JoinHandle<()> {
        let salience = self.salience.clone();
        let telemetry = self.telemetry.clone();
        let running = self.running.clone();
        let period = Duration::from_secs(self.config.salience_flush_interval_secs);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let started = std::time::Instant::now();
                let report = salience.flush().await;
                telemetry.record_task_run("salience_flush", started.elapsed().as_millis() as f64);
                if report.failed > 0 {
                    telemetry.record_task_failure("salience_flush", "partial");
                }
                debug!(flushed = report.flushed, failed = report.failed, "Scheduled salience flush");
            }
        })
    }

    fn spawn_ttl_loop(&self) -> JoinHandle<()> {
        let promotion = self.promotion.clone();
        let telemetry = self.telemetry.clone();
        let running = self.running.clone();
        let period = Duration::from_secs(self.config.ttl_cleanup_interval_secs);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                Self::timed_ttl_cleanup(&promotion, &telemetry).await;
            }
        })
    }

    fn spawn_session_loop(&self) -> JoinHandle<()> {
        let working = self.working.clone();
        let telemetry = self.telemetry.clone();
        let running = self.running.clone();
        let period = Duration::from_secs(self.config.session_cleanup_interval_secs);
        let idle_timeout = self.working_config.idle_timeout_secs;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                Self::timed_session_cleanup(&working, idle_timeout, &telemetry);
            }
        })
    }

    async fn timed_promotion(
        promotion: &PromotionEngine,
        telemetry: &EngineTelemetry,
    ) -> CycleReport {
        let started = std::time::Instant::now();
        let report = promotion.run_cycle().await;
        telemetry.record_task_run("promotion", started.elapsed().as_millis() as f64);
        if report.status == crate::promotion::CycleStatus::Error {
            telemetry.record_task_failure("promotion", "cycle_error");
        }
        report
    }

    async fn timed_ttl_cleanup(promotion: &PromotionEngine, telemetry: &EngineTelemetry) -> usize {
        let started = std::time::Instant::now();
        match promotion.cleanup_expired().await {
            Ok(removed) => {
                telemetry.record_task_run("ttl_cleanup", started.elapsed().as_millis() as f64);
                removed
            }
            Err(err) => {
                warn!(error = %err, "TTL cleanup failed");
                telemetry.record_task_failure("ttl_cleanup", "index_error");
                0
            }
        }
    }

    fn timed_session_cleanup(
        working: &WorkingMemoryStore,
        idle_timeout_secs: u64,
        telemetry: &EngineTelemetry,
    ) -> usize {
        let started = std::time::Instant::now();
        let removed = working.expire_idle_sessions(idle_timeout_secs);
        telemetry.record_session_cleanup(removed);
        telemetry.record_working_memory_sessions(working.session_count());
        telemetry.record_task_run("session_cleanup", started.elapsed().as_millis() as f64);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promotion::CycleStatus;
    use crate::providers::MockVectorIndex;
    use config::{PromotionConfig, SalienceConfig};
    use engram_core::traits::VectorIndexAdapter;
    use engram_core::types::{EpisodicFact, IndexRecord};

    fn scheduler(index: Arc<MockVectorIndex>, config: SchedulerConfig) -> MaintenanceScheduler {
        let telemetry = Arc::new(EngineTelemetry::new());
        MaintenanceScheduler::new(
            Arc::new(PromotionEngine::new(
                index.clone(),
                PromotionConfig::default(),
                telemetry.clone(),
            )),
            Arc::new(SalienceTracker::new(
                index,
                SalienceConfig::default(),
                telemetry.clone(),
            )),
            Arc::new(WorkingMemoryStore::new(20)),
            config,
            WorkingMemoryConfig::default(),
            telemetry,
        )
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let scheduler = scheduler(Arc::new(MockVectorIndex::new()), SchedulerConfig::default());
        scheduler.start().await;
        assert!(scheduler.is_running());
        scheduler.start().await;
        assert_eq!(scheduler.handles.lock().await.len(), 4);
        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert!(scheduler.handles.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_manual_promotion_runs_cycle() {
        let index = Arc::new(MockVectorIndex::new());
        let mut fact = EpisodicFact::new(
            "important fact".to_string(),
            "s1".to_string(),
            vec![],
            0.9,
            30,
        );
        fact.citation_count = 10;
        fact.created_at -= 10 * 86_400;
        index.upsert(vec![IndexRecord::from_fact(&fact)]).await.unwrap();

        let scheduler = scheduler(index, SchedulerConfig::default());
        let report = scheduler.run_manual_promotion().await;
        assert_eq!(report.promoted, 1);
        assert_eq!(report.status, CycleStatus::Success);
    }

    #[tokio::test]
    async fn test_manual_cleanup_removes_expired() {
        let index = Arc::new(MockVectorIndex::new());
        let mut expired = EpisodicFact::new(
            "stale fact".to_string(),
            "s1".to_string(),
            vec![],
            0.3,
            30,
        );
        expired.ttl_at = chrono::Utc::now().timestamp() - 60;
        index.upsert(vec![IndexRecord::from_fact(&expired)]).await.unwrap();

        let scheduler = scheduler(index, SchedulerConfig::default());
        let (facts, sessions) = scheduler.run_manual_cleanup().await;
        assert_eq!(facts, 1);
        assert_eq!(sessions, 0);
    }

    /// Index whose metadata writes take a while, so a flush can be caught
    /// in flight.
    struct SlowIndex {
        inner: Arc<MockVectorIndex>,
        write_delay: Duration,
    }

    #[async_trait::async_trait]
    impl VectorIndexAdapter for SlowIndex {
        type Error = crate::BoxError;

        async fn similarity_search(
            &self,
            query: &str,
            k: usize,
            filter: std::collections::HashMap<String, serde_json::Value>,
        ) -> Result<Vec<engram_core::types::SearchHit>, Self::Error> {
            self.inner.similarity_search(query, k, filter).await
        }

        async fn upsert(&self, batch: Vec<IndexRecord>) -> Result<Vec<String>, Self::Error> {
            self.inner.upsert(batch).await
        }

        async fn get(
            &self,
            id: &str,
        ) -> Result<Option<engram_core::types::SearchHit>, Self::Error> {
            self.inner.get(id).await
        }

        async fn update_metadata(
            &self,
            id: &str,
            metadata: std::collections::HashMap<String, serde_json::Value>,
        ) -> Result<(), Self::Error> {
            tokio::time::sleep(self.write_delay).await;
            self.inner.update_metadata(id, metadata).await
        }

        async fn delete(&self, id: &str) -> Result<(), Self::Error> {
            self.inner.delete(id).await
        }

        async fn scroll(
            &self,
            filter: std::collections::HashMap<String, serde_json::Value>,
            limit: usize,
        ) -> Result<Vec<engram_core::types::SearchHit>, Self::Error> {
            self.inner.scroll(filter, limit).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_interrupt_inflight_flush() {
        let inner = Arc::new(MockVectorIndex::new());
        let fact = EpisodicFact::new("slow fact".to_string(), "s1".to_string(), vec![], 0.3, 30);
        inner.upsert(vec![IndexRecord::from_fact(&fact)]).await.unwrap();

        let slow: crate::DynVectorIndex = Arc::new(SlowIndex {
            inner: inner.clone(),
            write_delay: Duration::from_millis(200),
        });
        let telemetry = Arc::new(EngineTelemetry::new());
        let salience = Arc::new(SalienceTracker::new(
            slow,
            SalienceConfig::default(),
            telemetry.clone(),
        ));
        let scheduler = MaintenanceScheduler::new(
            Arc::new(PromotionEngine::new(
                inner.clone(),
                PromotionConfig::default(),
                telemetry.clone(),
            )),
            salience.clone(),
            Arc::new(WorkingMemoryStore::new(20)),
            SchedulerConfig {
                salience_flush_interval_secs: 1,
                ..SchedulerConfig::default()
            },
            WorkingMemoryConfig::default(),
            telemetry,
        );

        salience.track_usage(&[fact.id.clone()]).await;
        scheduler.start().await;

        // Wake the flush loop, then stop while the slow write is in flight.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        // The in-flight flush still completes; nothing is dropped.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(salience.pending_count().await, 0);
        let hit = inner.get(&fact.id).await.unwrap().unwrap();
        let stored = EpisodicFact::from_hit(&hit).unwrap();
        assert!(stored.salience > 0.3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_flush_fires() {
        let index = Arc::new(MockVectorIndex::new());
        let fact = EpisodicFact::new("used fact".to_string(), "s1".to_string(), vec![], 0.3, 30);
        index.upsert(vec![IndexRecord::from_fact(&fact)]).await.unwrap();

        let telemetry = Arc::new(EngineTelemetry::new());
        let salience = Arc::new(SalienceTracker::new(
            index.clone(),
            SalienceConfig::default(),
            telemetry.clone(),
        ));
        let scheduler = MaintenanceScheduler::new(
            Arc::new(PromotionEngine::new(
                index.clone(),
                PromotionConfig::default(),
                telemetry.clone(),
            )),
            salience.clone(),
            Arc::new(WorkingMemoryStore::new(20)),
            SchedulerConfig {
                salience_flush_interval_secs: 1,
                ..SchedulerConfig::default()
            },
            WorkingMemoryConfig::default(),
            telemetry,
        );

        salience.track_usage(&[fact.id.clone()]).await;
        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.stop().await;

        assert_eq!(salience.pending_count().await, 0);
        let hit = index.get(&fact.id).await.unwrap().unwrap();
        let stored = EpisodicFact::from_hit(&hit).unwrap();
        assert!(stored.salience > 0.3);
    }
}
