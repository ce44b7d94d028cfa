use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::FlowScheduler;
use crate::config::SchedulerConfig;
use crate::storage::lease::{self, SCHEDULER_LEASE};

/// Main scheduler loop.
///
/// Every `sweep_interval_secs` it takes or renews the scheduler lease. The
/// first tick that holds the lease runs recovery; later ticks sweep for
/// overdue schedules. Losing the lease stops sweeping until it comes back,
/// and recovery runs again then. Returns once `shutdown` flips to `true`,
/// releasing the lease on the way out.
pub async fn run_scheduler_loop(
    scheduler: FlowScheduler,
    settings: SchedulerConfig,
    owner: String,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%owner, interval_secs = settings.sweep_interval_secs, "Scheduler engine started");

    let ttl = chrono::Duration::seconds(settings.lease_ttl_secs as i64);
    let mut interval = tokio::time::interval(Duration::from_secs(settings.sweep_interval_secs.max(1)));
    let mut recovered = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let held = scheduler
            .get_pool()
            .get()
            .map_err(anyhow::Error::from)
            .and_then(|conn| {
                lease::try_acquire(&conn, SCHEDULER_LEASE, &owner, ttl, Utc::now())
                    .map_err(anyhow::Error::from)
            });

        match held {
            Ok(true) if !recovered => match scheduler.recover().await {
                Ok(_) => {
                    info!(%owner, "Holding scheduler lease");
                    recovered = true;
                }
                Err(e) => error!("Schedule recovery failed: {}", e),
            },
            Ok(true) => match scheduler.sweep(Utc::now()).await {
                Ok(0) => {}
                Ok(started) => info!(started, "Sweep started overdue flows"),
                Err(e) => error!("Failed to sweep due schedules: {}", e),
            },
            Ok(false) => {
                if recovered {
                    warn!(%owner, "Scheduler lease lost to another instance");
                    recovered = false;
                }
                debug!("Scheduler lease held elsewhere");
            }
            Err(e) => error!("Failed to renew scheduler lease: {}", e),
        }
    }

    let aborted = scheduler.timers().abort_all();
    match scheduler.get_pool().get() {
        Ok(conn) => {
            if let Err(e) = lease::release(&conn, SCHEDULER_LEASE, &owner) {
                warn!("Failed to release scheduler lease: {}", e);
            }
        }
        Err(e) => warn!("Failed to release scheduler lease: {}", e),
    }
    info!(aborted, "Scheduler engine stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::ExecutionFilter;
    use crate::scheduler::{DelayUnit, ScheduleStatus};
    use crate::storage::testing::temp_pool;
    use serde_json::json;
    use uuid::Uuid;

    fn fast() -> SchedulerConfig {
        SchedulerConfig {
            sweep_interval_secs: 1,
            lease_ttl_secs: 30,
            instance_id: None,
        }
    }

    #[tokio::test]
    async fn test_loop_recovers_and_releases_lease() {
        let (_dir, pool) = temp_pool();
        let scheduler = FlowScheduler::new(pool.clone());
        let flow = scheduler
            .register_flow_document(Uuid::new_v4(), "Intake", json!({ "nodes": [{ "id": "s", "type": "start" }] }))
            .await
            .unwrap();
        let s = scheduler.schedule(flow.id, Uuid::new_v4(), -1, DelayUnit::Minutes).await.unwrap();
        // Simulate a restart: the timer is gone, the row is still pending.
        scheduler.timers().abort_all();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_scheduler_loop(scheduler.clone(), fast(), "node-a".into(), rx));

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(
            scheduler.get_schedule(s.id).await.unwrap().status,
            ScheduleStatus::Executed
        );
        assert_eq!(
            scheduler.list_executions(&ExecutionFilter::default()).await.unwrap().len(),
            1
        );
        {
            let conn = pool.get().unwrap();
            assert_eq!(lease::holder(&conn, SCHEDULER_LEASE).unwrap().unwrap().0, "node-a");
        }

        tx.send(true).unwrap();
        handle.await.unwrap();
        let conn = pool.get().unwrap();
        assert!(lease::holder(&conn, SCHEDULER_LEASE).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_reclaims_lease_left_by_crashed_process() {
        let (_dir, pool) = temp_pool();
        let owner = SchedulerConfig::default().owner(&crate::config::DatabaseConfig::default());
        {
            // The previous process died without releasing its lease.
            let conn = pool.get().unwrap();
            lease::try_acquire(&conn, SCHEDULER_LEASE, &owner, chrono::Duration::minutes(5), Utc::now())
                .unwrap();
        }
        let scheduler = FlowScheduler::new(pool);
        let flow = scheduler
            .register_flow_document(Uuid::new_v4(), "Intake", json!({ "nodes": [{ "id": "s", "type": "start" }] }))
            .await
            .unwrap();
        let s = scheduler.schedule(flow.id, Uuid::new_v4(), -1, DelayUnit::Minutes).await.unwrap();
        scheduler.timers().abort_all();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_scheduler_loop(scheduler.clone(), fast(), owner, rx));
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert_eq!(
            scheduler.get_schedule(s.id).await.unwrap().status,
            ScheduleStatus::Executed
        );
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_without_lease_does_not_recover() {
        let (_dir, pool) = temp_pool();
        {
            let conn = pool.get().unwrap();
            lease::try_acquire(&conn, SCHEDULER_LEASE, "node-b", chrono::Duration::minutes(5), Utc::now())
                .unwrap();
        }
        let scheduler = FlowScheduler::new(pool);
        let s = scheduler
            .schedule(Uuid::new_v4(), Uuid::new_v4(), -1, DelayUnit::Hours)
            .await
            .unwrap();
        scheduler.timers().abort_all();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_scheduler_loop(scheduler.clone(), fast(), "node-a".into(), rx));
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert_eq!(
            scheduler.get_schedule(s.id).await.unwrap().status,
            ScheduleStatus::Pending
        );
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
