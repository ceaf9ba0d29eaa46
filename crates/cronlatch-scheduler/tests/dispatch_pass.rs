// End-to-end passes against an on-disk SQLite store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use cronlatch_scheduler::{
    Dispatcher, HandlerRegistry, JobStore, NewJob, RecurrenceRule, SchedulerHandle, SqliteStore,
    WATERMARK_NEVER,
};

#[test]
fn parallel_dispatchers_run_each_job_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.db");
    let now = Utc.with_ymd_and_hms(2022, 5, 4, 12, 0, 30).unwrap();

    let handle = SchedulerHandle::new(Arc::new(SqliteStore::open(&path).unwrap()));
    for i in 0..6 {
        handle
            .add_job(
                NewJob::new(format!("j{i}"), "count", "0 * *".parse().unwrap())
                    .first_run_at(now.timestamp() - 600 + i),
            )
            .unwrap();
    }

    let hits = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(HandlerRegistry::new());
    let h = Arc::clone(&hits);
    registry.register_fn("count", move |_| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let workers = 3;
    let barrier = Arc::new(Barrier::new(workers));
    let threads: Vec<_> = (0..workers)
        .map(|_| {
            let path = path.clone();
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open(&path).unwrap());
                let dispatcher = Dispatcher::new(store, registry);
                barrier.wait();
                dispatcher.run_due_pass(now).unwrap()
            })
        })
        .collect();
    let reports: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    assert_eq!(hits.load(Ordering::SeqCst), 6);
    let claimed: usize = reports.iter().map(|r| r.claimed).sum();
    assert_eq!(claimed, 6);

    let next_hour = Utc.with_ymd_and_hms(2022, 5, 4, 13, 0, 0).unwrap().timestamp();
    for job in handle.list_jobs().unwrap() {
        assert_eq!(job.next_run, next_hour);
        assert_eq!(job.last_run, Some(now.timestamp()));
    }
    assert_eq!(handle.watermark().get().unwrap(), next_hour);
}

#[test]
fn watermark_survives_reopen_and_gates_later_passes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.db");
    let now = Utc.with_ymd_and_hms(2022, 5, 4, 12, 0, 30).unwrap();

    {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open(&path).unwrap());
        SchedulerHandle::new(Arc::clone(&store))
            .add_job(
                NewJob::new("daily", "noop", RecurrenceRule::every_minute().with_minutes([0]).with_hours([6]))
                    .first_run_at(now.timestamp() - 1),
            )
            .unwrap();
        let report = Dispatcher::new(store, Arc::new(HandlerRegistry::new()))
            .run_due_pass(now)
            .unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.unresolved, 1);
    }

    let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let dispatcher = Dispatcher::new(store, Arc::new(HandlerRegistry::new()));
    let tomorrow_six = Utc.with_ymd_and_hms(2022, 5, 5, 6, 0, 0).unwrap();
    assert_eq!(dispatcher.watermark().get().unwrap(), tomorrow_six.timestamp());

    let later = dispatcher.run_due_pass(now + Duration::hours(2)).unwrap();
    assert!(later.gated);
    assert_eq!(later.claimed, 0);
}

#[test]
fn deactivated_jobs_are_never_due() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn JobStore> =
        Arc::new(SqliteStore::open(dir.path().join("cron.db")).unwrap());
    let handle = SchedulerHandle::new(Arc::clone(&store));
    let job = handle
        .add_job(NewJob::new("x", "noop", RecurrenceRule::every_minute()).first_run_at(0))
        .unwrap();
    handle.set_active(&job.id, false).unwrap();
    assert_eq!(handle.watermark().get().unwrap(), WATERMARK_NEVER);

    let report = Dispatcher::new(store, Arc::new(HandlerRegistry::new()))
        .run_due_pass(Utc::now())
        .unwrap();
    assert!(report.gated);
    assert_eq!(report.claimed, 0);
}

#[test]
fn unusable_rule_does_not_pin_the_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.db");
    let now = Utc.with_ymd_and_hms(2022, 1, 1, 0, 30, 30).unwrap();

    let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let handle = SchedulerHandle::new(Arc::clone(&store));
    let broken = handle
        .add_job(
            NewJob::new("broken", "noop", RecurrenceRule::every_minute())
                .first_run_at(now.timestamp() - 60),
        )
        .unwrap();
    let later = now.timestamp() + 3600;
    handle
        .add_job(NewJob::new("later", "noop", RecurrenceRule::every_minute()).first_run_at(later))
        .unwrap();

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute(
        "UPDATE scheduled_jobs SET rule = 'not json' WHERE id = ?1",
        [&broken.id],
    )
    .unwrap();

    let dispatcher = Dispatcher::new(store, Arc::new(HandlerRegistry::new()));
    let first = dispatcher.run_due_pass(now).unwrap();
    assert!(!first.gated);
    assert_eq!(first.due, 0);
    assert_eq!(first.watermark, later);

    for minutes in [1, 30, 59] {
        assert!(dispatcher.run_due_pass(now + Duration::minutes(minutes)).unwrap().gated);
    }
    let still_active: bool = raw
        .query_row(
            "SELECT active FROM scheduled_jobs WHERE id = ?1",
            [&broken.id],
            |r| r.get(0),
        )
        .unwrap();
    assert!(!still_active);
}

#[test]
fn concurrent_rebuilds_settle_on_the_true_minimum() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.db");
    let base = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap().timestamp();

    let adders = 4;
    let rebuilders = 2;
    let barrier = Arc::new(Barrier::new(adders + rebuilders));
    let mut threads = Vec::new();
    for w in 0..adders {
        let path = path.clone();
        let barrier = Arc::clone(&barrier);
        threads.push(thread::spawn(move || {
            let handle = SchedulerHandle::new(Arc::new(SqliteStore::open(&path).unwrap()));
            barrier.wait();
            for n in 0..10 {
                let offset = (w * 10 + n) as i64;
                handle
                    .add_job(
                        NewJob::new(format!("w{w}-{n}"), "noop", RecurrenceRule::every_minute())
                            .first_run_at(base - offset * 60),
                    )
                    .unwrap();
            }
        }));
    }
    for _ in 0..rebuilders {
        let path = path.clone();
        let barrier = Arc::clone(&barrier);
        threads.push(thread::spawn(move || {
            let handle = SchedulerHandle::new(Arc::new(SqliteStore::open(&path).unwrap()));
            barrier.wait();
            for _ in 0..40 {
                handle.watermark().rebuild().unwrap();
            }
        }));
    }
    for t in threads {
        t.join().unwrap();
    }

    let handle = SchedulerHandle::new(Arc::new(SqliteStore::open(&path).unwrap()));
    let lowest = base - ((adders * 10 - 1) as i64) * 60;
    assert_eq!(handle.watermark().get().unwrap(), lowest);
}
