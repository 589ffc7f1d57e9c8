use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::FutureExt;
use manada::{
    ActionError, ActionRegistry, Archetype, ConfigError, ErrorKind, SchedulerOptions, Selection,
    SharedContext, Stage, Task, TelemetryCollector, Throttle, VirtualUserScheduler, WaitTime,
    action_fn,
};
use parking_lot::Mutex;
use tokio::time::Instant;

fn registry(starts: Arc<Mutex<Vec<Instant>>>) -> ActionRegistry {
    ActionRegistry::new()
        .with("ok", action_fn(|_, _, _| async { Ok::<(), ActionError>(()) }.boxed()))
        .unwrap()
        .with(
            "fail",
            action_fn(|_, _, _| async { Err(ActionError::status(503)) }.boxed()),
        )
        .unwrap()
        .with(
            "slow",
            action_fn(|_, _, _| {
                async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    Ok(())
                }
                .boxed()
            }),
        )
        .unwrap()
        .with(
            "stuck",
            action_fn(|_, _, _| {
                async {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                    Ok(())
                }
                .boxed()
            }),
        )
        .unwrap()
        .with(
            "record_start",
            action_fn(move |_, _, _| {
                let starts = Arc::clone(&starts);
                async move {
                    starts.lock().push(Instant::now());
                    Ok(())
                }
                .boxed()
            }),
        )
        .unwrap()
}

fn scheduler() -> (VirtualUserScheduler, Arc<Mutex<Vec<Instant>>>) {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let scheduler = VirtualUserScheduler::new(
        registry(Arc::clone(&starts)),
        Arc::new(SharedContext::new("http://shop.test")),
    );
    (scheduler, starts)
}

fn archetype(name: &str, weight: f64, tasks: Vec<Task>) -> Archetype {
    Archetype::builder()
        .name(name)
        .weight(weight)
        .wait_time(WaitTime::constant(Duration::from_secs(1)))
        .tasks(tasks)
        .build()
}

#[tokio::test(start_paused = true)]
async fn population_is_split_by_weight() {
    let (scheduler, _) = scheduler();
    let archetypes = [
        archetype("visitor", 10.0, vec![Task::new("ok")]),
        archetype("surf_with_order", 6.0, vec![Task::new("ok")]),
        archetype("fast_order", 4.0, vec![Task::new("ok")]),
    ];

    let handle = scheduler.start(&archetypes, 100, Duration::ZERO).unwrap();
    assert_eq!(
        handle.allocation(),
        [
            ("visitor".to_string(), 50),
            ("surf_with_order".to_string(), 30),
            ("fast_order".to_string(), 20)
        ]
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.active_users(), 100);

    let summary = handle.stop(Duration::from_secs(1)).await;
    assert_eq!(summary.completed, 100);
    assert_eq!(summary.snapshot.count("ok"), 100);
}

#[tokio::test(start_paused = true)]
async fn instances_start_evenly_across_ramp_up() {
    let (scheduler, starts) = scheduler();
    let archetypes = [Archetype::builder()
        .name("visitor")
        .on_start(vec![Task::new("record_start")])
        .tasks(vec![Task::new("ok")])
        .wait_time(WaitTime::constant(Duration::from_secs(1)))
        .build()];

    let t0 = Instant::now();
    let handle = scheduler.start(&archetypes, 5, Duration::from_secs(10)).unwrap();
    tokio::time::sleep(Duration::from_secs(12)).await;
    handle.stop(Duration::from_secs(1)).await;

    let mut offsets: Vec<_> = starts.lock().iter().map(|s| s.duration_since(t0)).collect();
    offsets.sort();
    assert_eq!(offsets, [0, 2, 4, 6, 8].map(Duration::from_secs));
}

#[tokio::test(start_paused = true)]
async fn stop_during_ramp_up_skips_pending_instances() {
    let (scheduler, _) = scheduler();
    let archetypes = [archetype("visitor", 1.0, vec![Task::new("ok")])];

    let handle = scheduler.start(&archetypes, 4, Duration::from_secs(100)).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    let summary = handle.stop(Duration::from_secs(1)).await;

    // offsets 0s, 25s, 50s, 75s
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.not_launched, 2);
}

#[tokio::test(start_paused = true)]
async fn in_flight_actions_finish_within_grace() {
    let (scheduler, _) = scheduler();
    let archetypes = [Archetype::builder()
        .name("buyer")
        .tasks(vec![Task::new("slow")])
        .on_stop(vec![Task::new("ok")])
        .build()];

    let handle = scheduler.start(&archetypes, 2, Duration::ZERO).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let summary = handle.stop(Duration::from_secs(10)).await;

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.cancelled, 0);
    let slow = summary.snapshot.get("slow").unwrap();
    assert_eq!(slow.count, 2);
    assert_eq!(slow.successes, 2);
    // on-stop hooks ran after the main loop
    assert_eq!(summary.snapshot.count("ok"), 2);
}

#[tokio::test(start_paused = true)]
async fn stragglers_are_cancelled_after_grace() {
    let (scheduler, _) = scheduler();
    let archetypes = [archetype("stuck", 1.0, vec![Task::new("stuck")])];

    let handle = scheduler.start(&archetypes, 3, Duration::ZERO).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let started = Instant::now();
    let summary = handle.stop(Duration::from_secs(2)).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(summary.cancelled, 3);
    let stuck = summary.snapshot.get("stuck").unwrap();
    assert_eq!(stuck.count, 3);
    assert_eq!(stuck.failures[&ErrorKind::Cancelled], 3);
}

#[tokio::test(start_paused = true)]
async fn failing_actions_do_not_stop_anyone() {
    let (scheduler, _) = scheduler();
    let archetypes = [
        Archetype::builder()
            .name("flaky")
            .selection(Selection::Sequential)
            .wait_time(WaitTime::constant(Duration::from_secs(1)))
            .tasks(vec![Task::new("fail"), Task::new("ok")])
            .build(),
        archetype("steady", 1.0, vec![Task::new("ok")]),
    ];

    let handle = scheduler.start(&archetypes, 2, Duration::ZERO).unwrap();
    tokio::time::sleep(Duration::from_millis(9_500)).await;
    let summary = handle.stop(Duration::from_secs(1)).await;

    assert_eq!(summary.completed, 2);
    // flaky: fail, ok, fail, ... over 10 ticks; steady: 10 x ok
    let fail = summary.snapshot.get("fail").unwrap();
    assert_eq!(fail.count, 5);
    assert_eq!(fail.failures[&ErrorKind::Status(503)], 5);
    assert_eq!(summary.snapshot.count("ok"), 15);
}

#[tokio::test(start_paused = true)]
async fn setup_failure_only_ends_that_instance() {
    let (scheduler, _) = scheduler();
    let archetypes = [
        Archetype::builder()
            .name("broken")
            .on_start(vec![Task::new("fail")])
            .tasks(vec![Task::new("ok")])
            .build(),
        archetype("fine", 1.0, vec![Task::new("ok")]),
    ];

    let handle = scheduler.start(&archetypes, 4, Duration::ZERO).unwrap();
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(handle.active_users(), 2);
    let summary = handle.stop(Duration::from_secs(1)).await;

    assert_eq!(summary.setup_failed, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.snapshot.count("fail"), 2);
    // only `fine` instances reached the main loop: 2 x 5 ticks
    assert_eq!(summary.snapshot.count("ok"), 10);
}

#[tokio::test(start_paused = true)]
async fn invalid_configuration_spawns_nothing() {
    let (scheduler, _) = scheduler();
    let archetypes = [
        archetype("visitor", 1.0, vec![Task::new("ok")]),
        archetype("typo", 1.0, vec![Task::new("chekout")]),
    ];

    let err = scheduler.start(&archetypes, 10, Duration::ZERO).err().unwrap();
    assert_eq!(
        err,
        ConfigError::UnknownAction {
            archetype: "typo".into(),
            action: "chekout".into()
        }
    );

    let err = scheduler
        .start(&archetypes[..1], 0, Duration::ZERO)
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::PopulationTooSmall { .. }));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(scheduler.telemetry().snapshot().count("ok"), 0);
}

#[tokio::test(start_paused = true)]
async fn throttle_caps_the_action_rate() {
    let (scheduler, _) = scheduler();
    let archetypes = [Archetype::builder()
        .name("hammer")
        .tasks(vec![Task::new("ok")])
        .build()];
    let options = SchedulerOptions::builder()
        .throttle(
            Throttle::builder()
                .stages(vec![Stage::new(Duration::ZERO, 20.0)])
                .bucket_capacity(20)
                .build(),
        )
        .build();

    let handle = scheduler.start_with(&archetypes, 5, options).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let summary = handle.stop(Duration::from_secs(1)).await;

    // 20 actions/s for 5s, give or take one tick
    let count = summary.snapshot.count("ok");
    assert!((95..=105).contains(&count), "count = {count}");
    assert_eq!(summary.completed, 5);
}

#[tokio::test(start_paused = true)]
async fn invalid_throttle_spawns_nothing() {
    let (scheduler, _) = scheduler();
    let archetypes = [archetype("hammer", 1.0, vec![Task::new("ok")])];

    let no_stages = SchedulerOptions::builder()
        .throttle(Throttle::builder().stages(vec![]).build())
        .build();
    let err = scheduler.start_with(&archetypes, 3, no_stages).err().unwrap();
    assert!(matches!(err, ConfigError::InvalidThrottle { .. }));

    let zero_tick = SchedulerOptions::builder()
        .throttle(
            Throttle::builder()
                .stages(vec![Stage::new(Duration::ZERO, 10.0)])
                .tick(Duration::ZERO)
                .build(),
        )
        .build();
    let err = scheduler.start_with(&archetypes, 3, zero_tick).err().unwrap();
    assert!(matches!(err, ConfigError::ZeroDuration { .. }));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(scheduler.telemetry().snapshot().count("ok"), 0);
}

#[tokio::test(start_paused = true)]
async fn no_action_starts_once_stop_lands_on_a_throttle_tick() {
    for _ in 0..50 {
        let stopping = Arc::new(AtomicBool::new(false));
        let late = Arc::new(AtomicUsize::new(0));
        let registry = {
            let stopping = Arc::clone(&stopping);
            let late = Arc::clone(&late);
            ActionRegistry::new()
                .with(
                    "tick",
                    action_fn(move |_, _, _| {
                        if stopping.load(Ordering::SeqCst) {
                            late.fetch_add(1, Ordering::SeqCst);
                        }
                        async { Ok::<(), ActionError>(()) }.boxed()
                    }),
                )
                .unwrap()
        };
        let scheduler =
            VirtualUserScheduler::new(registry, Arc::new(SharedContext::new("http://shop.test")));
        let archetypes = [Archetype::builder()
            .name("paced")
            .tasks(vec![Task::new("tick")])
            .build()];
        let options = SchedulerOptions::builder()
            .throttle(
                Throttle::builder()
                    .stages(vec![Stage::new(Duration::ZERO, 10.0)])
                    .build(),
            )
            .build();

        let handle = scheduler.start_with(&archetypes, 1, options).unwrap();
        // the governor ticks every 100ms, so this lands on a tick
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        stopping.store(true, Ordering::SeqCst);
        let summary = handle.stop(Duration::from_secs(1)).await;

        assert_eq!(summary.completed, 1);
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn shared_collector_and_shutdown_signal() {
    let telemetry = Arc::new(TelemetryCollector::new());
    let (scheduler, _) = scheduler();
    let scheduler = scheduler.with_telemetry(Arc::clone(&telemetry));
    let archetypes = [archetype("visitor", 1.0, vec![Task::new("ok")])];

    let handle = scheduler.start(&archetypes, 2, Duration::ZERO).unwrap();
    let signal = handle.shutdown_signal();
    assert!(!*signal.borrow());

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let summary = handle.stop(Duration::from_secs(1)).await;

    assert!(*signal.borrow());
    // the caller's collector saw everything the summary reports
    assert_eq!(telemetry.snapshot().count("ok"), 6);
    assert_eq!(summary.snapshot.count("ok"), 6);
}
