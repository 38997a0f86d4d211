use super::*;
use std::thread;

#[test]
fn test_new_sync_point_is_pending() {
    let sp = SyncPoint::create(SyncPointKind::GpuOnly);
    assert_eq!(sp.state(), SyncPointState::Pending);
    assert!(!sp.is_complete());
    assert!(sp.failure().is_none());
    assert!(sp.resolved_fence().is_none());
}

#[test]
fn test_ids_are_unique() {
    let a = SyncPoint::create(SyncPointKind::GpuOnly);
    let b = SyncPoint::create(SyncPointKind::GpuOnly);
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_resolve_then_complete() {
    let sp = SyncPoint::create(SyncPointKind::GpuAndCpu);
    sp.resolve(QueueType::Direct, 3).unwrap();
    assert_eq!(sp.resolved_fence(), Some((QueueType::Direct, 3)));
    assert!(!sp.is_complete());

    sp.complete();
    assert!(sp.is_complete());
}

#[test]
fn test_resolve_twice_rejected() {
    let sp = SyncPoint::create(SyncPointKind::GpuOnly);
    sp.resolve(QueueType::Compute, 1).unwrap();
    assert!(matches!(sp.resolve(QueueType::Compute, 2), Err(Error::InvalidState(_))));
}

#[test]
fn test_signal_can_only_be_claimed_once() {
    let sp = SyncPoint::create(SyncPointKind::GpuOnly);
    assert!(sp.claim_signal().is_ok());
    assert!(sp.claim_signal().is_err());
}

#[test]
fn test_completion_is_monotonic() {
    let sp = SyncPoint::create(SyncPointKind::GpuOnly);
    sp.complete();
    sp.fail(Error::DeviceLost("late".to_string()));
    assert!(sp.is_complete());
    assert!(sp.failure().is_none());
}

#[test]
fn test_failed_never_completes() {
    let sp = SyncPoint::create(SyncPointKind::GpuAndCpu);
    sp.fail(Error::GpuTimeout { sync_point: sp.id() });
    sp.complete();
    assert!(!sp.is_complete());
    assert_eq!(sp.failure(), Some(Error::GpuTimeout { sync_point: sp.id() }));
    assert_eq!(
        sp.wait(Duration::from_millis(1)),
        Err(Error::GpuTimeout { sync_point: sp.id() })
    );
}

#[test]
fn test_cpu_wait_on_gpu_only_rejected() {
    let sp = SyncPoint::create(SyncPointKind::GpuOnly);
    assert!(matches!(sp.wait(Duration::from_millis(1)), Err(Error::InvalidState(_))));
}

#[test]
fn test_cpu_wait_times_out() {
    let sp = SyncPoint::create(SyncPointKind::GpuAndCpu);
    assert_eq!(
        sp.wait(Duration::from_millis(5)),
        Err(Error::GpuTimeout { sync_point: sp.id() })
    );
}

#[test]
fn test_cpu_wait_wakes_on_completion() {
    let sp = SyncPoint::create(SyncPointKind::GpuAndCpu);
    let signaler = {
        let sp = sp.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            sp.complete();
        })
    };

    assert!(sp.wait(Duration::from_secs(5)).is_ok());
    signaler.join().unwrap();
}
