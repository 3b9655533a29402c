//! End-to-end lifecycle scenarios across threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use crossbeam_utils::Backoff;

use super::{InitFlags, PercpuRef, RefMode};
use crate::reclaim::{DeferredReclamation, Epoch, Manual};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn epoch_ref(flags: InitFlags) -> (PercpuRef, Arc<AtomicUsize>) {
    let releases = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&releases);
    let pref = PercpuRef::builder()
        .with_name("scenario")
        .with_flags(flags)
        .build(move || {
            r.fetch_add(1, Ordering::AcqRel);
        })
        .unwrap();
    (pref, releases)
}

/// Waits until a pending switch has dropped its own reference.
fn settle<R: DeferredReclamation>(r: &PercpuRef<R>) {
    r.data.wait_switch_done();
}

fn wait_until(flag: &AtomicBool) {
    let backoff = Backoff::new();
    while !flag.load(Ordering::Acquire) {
        Epoch.flush();
        backoff.snooze();
    }
}

/// Creator holds 1, thread A takes 3, thread B kills, A drops its 3.
#[test]
fn test_kill_while_holders_outstanding() {
    init_logger();
    let (r, releases) = epoch_ref(InitFlags::empty());
    let r = Arc::new(r);

    r.get_many(3);

    let confirmed = Arc::new(AtomicBool::new(false));
    let killer = Arc::clone(&r);
    let c = Arc::clone(&confirmed);
    thread::spawn(move || killer.kill_and_confirm(move || c.store(true, Ordering::Release)))
        .join()
        .unwrap();
    wait_until(&confirmed);
    settle(&r);

    assert!(r.is_dying());
    assert_eq!(r.count(), 3);

    let holder = Arc::clone(&r);
    let rel = Arc::clone(&releases);
    thread::spawn(move || {
        holder.put();
        holder.put();
        assert_eq!(rel.load(Ordering::Acquire), 0);
        holder.put();
        assert_eq!(rel.load(Ordering::Acquire), 1);
    })
    .join()
    .unwrap();

    assert!(r.is_zero());
    assert!(!r.tryget());
    assert!(!r.tryget_live());
}

/// Same as above, with the puts racing the switch machinery.
#[test]
fn test_kill_racing_puts_releases_once() {
    init_logger();
    for _ in 0..50 {
        let (r, releases) = epoch_ref(InitFlags::empty());
        let r = Arc::new(r);
        r.get_many(3);

        let start = Arc::new(Barrier::new(2));

        let holder = Arc::clone(&r);
        let s = Arc::clone(&start);
        let a = thread::spawn(move || {
            s.wait();
            for _ in 0..3 {
                holder.put();
            }
        });

        let killer = Arc::clone(&r);
        let s = Arc::clone(&start);
        let b = thread::spawn(move || {
            s.wait();
            killer.kill();
        });

        a.join().unwrap();
        b.join().unwrap();

        let backoff = Backoff::new();
        while releases.load(Ordering::Acquire) == 0 {
            Epoch.flush();
            backoff.snooze();
        }
        for _ in 0..16 {
            Epoch.flush();
        }
        assert_eq!(releases.load(Ordering::Acquire), 1);
        assert!(r.is_zero());
    }
}

/// Start atomic, eight units do matched get/put pairs, then kill.
#[test]
fn test_atomic_matched_pairs_then_kill() {
    init_logger();
    let (r, releases) = epoch_ref(InitFlags::START_ATOMIC);
    let r = Arc::new(r);
    let mut handles = vec![];

    for _ in 0..8 {
        let r = Arc::clone(&r);
        handles.push(thread::spawn(move || {
            for _ in 0..1000 {
                r.get();
                assert!(!r.is_zero());
                r.put();
            }
        }));
    }

    for _ in 0..100 {
        assert!(!r.is_zero());
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!r.is_zero());
    r.kill();
    assert!(r.is_zero());
    assert_eq!(releases.load(Ordering::Acquire), 1);
}

/// `switch_to_percpu` is refused on a dead reference until it is revived.
#[test]
fn test_percpu_refused_until_revived() {
    init_logger();
    let manual = Manual::new();
    let r = PercpuRef::builder()
        .with_flags(InitFlags::ALLOW_REINIT)
        .with_reclaimer(manual.clone())
        .build(|| {})
        .unwrap();

    r.kill();
    manual.quiesce();
    assert!(r.is_zero());

    for _ in 0..3 {
        r.switch_to_percpu();
        assert_eq!(r.mode(), RefMode::Dead);
    }

    r.reinit();
    assert_eq!(r.mode(), RefMode::Percpu);
}

/// `tryget` never hands out a reference once release has run.
#[test]
fn test_tryget_never_after_release() {
    init_logger();
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);
    let r = Arc::new(
        PercpuRef::builder()
            .build(move || flag.store(true, Ordering::Release))
            .unwrap(),
    );

    let mut handles = vec![];
    for _ in 0..4 {
        let r = Arc::clone(&r);
        let released = Arc::clone(&released);
        handles.push(thread::spawn(move || {
            for _ in 0..5000 {
                let was_released = released.load(Ordering::Acquire);
                let got = r.tryget();
                if got {
                    assert!(!was_released, "tryget succeeded after release");
                    r.put();
                }
                let got_live = r.tryget_live();
                if got_live {
                    assert!(!was_released, "tryget_live succeeded after release");
                    r.put();
                }
            }
        }));
    }

    r.kill();
    for handle in handles {
        handle.join().unwrap();
    }
    wait_until(&released);
    assert!(!r.tryget());
    assert!(!r.tryget_live());
}

/// Random get/put deltas straddling repeated switches are never lost.
#[test]
fn test_switch_round_trip_exact() {
    init_logger();
    let (r, releases) = epoch_ref(InitFlags::ALLOW_REINIT);
    let r = Arc::new(r);
    let net = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = vec![];

    for t in 0..4u64 {
        let r = Arc::clone(&r);
        let net = Arc::clone(&net);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            let mut held = 0usize;
            let mut i = t;
            while !stop.load(Ordering::Relaxed) {
                i = i.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                if held > 0 && (i >> 33) & 1 == 0 {
                    r.put();
                    held -= 1;
                } else {
                    r.get_many(2);
                    held += 2;
                }
            }
            net.fetch_add(held, Ordering::AcqRel);
        }));
    }

    for _ in 0..30 {
        r.switch_to_atomic_sync();
        r.switch_to_percpu();
    }
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    r.switch_to_atomic_sync();
    let expected = 1 + net.load(Ordering::Acquire) as i64;
    assert_eq!(r.count(), expected);
    assert_eq!(releases.load(Ordering::Acquire), 0);

    r.kill();
    r.put_many(net.load(Ordering::Acquire));
    assert_eq!(releases.load(Ordering::Acquire), 1);
}
