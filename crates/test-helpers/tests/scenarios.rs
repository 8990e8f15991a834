//! End-to-end federation scenarios over the in-process fabric.

use std::thread;
use std::time::Duration;
use tandem_coordination::TimingConfig;
use tandem_test_helpers::FederationFixture;
use tandem_types::{FederationError, HandleFlags, SimTime};

fn seconds(s: f64) -> SimTime {
    SimTime::from_seconds(s)
}

fn payload(value: f64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// S1: two federates on one core; a publish at t=0 is visible after the
/// subscriber's grant at t=1.
#[test]
fn test_two_federate_round_trip() {
    let fixture = FederationFixture::builder("s1")
        .cores(1)
        .min_federates(2)
        .build()
        .unwrap();
    let core = &fixture.cores[0];
    let a = core.join_federate("A", TimingConfig::default()).unwrap();
    let b = core.join_federate("B", TimingConfig::default()).unwrap();

    let x = a
        .register_global_publication("x", "double", "", HandleFlags::default())
        .unwrap();
    let sub = b.register_subscription("x", "").unwrap();

    let ta = thread::spawn(move || {
        a.enter_initializing().unwrap();
        a.enter_executing().unwrap();
        a.publish(x, payload(3.14)).unwrap();
        let grant = a.request_time(seconds(1.0), false).unwrap();
        assert_eq!(grant.granted, seconds(1.0));
        a.finalize().unwrap();
    });
    let tb = thread::spawn(move || {
        b.enter_initializing().unwrap();
        b.enter_executing().unwrap();
        let grant = b.request_time(seconds(1.0), false).unwrap();
        assert_eq!(grant.granted, seconds(1.0));
        assert!(b.is_updated(sub).unwrap());
        assert_eq!(b.get_value_raw(sub).unwrap(), payload(3.14));
        assert!(!b.is_updated(sub).unwrap());
        b.finalize().unwrap();
    });
    ta.join().unwrap();
    tb.join().unwrap();
    assert!(fixture.wait_for_shutdown(Duration::from_secs(10)));
}

/// S2 (first half): a federate that has requested far ahead does not
/// block its dependents.
#[test]
fn test_time_blocking_requester_blocks_only_itself() {
    let fixture = FederationFixture::builder("s2a")
        .cores(1)
        .min_federates(2)
        .build()
        .unwrap();
    let core = &fixture.cores[0];
    let a = core.join_federate("A", TimingConfig::default()).unwrap();
    let b = core.join_federate("B", TimingConfig::default()).unwrap();

    a.register_global_publication("a_out", "double", "", HandleFlags::default())
        .unwrap();
    b.register_subscription("a_out", "").unwrap();

    let ta = thread::spawn(move || {
        a.enter_initializing().unwrap();
        a.enter_executing().unwrap();
        let grant = a.request_time(seconds(5.0), false).unwrap();
        assert_eq!(grant.granted, seconds(5.0));
        a.finalize().unwrap();
    });
    let tb = thread::spawn(move || {
        b.enter_initializing().unwrap();
        b.enter_executing().unwrap();
        let grant = b.request_time(seconds(2.0), false).unwrap();
        assert_eq!(grant.granted, seconds(2.0));
        b.finalize().unwrap();
    });
    ta.join().unwrap();
    tb.join().unwrap();
    assert!(fixture.wait_for_shutdown(Duration::from_secs(10)));
}

/// S2 (swap): a publish into a far-ahead requester pulls its grant in
/// to the event time.
#[test]
fn test_event_driven_grant_pulls_request_in() {
    let fixture = FederationFixture::builder("s2b")
        .cores(1)
        .min_federates(2)
        .build()
        .unwrap();
    let core = &fixture.cores[0];
    let a = core.join_federate("A", TimingConfig::default()).unwrap();
    let b = core.join_federate("B", TimingConfig::default()).unwrap();

    let b_out = b
        .register_global_publication("b_out", "double", "", HandleFlags::default())
        .unwrap();
    let sub = a.register_subscription("b_out", "").unwrap();

    let ta = thread::spawn(move || {
        a.enter_initializing().unwrap();
        a.enter_executing().unwrap();
        // Requested 5.0, but B's publish at 2.0 arrives first.
        let grant = a.request_time(seconds(5.0), false).unwrap();
        assert_eq!(grant.granted, seconds(2.0));
        assert_eq!(a.get_value_raw(sub).unwrap(), payload(7.0));
        a.finalize().unwrap();
    });
    let tb = thread::spawn(move || {
        b.enter_initializing().unwrap();
        b.enter_executing().unwrap();
        let grant = b.request_time(seconds(2.0), false).unwrap();
        assert_eq!(grant.granted, seconds(2.0));
        b.publish(b_out, payload(7.0)).unwrap();
        b.finalize().unwrap();
    });
    ta.join().unwrap();
    tb.join().unwrap();
    assert!(fixture.wait_for_shutdown(Duration::from_secs(10)));
}

/// S3: mutually dependent federates iterating at the same time are
/// granted once the iteration budget runs out, flagged as such.
#[test]
fn test_iteration_limit_grants_flagged() {
    let fixture = FederationFixture::builder("s3")
        .cores(1)
        .min_federates(2)
        .tick(Duration::from_millis(50))
        .build()
        .unwrap();
    let core = &fixture.cores[0];
    let timing = TimingConfig {
        max_iterations: 3,
        ..TimingConfig::default()
    };
    let a = core.join_federate("A", timing).unwrap();
    let b = core.join_federate("B", timing).unwrap();

    a.register_global_publication("a_out", "double", "", HandleFlags::default())
        .unwrap();
    b.register_global_publication("b_out", "double", "", HandleFlags::default())
        .unwrap();
    a.register_subscription("b_out", "").unwrap();
    b.register_subscription("a_out", "").unwrap();

    // Hold finalize until both grants landed; tearing the dependency
    // edge early would resolve the peer's iteration without the flag.
    let barrier = std::sync::Arc::new(std::sync::Barrier::new(2));
    let run = |fed: tandem_core::Federate| {
        let barrier = std::sync::Arc::clone(&barrier);
        thread::spawn(move || {
            fed.enter_initializing().unwrap();
            fed.enter_executing().unwrap();
            let grant = fed.request_time(seconds(1.0), true).unwrap();
            assert_eq!(grant.granted, seconds(1.0));
            assert!(grant.iteration_limit, "grant must carry the limit flag");
            barrier.wait();
            fed.finalize().unwrap();
        })
    };
    let ta = run(a);
    let tb = run(b);
    ta.join().unwrap();
    tb.join().unwrap();
    assert!(fixture.wait_for_shutdown(Duration::from_secs(10)));
}

/// S4: the same global name from two federates yields one success and
/// one collision, and the federation keeps going.
#[test]
fn test_global_name_collision() {
    let fixture = FederationFixture::builder("s4")
        .cores(2)
        .min_federates(2)
        .build()
        .unwrap();
    let f1 = fixture.cores[0]
        .join_federate("one", TimingConfig::default())
        .unwrap();
    let f2 = fixture.cores[1]
        .join_federate("two", TimingConfig::default())
        .unwrap();

    f1.register_global_publication("load", "double", "", HandleFlags::default())
        .unwrap();
    let err = f2
        .register_global_publication("load", "double", "", HandleFlags::default())
        .unwrap_err();
    assert_eq!(err, FederationError::NameCollision("load".into()));

    // The federation continues past the failure.
    let run = |fed: tandem_core::Federate| {
        thread::spawn(move || {
            fed.enter_initializing().unwrap();
            fed.enter_executing().unwrap();
            let grant = fed.request_time(seconds(1.0), false).unwrap();
            assert_eq!(grant.granted, seconds(1.0));
            fed.finalize().unwrap();
        })
    };
    let t1 = run(f1);
    let t2 = run(f2);
    t1.join().unwrap();
    t2.join().unwrap();
    assert!(fixture.wait_for_shutdown(Duration::from_secs(10)));
}

/// S5: the root's init timeout fails the waiting federate and tears the
/// federation down.
#[test]
fn test_init_timeout() {
    let fixture = FederationFixture::builder("s5")
        .cores(1)
        .min_federates(2)
        .timeout(Duration::from_millis(300))
        .tick(Duration::from_millis(100))
        .build()
        .unwrap();
    let fed = fixture.cores[0]
        .join_federate("lonely", TimingConfig::default())
        .unwrap();

    let err = fed.enter_initializing().unwrap_err();
    assert_eq!(err, FederationError::InitTimeout);
    assert!(fixture.wait_for_shutdown(Duration::from_secs(10)));
}

/// S6: finalize in arbitrary order shuts every node down cleanly.
#[test]
fn test_clean_shutdown_any_order() {
    let fixture = FederationFixture::builder("s6")
        .cores(2)
        .min_federates(3)
        .build()
        .unwrap();
    let f1 = fixture.cores[0]
        .join_federate("f1", TimingConfig::default())
        .unwrap();
    let f2 = fixture.cores[0]
        .join_federate("f2", TimingConfig::default())
        .unwrap();
    let f3 = fixture.cores[1]
        .join_federate("f3", TimingConfig::default())
        .unwrap();

    let run = |fed: tandem_core::Federate, delay_ms: u64| {
        thread::spawn(move || {
            fed.enter_initializing().unwrap();
            fed.enter_executing().unwrap();
            thread::sleep(Duration::from_millis(delay_ms));
            fed.finalize().unwrap();
        })
    };
    let t2 = run(f2, 0);
    let t3 = run(f3, 25);
    let t1 = run(f1, 50);
    t1.join().unwrap();
    t2.join().unwrap();
    t3.join().unwrap();
    assert!(fixture.wait_for_shutdown(Duration::from_secs(10)));
}

/// Queries answer synchronously across the tree.
#[test]
fn test_queries() {
    let fixture = FederationFixture::builder("q")
        .cores(1)
        .min_federates(2)
        .build()
        .unwrap();
    let core = &fixture.cores[0];
    let a = core.join_federate("alpha", TimingConfig::default()).unwrap();
    let b = core.join_federate("beta", TimingConfig::default()).unwrap();

    assert_eq!(a.query("core", "name").unwrap(), "q-core0");
    assert_eq!(a.query("root", "name").unwrap(), "q-root");
    assert_eq!(a.query("root", "federates").unwrap(), "[alpha;beta]");
    assert_eq!(a.query("beta", "state").unwrap(), "created");
    assert_eq!(a.query("root", "bogus").unwrap(), "#invalid");
    assert_eq!(a.query("nosuchtarget", "state").unwrap(), "#invalid");

    drop(b);
    drop(a);
}
