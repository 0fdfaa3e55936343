use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use webserv::server::timer::TimerHeap;

fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Box<dyn FnOnce() + Send>) {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fired);
    let make = move |id: u32| -> Box<dyn FnOnce() + Send> {
        let sink = Arc::clone(&sink);
        Box::new(move || sink.lock().unwrap().push(id))
    };
    (fired, make)
}

#[test]
fn test_timer_pops_exactly_the_expired_nodes() {
    let (fired, make) = recorder();
    let base = Instant::now();
    let mut timers = TimerHeap::new();

    for (id, ms) in [(1, 50), (2, 10), (3, 30), (4, 70), (5, 20)] {
        timers.add_at(id, base + Duration::from_millis(ms), make(id));
    }

    let popped = timers.pop_expired(base + Duration::from_millis(30));

    assert_eq!(popped, 3);
    assert_eq!(*fired.lock().unwrap(), vec![2, 5, 3]);
    assert_eq!(timers.len(), 2);
    assert!(timers.contains(1));
    assert!(timers.contains(4));
}

#[test]
fn test_timer_callbacks_fire_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let base = Instant::now();
    let mut timers = TimerHeap::new();
    let c = Arc::clone(&count);
    timers.add_at(7u64, base, move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    timers.pop_expired(base + Duration::from_millis(1));
    timers.pop_expired(base + Duration::from_millis(2));

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(timers.is_empty());
}

#[test]
fn test_timer_adjust_extends_deadline() {
    let (fired, make) = recorder();
    let base = Instant::now();
    let mut timers = TimerHeap::new();
    timers.add_at(1, base + Duration::from_millis(10), make(1));
    timers.add_at(2, base + Duration::from_millis(20), make(2));

    assert!(timers.adjust_at(1, base + Duration::from_millis(40)));
    timers.pop_expired(base + Duration::from_millis(25));

    assert_eq!(*fired.lock().unwrap(), vec![2]);
    assert_eq!(timers.deadline(1), Some(base + Duration::from_millis(40)));
    assert!(!timers.adjust_at(99, base));
}

#[test]
fn test_timer_remove_skips_callback() {
    let (fired, make) = recorder();
    let base = Instant::now();
    let mut timers = TimerHeap::new();
    for id in 1..=4 {
        timers.add_at(id, base + Duration::from_millis(id as u64), make(id));
    }

    assert!(timers.remove(2));
    assert!(!timers.remove(2));
    timers.pop_expired(base + Duration::from_secs(1));

    assert_eq!(*fired.lock().unwrap(), vec![1, 3, 4]);
}

#[test]
fn test_timer_add_overwrites_existing_node() {
    let (fired, make) = recorder();
    let base = Instant::now();
    let mut timers = TimerHeap::new();
    timers.add_at(1, base + Duration::from_millis(5), make(1));
    timers.add_at(1, base + Duration::from_millis(50), make(10));

    assert_eq!(timers.len(), 1);
    timers.pop_expired(base + Duration::from_millis(10));
    assert!(fired.lock().unwrap().is_empty());

    timers.pop_expired(base + Duration::from_millis(60));
    assert_eq!(*fired.lock().unwrap(), vec![10]);
}

#[test]
fn test_timer_next_deadline_tracks_minimum() {
    let base = Instant::now();
    let mut timers: TimerHeap<u32> = TimerHeap::new();
    assert_eq!(timers.next_deadline(base), None);

    timers.add_at(1, base + Duration::from_millis(80), || {});
    timers.add_at(2, base + Duration::from_millis(30), || {});
    assert_eq!(timers.next_deadline(base), Some(Duration::from_millis(30)));

    timers.remove(2);
    assert_eq!(timers.next_deadline(base), Some(Duration::from_millis(80)));

    // Overdue timers report zero rather than underflowing.
    assert_eq!(
        timers.next_deadline(base + Duration::from_secs(1)),
        Some(Duration::ZERO)
    );
}
