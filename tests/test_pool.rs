use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use webserv::error::SubmitError;
use webserv::server::pool::WorkerPool;

#[test]
fn test_pool_runs_every_task_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let mut pool = WorkerPool::new(4).unwrap();

    for _ in 0..1000 {
        let count = Arc::clone(&count);
        pool.add_task(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    pool.shutdown();

    assert_eq!(count.load(Ordering::SeqCst), 1000);
}

#[test]
fn test_pool_keeps_per_producer_order() {
    // A single worker makes execution order equal to queue order.
    let pool = Arc::new(WorkerPool::new(1).unwrap());
    let log = Arc::new(Mutex::new(Vec::new()));
    let producers = 4;
    let per_producer = 250;

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let pool = Arc::clone(&pool);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for seq in 0..per_producer {
                    let log = Arc::clone(&log);
                    pool.add_task(move || log.lock().unwrap().push((p, seq)))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    drop(Arc::try_unwrap(pool).ok().expect("producers finished"));

    let log = log.lock().unwrap();
    assert_eq!(log.len(), producers * per_producer);
    let mut last: HashMap<usize, usize> = HashMap::new();
    for &(p, seq) in log.iter() {
        if let Some(&prev) = last.get(&p) {
            assert!(seq > prev, "producer {p} ran {seq} after {prev}");
        }
        last.insert(p, seq);
    }
}

#[test]
fn test_pool_shutdown_drains_queue() {
    let count = Arc::new(AtomicUsize::new(0));
    let mut pool = WorkerPool::new(1).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let gate = Arc::new(Barrier::new(2));

    let g = Arc::clone(&gate);
    pool.add_task(move || {
        started_tx.send(()).unwrap();
        g.wait();
    })
    .unwrap();
    started_rx.recv().unwrap();
    for _ in 0..10 {
        let count = Arc::clone(&count);
        pool.add_task(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    gate.wait();
    pool.shutdown();
    assert_eq!(count.load(Ordering::SeqCst), 10);
    assert_eq!(pool.add_task(|| {}), Err(SubmitError::Closed));
}

#[test]
fn test_pool_rejects_when_queue_full() {
    let pool = WorkerPool::with_queue_capacity(1, 2).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let gate = Arc::new(Barrier::new(2));

    let g = Arc::clone(&gate);
    pool.add_task(move || {
        started_tx.send(()).unwrap();
        g.wait();
    })
    .unwrap();
    started_rx.recv().unwrap();

    pool.add_task(|| {}).unwrap();
    pool.add_task(|| {}).unwrap();
    assert_eq!(pool.add_task(|| {}), Err(SubmitError::QueueFull(2)));
    assert_eq!(pool.queued(), 2);

    gate.wait();
}

#[test]
fn test_pool_survives_panicking_task() {
    let mut pool = WorkerPool::new(1).unwrap();
    let (tx, rx) = mpsc::channel();

    pool.add_task(|| panic!("task failure")).unwrap();
    pool.add_task(move || tx.send(42).unwrap()).unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    pool.shutdown();
    assert_eq!(pool.threads(), 0);
}
