//! Basic usage of the resource pool

use respool::{CancelToken, Pool, PoolConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    simple_pool();
    bounded_pool();
    shutdown();
}

fn simple_pool() {
    println!("1. Simple pool:");
    let next_id = Arc::new(AtomicUsize::new(0));
    let pool = Pool::<usize, &str>::new(
        move || Ok(next_id.fetch_add(1, Ordering::Relaxed) + 1),
        |_| Ok(()),
    );

    let res = pool.get(&CancelToken::never()).unwrap();
    println!("   got resource {}", *res);
    pool.put(res);

    println!("   idle after return: {}\n", pool.idle_count());
}

fn bounded_pool() {
    println!("2. Bounded pool, four workers sharing two resources:");
    let pool: Pool<String, &str> = Pool::with_config(
        || Ok(String::from("connection")),
        |_| Ok(()),
        PoolConfig::new().with_max_size(2),
    );

    let mut workers = Vec::new();
    for i in 0..4 {
        let pool = pool.clone();
        workers.push(thread::spawn(move || {
            let res = pool.get(&CancelToken::never()).unwrap();
            println!("   worker {i} got a {}", *res);
            thread::sleep(Duration::from_millis(20));
            pool.put(res);
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    println!("   resources allocated: {}\n", pool.size());
}

fn shutdown() {
    println!("3. Shutdown:");
    let pool = Pool::<usize, &str>::new(
        || Ok(7),
        |res| {
            println!("   destroying resource {res}");
            Ok(())
        },
    );

    let res = pool.get(&CancelToken::never()).unwrap();
    pool.put(res);
    pool.close();

    println!("   closed: {}", pool.is_closed());
}
