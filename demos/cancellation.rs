//! Cancelling a blocked acquire from another thread

use respool::{cancellation, CancelToken, Pool};
use std::thread;
use std::time::Duration;

fn main() {
    cancel_blocked_wait();
    cancel_during_create();
}

fn cancel_blocked_wait() {
    println!("1. Cancelling a blocked wait:");
    let pool = Pool::<usize, &str>::new(|| Ok(1), |_| Ok(()));
    pool.set_max_size(1);
    let held = pool.get(&CancelToken::never()).unwrap();

    let (canceller, token) = cancellation();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.get(&token))
    };

    thread::sleep(Duration::from_millis(50));
    canceller.cancel();

    match waiter.join().unwrap() {
        Err(err) => println!("   waiter failed with: {err}"),
        Ok(_) => println!("   waiter unexpectedly got a resource"),
    }
    pool.put(held);
    println!();
}

fn cancel_during_create() {
    println!("2. Cancellation racing a slow create:");
    let (canceller, token) = cancellation();
    let cancel_in_create = canceller.clone();
    let pool = Pool::<usize, &str>::new(
        move || {
            cancel_in_create.cancel();
            thread::sleep(Duration::from_millis(50));
            Ok(41)
        },
        |_| Ok(()),
    );

    match pool.get(&token) {
        Err(err) => println!("   get failed with: {err}"),
        Ok(_) => println!("   get unexpectedly succeeded"),
    }

    // The resource finished creating anyway and was kept by the pool.
    let res = pool.get(&CancelToken::never()).unwrap();
    println!("   donated resource retrieved: {}", *res);
}
