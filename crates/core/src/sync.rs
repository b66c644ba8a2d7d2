use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every structure guarded this way is left consistent between statements,
/// so continuing with the inner value is safe.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once shutdown is requested or the signal's sender is gone.
///
/// Meant for `tokio::select!` arms in background loops.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn poisoned_lock_is_recovered() {
        let mutex = std::sync::Arc::new(Mutex::new(1));
        let m = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = m.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        *lock(&mutex) += 1;
        assert_eq!(*lock(&mutex), 2);
    }

    #[tokio::test]
    async fn resolves_on_signal_or_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        let pending = tokio::time::timeout(Duration::from_millis(20), shutdown_requested(&mut rx)).await;
        assert!(pending.is_err());

        tx.send(true).unwrap();
        shutdown_requested(&mut rx).await;

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        shutdown_requested(&mut rx).await;
    }
}
