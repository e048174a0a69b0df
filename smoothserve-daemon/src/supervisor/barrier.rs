use tokio::sync::oneshot;

/// Counts down the exits a full stop is waiting for.
///
/// Arrivals past zero are absorbed, so a stray exit report cannot
/// underflow the count.
#[derive(Debug)]
pub struct StopBarrier {
    remaining: usize,
    waiters: Vec<oneshot::Sender<()>>,
}

impl StopBarrier {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: count,
            waiters: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Register interest in completion
    pub fn wait(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.remaining == 0 {
            let _ = tx.send(());
        } else {
            self.waiters.push(tx);
        }
        rx
    }

    /// Record one exit. Returns true once the count has reached zero.
    pub fn arrive(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(());
            }
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_after_all_arrivals() {
        let mut barrier = StopBarrier::new(2);
        let mut rx = barrier.wait();

        assert!(!barrier.arrive());
        assert!(rx.try_recv().is_err());
        assert!(barrier.arrive());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn extra_arrivals_are_absorbed() {
        let mut barrier = StopBarrier::new(1);
        assert!(barrier.arrive());
        assert!(barrier.arrive());
        assert_eq!(barrier.remaining(), 0);
    }

    #[test]
    fn empty_barrier_is_already_complete() {
        let mut barrier = StopBarrier::new(0);
        assert!(barrier.wait().try_recv().is_ok());
    }
}
