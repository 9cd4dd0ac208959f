use parking_lot::{Condvar, Mutex};

/// One-shot gate: closed while persisted managers are loaded, then opened for good.
#[derive(Debug, Default)]
pub struct InitGate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl InitGate {
    /// Blocks until the gate is open.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    pub fn open(&self) {
        let mut open = self.open.lock();
        if !*open {
            *open = true;
            self.opened.notify_all();
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_waiters_block_until_open() {
        let gate = Arc::new(InitGate::default());
        let passed = Arc::new(AtomicBool::new(false));

        let waiter = {
            let gate = gate.clone();
            let passed = passed.clone();
            thread::spawn(move || {
                gate.wait();
                passed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!passed.load(Ordering::SeqCst));
        assert!(!gate.is_open());

        gate.open();
        waiter.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_open_gate_does_not_block() {
        let gate = InitGate::default();
        gate.open();
        gate.open();
        gate.wait();
        assert!(gate.is_open());
    }
}
