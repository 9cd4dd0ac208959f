//! At-most-one action in control of a backup.
//!
//! The holder lives in a single atomic slot. Taking the lock is one
//! compare-and-swap from empty, so racing lockers never wait: exactly one
//! wins and the rest fail immediately. Reading the holder is one load.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::models::action::Action;

#[derive(Debug, Default)]
pub struct ActionLock {
    holder: ArcSwapOption<Action>,
}

impl ActionLock {
    /// Takes the lock for `action` iff nobody holds it.
    pub fn try_lock(&self, action: &Arc<Action>) -> bool {
        let previous = self
            .holder
            .compare_and_swap(&None::<Arc<Action>>, Some(action.clone()));
        previous.is_none()
    }

    /// Releases the lock iff this very `action` instance holds it.
    pub fn unlock(&self, action: &Action) {
        let _ = self
            .holder
            .compare_and_swap(action as *const Action, None::<Arc<Action>>);
    }

    pub fn is_locked(&self) -> bool {
        self.holder.load().is_some()
    }

    pub fn current(&self) -> Option<Arc<Action>> {
        self.holder.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::ActionType;
    use std::sync::Barrier;
    use std::thread;

    fn action(id: &str) -> Arc<Action> {
        Arc::new(Action::new(id, "DEFAULT", ActionType::CreateBackup, None))
    }

    #[test]
    fn test_second_locker_fails() {
        let lock = ActionLock::default();
        let a = action("1");
        let b = action("2");

        assert!(lock.try_lock(&a));
        assert!(!lock.try_lock(&b));
        assert_eq!(lock.current().unwrap().id(), "1");
    }

    #[test]
    fn test_only_holder_unlocks() {
        let lock = ActionLock::default();
        let a = action("1");
        let b = action("2");

        assert!(lock.try_lock(&a));
        lock.unlock(&b);
        assert!(lock.is_locked());
        assert_eq!(lock.current().unwrap().id(), "1");

        lock.unlock(&a);
        assert!(lock.current().is_none());
        assert!(lock.try_lock(&b));
        assert_eq!(lock.current().unwrap().id(), "2");
    }

    #[test]
    fn test_equal_but_distinct_action_cannot_unlock() {
        let lock = ActionLock::default();
        let a = action("1");
        let twin = action("1");

        assert!(lock.try_lock(&a));
        lock.unlock(&twin);
        assert!(lock.is_locked());
    }

    #[test]
    fn test_exactly_one_concurrent_locker_wins() {
        const THREADS: usize = 16;

        for _ in 0..20 {
            let lock = Arc::new(ActionLock::default());
            let barrier = Arc::new(Barrier::new(THREADS));
            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let lock = lock.clone();
                    let barrier = barrier.clone();
                    let action = action(&i.to_string());
                    thread::spawn(move || {
                        barrier.wait();
                        lock.try_lock(&action).then(|| action.id().to_string())
                    })
                })
                .collect();

            let winners: Vec<String> = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect();

            assert_eq!(winners.len(), 1);
            assert_eq!(lock.current().unwrap().id(), winners[0]);
        }
    }

    #[test]
    fn test_winner_is_visible_as_soon_as_it_wins() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 2_000;

        let lock = Arc::new(ActionLock::default());
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let lock = lock.clone();
                let barrier = barrier.clone();
                let action = action(&i.to_string());
                thread::spawn(move || {
                    barrier.wait();
                    let mut wins = 0;
                    for _ in 0..ROUNDS {
                        if lock.try_lock(&action) {
                            let holder = lock.current().unwrap();
                            assert!(Arc::ptr_eq(&holder, &action));
                            lock.unlock(&action);
                            wins += 1;
                        }
                    }
                    wins
                })
            })
            .collect();

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(wins > 0);
        assert!(lock.current().is_none());
        assert!(!lock.is_locked());
    }
}
