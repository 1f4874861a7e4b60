//! A fan-in barrier over `Lazy` futures.
//!
//! A `Join` counts the futures it watches that are not yet ready. Continuations queued with
//! `run` fire once that count reaches zero, in the order they were queued. A continuation queued
//! while nothing is outstanding runs immediately.
//!
//! If a watched future fails, the barrier fails with it: queued and later continuations are
//! discarded, and `on_fail` callbacks run instead.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use tracing::trace;

use crate::lazy::Lazy;

type Job = Box<dyn FnOnce()>;

#[derive(Default)]
struct JoinInner {
    outstanding: usize,
    failed: bool,
    jobs: Vec<Job>,
    fail_jobs: Vec<Job>,
}

/// A barrier that runs continuations once every watched future is ready.
///
/// Cloning a `Join` yields another handle to the same barrier.
///
/// # Examples
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// use lazyco::{Join, Lazy};
///
/// let a: Lazy<i32> = Lazy::new();
/// let b: Lazy<i32> = Lazy::new();
/// let fired = Rc::new(Cell::new(false));
///
/// let flag = fired.clone();
/// Join::new().watch(&a).watch(&b).run(move || flag.set(true));
///
/// a.resolve(1);
/// assert!(!fired.get());
/// b.resolve(2);
/// assert!(fired.get());
/// ```
#[derive(Clone, Default)]
pub struct Join {
    inner: Rc<RefCell<JoinInner>>,
}

impl Join {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a barrier watching every future in `lazies`.
    pub fn all<'a, T, I>(lazies: I) -> Self where
    T: Clone + 'static,
    I: IntoIterator<Item = &'a Lazy<T>> {
        let join = Join::new();
        for lazy in lazies {
            join.watch(lazy);
        }
        join
    }

    /// Adds a future to the set this barrier waits for.
    ///
    /// Watching a future that is already ready is a no-op as far as continuations are concerned,
    /// but it does fire continuations queued earlier if nothing else is outstanding.
    pub fn watch<T: Clone + 'static>(&self, lazy: &Lazy<T>) -> &Self {
        self.inner.borrow_mut().outstanding += 1;

        let on_ready = self.clone();
        lazy.on_ready(move |_| on_ready.one_ready());
        let on_fail = self.clone();
        lazy.on_fail(move || on_fail.one_failed());

        self
    }

    /// Queues a continuation, or runs it now if no watched future is outstanding.
    ///
    /// Each continuation runs at most once. On a failed barrier it never runs.
    pub fn run<F: FnOnce() + 'static>(&self, job: F) -> &Self {
        {
            // Critical section: enqueue or fall through to run.
            let mut inner = self.inner.borrow_mut();
            if inner.failed {
                trace!("join failed, continuation discarded");
                return self;
            }
            if inner.outstanding > 0 {
                inner.jobs.push(Box::new(job));
                return self;
            }
        }

        job();
        self
    }

    /// Registers a callback that runs if any watched future fails.
    ///
    /// Runs immediately if the barrier has already failed.
    pub fn on_fail<F: FnOnce() + 'static>(&self, f: F) -> &Self {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.failed {
                inner.fail_jobs.push(Box::new(f));
                return self;
            }
        }

        f();
        self
    }

    /// Returns a future that becomes ready when this barrier fires, or fails when it fails.
    pub fn done(&self) -> Lazy<()> {
        let done = Lazy::new();

        let on_ready = done.clone();
        self.run(move || on_ready.resolve(()));
        let on_fail = done.clone();
        // The barrier may fail after it already fired for this future; that failure is not ours.
        self.on_fail(move || {
            let _ = on_fail.try_fail();
        });

        done
    }

    /// The number of watched futures that are not yet ready.
    pub fn outstanding(&self) -> usize {
        self.inner.borrow().outstanding
    }

    pub fn is_failed(&self) -> bool {
        self.inner.borrow().failed
    }

    fn one_ready(&self) {
        let jobs = {
            // Critical section: decrement, and take the queue if this was the last one.
            let mut inner = self.inner.borrow_mut();
            inner.outstanding -= 1;
            if inner.outstanding > 0 || inner.failed {
                return;
            }
            mem::take(&mut inner.jobs)
        };

        trace!(continuations = jobs.len(), "join complete");
        for job in jobs {
            job();
        }
    }

    fn one_failed(&self) {
        let (fail_jobs, discarded) = {
            let mut inner = self.inner.borrow_mut();
            inner.outstanding -= 1;
            if inner.failed {
                return;
            }
            inner.failed = true;
            (mem::take(&mut inner.fail_jobs), mem::take(&mut inner.jobs))
        };
        drop(discarded);

        trace!(callbacks = fail_jobs.len(), "join failed");
        for job in fail_jobs {
            job();
        }
    }
}

impl fmt::Debug for Join {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Join")
            .field("outstanding", &inner.outstanding)
            .field("queued", &inner.jobs.len())
            .field("failed", &inner.failed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;

    use super::Join;
    use crate::lazy::Lazy;
    use crate::testlib::*;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() -> Box<dyn FnOnce()>) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, move || {
            let c = c.clone();
            Box::new(move || c.set(c.get() + 1)) as Box<dyn FnOnce()>
        })
    }

    #[test]
    fn empty_join_runs_immediately() {
        init_test_logging();
        let (count, job) = counter();
        let join = Join::new();
        join.run(job());
        assert_eq!(count.get(), 1);
        join.run(job());
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn runs_once_after_last() {
        let lazies: Vec<Lazy<i32>> = (0..4).map(|_| Lazy::new()).collect();
        let join = Join::all(&lazies);
        let (count, job) = counter();
        join.run(job());
        assert_eq!(join.outstanding(), 4);

        for (i, lazy) in lazies.iter().enumerate() {
            assert_eq!(count.get(), 0, "fired before future {}", i);
            lazy.resolve(i as i32);
        }
        assert_eq!(count.get(), 1);
        assert_eq!(join.outstanding(), 0);
    }

    #[test]
    fn shuffled_resolution() {
        let mut rng = StdRng::seed_from_u64(0xB4_221E5);
        for n in 1..16 {
            let lazies: Vec<Lazy<usize>> = (0..n).map(|_| Lazy::new()).collect();
            let join = Join::all(lazies.iter());
            let (count, job) = counter();
            join.run(job());

            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rng);
            for (step, &i) in order.iter().enumerate() {
                assert_eq!(count.get(), 0, "n = {}, step = {}", n, step);
                lazies[i].resolve(i);
            }
            assert_eq!(count.get(), 1);
        }
    }

    #[test]
    fn continuations_run_in_queue_order() {
        let a: Lazy<i32> = Lazy::new();
        let join = Join::new();
        join.watch(&a);

        let log = Recorder::new();
        for i in 0..3 {
            let log = log.clone();
            join.run(move || log.push(format!("job {}", i)));
        }
        assert!(log.is_empty());

        a.resolve(0);
        assert_eq!(log.take(), vec!["job 0", "job 1", "job 2"]);
    }

    #[test]
    fn already_ready_futures() {
        let join = Join::new();
        join.watch(&Lazy::ready(1)).watch(&Lazy::ready(2));
        assert_eq!(join.outstanding(), 0);

        let (count, job) = counter();
        join.run(job());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn rearmed_join_does_not_rerun() {
        let a: Lazy<i32> = Lazy::new();
        let b: Lazy<i32> = Lazy::new();
        let join = Join::new();
        let (first, job) = counter();

        join.watch(&a).run(job());
        a.resolve(1);
        assert_eq!(first.get(), 1);

        let (second, job) = counter();
        join.watch(&b).run(job());
        b.resolve(2);
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 1);
    }

    #[test]
    fn continuation_may_use_the_join() {
        let a: Lazy<i32> = Lazy::new();
        let join = Join::new();
        join.watch(&a);

        let log = Recorder::new();
        {
            let join2 = join.clone();
            let log = log.clone();
            join.run(move || {
                log.push("first");
                let log = log.clone();
                // Nothing is outstanding while firing, so this runs at once.
                join2.run(move || log.push("nested"));
            });
        }
        {
            let log = log.clone();
            join.run(move || log.push("second"));
        }

        a.resolve(1);
        assert_eq!(log.take(), vec!["first", "nested", "second"]);
    }

    #[test]
    fn failure_discards_continuations() {
        let a: Lazy<i32> = Lazy::new();
        let b: Lazy<i32> = Lazy::new();
        let join = Join::all(vec![&a, &b]);
        let (ran, job) = counter();
        let (failed, fail_job) = counter();

        join.run(job());
        join.on_fail(fail_job());
        a.fail();
        assert!(join.is_failed());
        assert_eq!(failed.get(), 1);

        b.resolve(2);
        join.run(job());
        assert_eq!(ran.get(), 0);

        // Late fail callbacks run at once.
        join.on_fail(fail_job());
        assert_eq!(failed.get(), 2);
    }

    #[test]
    fn done_future() {
        let a: Lazy<i32> = Lazy::new();
        let join = Join::new();
        join.watch(&a);
        let done = join.done();
        assert!(done.is_pending());

        a.resolve(1);
        assert!(done.is_ready());
        assert!(Join::new().done().is_ready());
    }

    #[test]
    fn done_future_fails() {
        let a: Lazy<i32> = Lazy::new();
        let join = Join::new();
        join.watch(&a);
        let done = join.done();

        a.fail();
        assert!(done.is_failed());
        assert!(join.done().is_failed());
    }

    #[test]
    fn debug_format() {
        let a: Lazy<i32> = Lazy::new();
        let join = Join::new();
        join.watch(&a).run(|| {});
        assert_eq!(format!("{:?}", join), "Join { outstanding: 1, queued: 1, failed: false }");
    }
}
