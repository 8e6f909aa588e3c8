use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Identifies one submitted task. Cancelling an id that has already fired
/// or been cancelled is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

// ----- LoopScheduler

struct LoopEntry<T> {
    when: Instant,
    id: TaskId,
    token: T,
}

/// Single-threaded delayed-task queue, driven from the network thread's
/// poll loop. Rather than storing closures, it stores caller-defined
/// tokens which `run` hands back when due; the owner dispatches on them.
pub struct LoopScheduler<T> {
    queue: Vec<LoopEntry<T>>,
    next_id: u64,
}

impl<T> Default for LoopScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LoopScheduler<T> {
    pub fn new() -> Self {
        LoopScheduler {
            queue: Vec::new(),
            next_id: 1,
        }
    }

    pub fn submit(&mut self, delay: Duration, token: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        let when = Instant::now() + delay;
        let pos = self.queue.partition_point(|e| e.when <= when);
        self.queue.insert(pos, LoopEntry { when, id, token });
        id
    }

    pub fn cancel(&mut self, id: TaskId) {
        self.queue.retain(|e| e.id != id);
    }

    /// Atomic remove-and-reinsert with a fresh deadline.
    pub fn update(&mut self, id: TaskId, delay: Duration) -> Option<TaskId>
    where
        T: Clone,
    {
        let pos = self.queue.iter().position(|e| e.id == id)?;
        let token = self.queue.remove(pos).token;
        Some(self.submit(delay, token))
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.queue.iter().any(|e| e.id == id)
    }

    /// Milliseconds until the next due task, or `default` when idle.
    pub fn timeout(&self, default: Duration) -> Duration {
        match self.queue.first() {
            Some(entry) => entry.when.saturating_duration_since(Instant::now()),
            None => default,
        }
    }

    /// Pops and returns every task whose deadline has passed.
    pub fn run(&mut self) -> Vec<T> {
        let now = Instant::now();
        let mut due = Vec::new();
        while let Some(first) = self.queue.first() {
            if first.when > now {
                break;
            }
            due.push(self.queue.remove(0).token);
        }
        due
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

// ----- ThreadScheduler

type TaskFunc = Box<dyn FnOnce() + Send + 'static>;

struct ThreadEntry {
    when: Instant,
    id: TaskId,
    func: TaskFunc,
}

#[derive(Default)]
struct ThreadState {
    queue: VecDeque<ThreadEntry>,
    executing: Option<TaskId>,
    next_id: u64,
    quit: bool,
}

struct ThreadShared {
    state: Mutex<ThreadState>,
    condvar: Condvar,
}

/// A delayed-task queue backed by a dedicated worker thread. `cancel`
/// blocks while the task is mid-execution; `update` atomically reschedules.
pub struct ThreadScheduler {
    shared: Arc<ThreadShared>,
    worker: Option<thread::JoinHandle<()>>,
}

/// Handle to a task submitted to a ThreadScheduler.
#[derive(Clone)]
pub struct ThreadTask {
    id: TaskId,
    shared: Weak<ThreadShared>,
}

impl ThreadTask {
    /// Removes the task if still queued. If the worker is executing this
    /// task right now, waits for it to finish first. Idempotent.
    pub fn cancel(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock().unwrap();
        if let Some(pos) = state.queue.iter().position(|e| e.id == self.id) {
            state.queue.remove(pos);
            return;
        }
        while state.executing == Some(self.id) && !state.quit {
            state = shared.condvar.wait(state).unwrap();
        }
    }
}

impl ThreadScheduler {
    pub fn new(name: &str) -> Self {
        let shared = Arc::new(ThreadShared {
            state: Mutex::new(ThreadState {
                next_id: 1,
                ..Default::default()
            }),
            condvar: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || Self::worker_func(worker_shared))
            .expect("failed to spawn scheduler thread");

        ThreadScheduler {
            shared,
            worker: Some(worker),
        }
    }

    pub fn submit<F>(&self, delay: Duration, func: F) -> ThreadTask
    where
        F: FnOnce() + Send + 'static,
    {
        let when = Instant::now() + delay;
        let mut state = self.shared.state.lock().unwrap();
        let id = TaskId(state.next_id);
        state.next_id += 1;

        let pos = state.queue.partition_point(|e| e.when <= when);
        state.queue.insert(
            pos,
            ThreadEntry {
                when,
                id,
                func: Box::new(func),
            },
        );
        drop(state);
        self.shared.condvar.notify_all();

        ThreadTask {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Reschedules a queued task to a new deadline, returning the handle
    /// of the replacement. A task that already fired is not revived.
    pub fn update(&self, task: &ThreadTask, delay: Duration) -> Option<ThreadTask> {
        let when = Instant::now() + delay;
        let mut state = self.shared.state.lock().unwrap();
        let pos = state.queue.iter().position(|e| e.id == task.id)?;
        let mut entry = state.queue.remove(pos).unwrap();

        let id = TaskId(state.next_id);
        state.next_id += 1;
        entry.when = when;
        entry.id = id;
        let pos = state.queue.partition_point(|e| e.when <= when);
        state.queue.insert(pos, entry);
        drop(state);
        self.shared.condvar.notify_all();

        Some(ThreadTask {
            id,
            shared: Arc::downgrade(&self.shared),
        })
    }

    fn worker_func(shared: Arc<ThreadShared>) {
        let mut state = shared.state.lock().unwrap();
        loop {
            if state.quit {
                break;
            }

            let now = Instant::now();
            let next_due = state.queue.front().map(|e| e.when);
            match next_due {
                Some(when) if when <= now => {
                    let entry = state.queue.pop_front().unwrap();
                    state.executing = Some(entry.id);
                    drop(state);

                    (entry.func)();

                    state = shared.state.lock().unwrap();
                    state.executing = None;
                    shared.condvar.notify_all();
                }
                Some(when) => {
                    let (guard, _) = shared
                        .condvar
                        .wait_timeout(state, when.saturating_duration_since(now))
                        .unwrap();
                    state = guard;
                }
                None => {
                    let (guard, _) = shared
                        .condvar
                        .wait_timeout(state, Duration::from_secs(60))
                        .unwrap();
                    state = guard;
                }
            }
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        // Destroying a scheduler from its own worker thread would
        // self-join; that is a caller bug.
        debug_assert!(thread::current().id() != worker.thread().id());
        if thread::current().id() == worker.thread().id() {
            log::error!("ThreadScheduler dropped from its own worker thread");
            return;
        }

        {
            let mut state = self.shared.state.lock().unwrap();
            state.quit = true;
            state.queue.clear();
        }
        self.shared.condvar.notify_all();
        let _ = worker.join();
    }
}

// ----- ScopedScheduler

/// Wraps a ThreadScheduler and cancels every task submitted through it
/// when dropped.
pub struct ScopedScheduler {
    scheduler: Arc<ThreadScheduler>,
    submitted: Mutex<Vec<ThreadTask>>,
}

impl ScopedScheduler {
    pub fn new(scheduler: Arc<ThreadScheduler>) -> Self {
        ScopedScheduler {
            scheduler,
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn submit<F>(&self, delay: Duration, func: F) -> ThreadTask
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.scheduler.submit(delay, func);
        self.submitted.lock().unwrap().push(task.clone());
        task
    }

    pub fn scheduler(&self) -> &Arc<ThreadScheduler> {
        &self.scheduler
    }
}

impl Drop for ScopedScheduler {
    fn drop(&mut self) {
        let submitted = std::mem::take(&mut *self.submitted.lock().unwrap());
        for task in submitted {
            task.cancel();
        }
    }
}

#[cfg(test)]
mod scheduler_test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_loop_scheduler_ordering() {
        let mut scheduler = LoopScheduler::new();
        scheduler.submit(Duration::from_millis(0), "b");
        scheduler.submit(Duration::from_millis(0), "c");
        scheduler.submit(Duration::from_millis(500), "later");

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(scheduler.run(), vec!["b", "c"]);
        assert!(scheduler.run().is_empty());
        assert!(scheduler.timeout(Duration::from_secs(1)) <= Duration::from_millis(500));
    }

    #[test]
    fn test_loop_scheduler_cancel_is_idempotent() {
        let mut scheduler = LoopScheduler::new();
        let id = scheduler.submit(Duration::from_millis(0), 1u32);
        scheduler.cancel(id);
        scheduler.cancel(id);
        std::thread::sleep(Duration::from_millis(2));
        assert!(scheduler.run().is_empty());
    }

    #[test]
    fn test_loop_scheduler_update_moves_deadline() {
        let mut scheduler = LoopScheduler::new();
        let id = scheduler.submit(Duration::from_millis(0), 7u32);
        let id2 = scheduler.update(id, Duration::from_secs(60)).unwrap();
        assert!(!scheduler.is_scheduled(id));
        assert!(scheduler.is_scheduled(id2));
        std::thread::sleep(Duration::from_millis(2));
        assert!(scheduler.run().is_empty());
    }

    #[test]
    fn test_loop_scheduler_timeout_default_when_idle() {
        let scheduler: LoopScheduler<u32> = LoopScheduler::new();
        assert_eq!(
            scheduler.timeout(Duration::from_millis(1000)),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_thread_scheduler_runs_tasks() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let scheduler = ThreadScheduler::new("test-sched");
        scheduler.submit(Duration::from_millis(1), || {
            COUNTER.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.submit(Duration::from_millis(2), || {
            COUNTER.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(COUNTER.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_thread_scheduler_cancel() {
        let ran = Arc::new(AtomicUsize::new(0));
        let scheduler = ThreadScheduler::new("test-sched");
        let ran2 = ran.clone();
        let task = scheduler.submit(Duration::from_millis(200), move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();
        task.cancel();

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_scoped_scheduler_cancels_on_drop() {
        let ran = Arc::new(AtomicUsize::new(0));
        let scheduler = Arc::new(ThreadScheduler::new("test-sched"));
        {
            let scoped = ScopedScheduler::new(scheduler.clone());
            let ran2 = ran.clone();
            scoped.submit(Duration::from_millis(200), move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            });
        }
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
