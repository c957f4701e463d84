//! Lazy sequencing combinator for multi-step store operations.
//!
//! Every store operation that spans more than one backend request is built as
//! a chain of deferred steps: `then` sequences dependent steps, `join` fans
//! out over independent ones (e.g. fetching every child of a directory) and
//! collects their results in positional order. Nothing executes until the
//! chain is run, and because the backend services requests in issuance order
//! within one transaction, running a chain inside a transaction preserves the
//! intended read-before-write ordering.

/// A deferred fallible computation. Inert until [`Task::run`] or
/// [`Task::done`] is called.
pub struct Task<'a, T, E> {
    op: Box<dyn FnOnce() -> Result<T, E> + 'a>,
}

impl<'a, T: 'a, E: 'a> Task<'a, T, E> {
    /// Wrap a single deferred operation.
    pub fn new<F>(op: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + 'a,
    {
        Task { op: Box::new(op) }
    }

    /// A no-op task that immediately continues with `value`.
    pub fn ready(value: T) -> Self {
        Task::new(move || Ok(value))
    }

    /// A task that immediately fails with `err`.
    pub fn fail(err: E) -> Self {
        Task::new(move || Err(err))
    }

    /// Fan out over independent tasks, collecting each result indexed by its
    /// position in `tasks`. Fails fast on the first error. An empty set
    /// continues immediately with no results.
    pub fn join(tasks: Vec<Task<'a, T, E>>) -> Task<'a, Vec<T>, E> {
        Task::new(move || {
            let mut results = Vec::with_capacity(tasks.len());
            for task in tasks {
                results.push(task.run()?);
            }
            Ok(results)
        })
    }

    /// Chain a dependent step. The factory receives this task's result and
    /// returns the next task, whose shape may vary per result.
    pub fn then<U, F>(self, next: F) -> Task<'a, U, E>
    where
        U: 'a,
        F: FnOnce(T) -> Task<'a, U, E> + 'a,
    {
        Task::new(move || {
            let value = self.run()?;
            next(value).run()
        })
    }

    /// Transform this task's result without adding a deferred step.
    pub fn map<U, F>(self, f: F) -> Task<'a, U, E>
    where
        U: 'a,
        F: FnOnce(T) -> U + 'a,
    {
        self.then(move |value| Task::ready(f(value)))
    }

    /// Execute the chain and return its result. Triggers execution; nothing
    /// runs before this.
    pub fn run(self) -> Result<T, E> {
        (self.op)()
    }

    /// Execute the chain, delivering the outcome to a terminal receiver.
    pub fn done<F>(self, sink: F)
    where
        F: FnOnce(Result<T, E>),
    {
        sink(self.run());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_task_is_inert_until_run() {
        let executed = Cell::new(false);
        let task: Task<'_, (), ()> = Task::new(|| {
            executed.set(true);
            Ok(())
        });
        assert!(!executed.get());
        task.run().unwrap();
        assert!(executed.get());
    }

    #[test]
    fn test_then_chains_dependent_steps_in_order() {
        let trace = Cell::new(0u32);
        let result: Result<u32, ()> = Task::new(|| {
            trace.set(trace.get() * 10 + 1);
            Ok(2u32)
        })
        .then(|doubled| {
            trace.set(trace.get() * 10 + 2);
            Task::ready(doubled * 3)
        })
        .run();
        assert_eq!(result.unwrap(), 6);
        assert_eq!(trace.get(), 12);
    }

    #[test]
    fn test_join_collects_results_in_positional_order() {
        let tasks: Vec<Task<'_, u32, ()>> =
            (0..5).map(|i| Task::new(move || Ok(i * i))).collect();
        let results = Task::join(tasks).run().unwrap();
        assert_eq!(results, vec![0, 1, 4, 9, 16]);
    }

    #[test]
    fn test_join_of_empty_set_continues_immediately() {
        let results = Task::<u32, ()>::join(vec![]).run().unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_join_fails_fast_on_first_error() {
        let reached = Cell::new(false);
        let tasks: Vec<Task<'_, u32, &str>> = vec![
            Task::ready(1),
            Task::fail("boom"),
            Task::new(|| {
                reached.set(true);
                Ok(3)
            }),
        ];
        assert_eq!(Task::join(tasks).run(), Err("boom"));
        assert!(!reached.get());
    }

    #[test]
    fn test_error_short_circuits_later_steps() {
        let reached = Cell::new(false);
        let result: Result<u32, &str> = Task::fail("early")
            .then(|value: u32| {
                reached.set(true);
                Task::ready(value)
            })
            .run();
        assert_eq!(result, Err("early"));
        assert!(!reached.get());
    }

    #[test]
    fn test_done_delivers_outcome_to_terminal_receiver() {
        let delivered = Cell::new(None);
        Task::<u32, ()>::ready(7).done(|outcome| delivered.set(outcome.ok()));
        assert_eq!(delivered.get(), Some(7));
    }

    #[test]
    fn test_map_transforms_result() {
        let result: Result<String, ()> = Task::ready(21u32).map(|n| format!("{}", n * 2)).run();
        assert_eq!(result.unwrap(), "42");
    }
}
