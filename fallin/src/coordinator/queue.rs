//! FIFO of pending tasks

use std::collections::VecDeque;

use crate::protocol::Task;

/// Pending tasks; recovered work is re-inserted at the front
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    /// Re-insert a task ahead of everything else
    pub fn push_front(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    pub fn pop_front(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Drop everything; returns how many tasks were removed
    pub fn clear(&mut self) -> usize {
        let count = self.tasks.len();
        self.tasks.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}

impl Extend<Task> for TaskQueue {
    fn extend<I: IntoIterator<Item = Task>>(&mut self, iter: I) {
        self.tasks.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::with_id(id, vec![])
    }

    #[test]
    fn test_fifo_with_front_reinsertion() {
        let mut queue = TaskQueue::new();
        queue.extend([task("a"), task("b")]);
        queue.push_back(task("c"));

        assert_eq!(queue.pop_front().unwrap().id, "a");
        queue.push_front(task("a"));

        let order: Vec<_> = queue.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_clear_reports_count() {
        let mut queue = TaskQueue::new();
        queue.extend([task("a"), task("b")]);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.pop_front().is_none());
    }
}
