// Work queue behind ThreadPoolExecutor
// Always accessed under the pool's state mutex

use crate::thread_pool::Task;
use dynpool_core::domain::{QueueCapacity, QueueType};
use dynpool_core::port::ExecutorError;
use std::collections::VecDeque;

pub(crate) struct TaskQueue {
    kind: QueueType,
    capacity: QueueCapacity,
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    /// Synchronous queues never buffer, whatever capacity is passed
    pub(crate) fn new(kind: QueueType, capacity: QueueCapacity) -> Self {
        let capacity = match kind {
            QueueType::Synchronous => QueueCapacity::Bounded(0),
            _ => capacity,
        };
        Self {
            kind,
            capacity,
            tasks: VecDeque::new(),
        }
    }

    /// Enqueue if there is room, otherwise hand the task back
    ///
    /// A synchronous queue only accepts a task that an idle worker is
    /// already waiting to take.
    pub(crate) fn offer(&mut self, task: Task, idle_workers: usize) -> Result<(), Task> {
        let room = match self.kind {
            QueueType::Synchronous => self.tasks.len() < idle_workers,
            QueueType::Array | QueueType::Linked | QueueType::ResizableLinked => {
                self.capacity.has_room(self.tasks.len())
            }
        };
        if !room {
            return Err(task);
        }
        self.tasks.push_back(task);
        Ok(())
    }

    pub(crate) fn poll(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Take back the most recently offered task
    pub(crate) fn take_newest(&mut self) -> Option<Task> {
        self.tasks.pop_back()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn capacity(&self) -> QueueCapacity {
        self.capacity
    }

    pub(crate) fn remaining(&self) -> Option<u64> {
        self.capacity.remaining(self.tasks.len())
    }

    /// Change capacity in place
    ///
    /// Shrinking below the current length keeps every queued task; offers
    /// are refused until the queue drains below the new bound.
    pub(crate) fn set_capacity(&mut self, capacity: QueueCapacity) -> Result<(), ExecutorError> {
        if !self.kind.supports_resize() {
            return Err(ExecutorError::QueueNotResizable(self.kind));
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Remove every queued task (used by `shutdown_now`)
    pub(crate) fn drain(&mut self) -> Vec<Task> {
        self.tasks.drain(..).collect()
    }
}
