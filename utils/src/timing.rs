mod delayed_task_scheduler;

pub use self::delayed_task_scheduler::*;
