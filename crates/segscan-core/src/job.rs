//! 单个作业：回调 + 参数 + “仅调度一次”标志
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// 绑定参数后的回调，只执行一次
pub(crate) type Task = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// 作业编号（按加入顺序递增，从 0 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 作业组内部的作业记录，生命周期归作业组所有
pub(crate) struct Job {
    pub(crate) id: JobId,
    scheduled: AtomicBool,
    task: Mutex<Option<Task>>,
}

impl Job {
    pub(crate) fn new<A, F>(id: JobId, callback: F, argument: A) -> Self
    where
        A: Send + 'static,
        F: FnOnce(A) -> anyhow::Result<()> + Send + 'static,
    {
        let task: Task = Box::new(move || callback(argument));
        Self { id, scheduled: AtomicBool::new(false), task: Mutex::new(Some(task)) }
    }

    /// 尝试 false→true 的调度转换；返回 true 表示调用方获得唯一的提交权
    pub(crate) fn try_schedule(&self) -> bool {
        self.scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// 取出回调；第二次调用返回 None
    pub(crate) fn take_task(&self) -> Option<Task> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).field("scheduled", &self.is_scheduled()).finish()
    }
}
