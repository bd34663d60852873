//! 作业组：有界工作线程池 + 一次性作业队列
//!
//! 设计要点：
//! - 作业列表只在锁内追加/遍历；每个作业通过原子标志保证只提交一次，`add()` 与 `start()` 并发时也成立。
//! - 工作线程按需创建，上限为 `start()` 时解析出的 max_threads；线程经 crossbeam 通道取作业。
//! - `completed` / `errors` 只增不减；工作线程先发布 errors 再发布 completed，读取方顺序相反。
//! - 回调中的 panic 在线程边界被捕获并计为失败，不会穿透线程池。
//! - `abort()` 与析构：先取消尚未开始的作业，再阻塞等待运行中的作业结束并 join 全部线程。
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, warn};

use crate::error::JobGroupError;
use crate::job::{Job, JobId};

/// wait() 在条件变量上的超时回退间隔
const WAIT_BACKOFF: Duration = Duration::from_millis(50);

/// poll() 的非阻塞完成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// 仍有作业未完成，且尚无失败
    Pending,
    /// 全部作业完成且无失败
    Success,
    /// 已记录到失败（此时可能仍有作业在运行），或作业组未启动/已中止
    Failure { errors: usize },
}

/// 逻辑核心数（含超线程）
pub fn logical_core_count() -> usize {
    num_cpus::get().max(1)
}

/// 作业组构造参数
#[derive(Debug, Clone)]
pub struct JobGroupBuilder {
    max_threads: usize,
    min_threads: usize,
    thread_name: String,
    stack_size: Option<usize>,
}

impl Default for JobGroupBuilder {
    fn default() -> Self {
        Self { max_threads: 0, min_threads: 0, thread_name: "segscan-worker".to_string(), stack_size: None }
    }
}

impl JobGroupBuilder {
    /// 线程上限；0 表示在 start() 时取逻辑核心数
    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    /// 构造时预先创建的工作线程数（线程池下限）
    pub fn min_threads(mut self, n: usize) -> Self {
        self.min_threads = n;
        self
    }

    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// 分配线程池资源；任一步失败都会先释放已分配部分再返回 `ResourceInit`
    pub fn build(self) -> Result<JobGroup, JobGroupError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::default());
        let mut pool = Pool {
            sender: Some(sender),
            receiver,
            workers: Vec::new(),
            min_threads: self.min_threads,
            max_threads: 0,
            thread_name: self.thread_name,
            stack_size: self.stack_size,
        };

        for _ in 0..self.min_threads {
            if let Err(err) = pool.spawn_worker(&shared) {
                join_workers(pool.close());
                return Err(JobGroupError::ResourceInit(err));
            }
        }

        Ok(JobGroup {
            jobs: Mutex::new(Vec::new()),
            pool: Mutex::new(pool),
            shared,
            job_total: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            max_override: self.max_threads,
            resolved_max: AtomicUsize::new(0),
        })
    }
}

/// 并发作业组
///
/// 控制面调用（add/start/wait/poll/abort）应来自同一个属主线程；作业回调内不得回调本对象。
pub struct JobGroup {
    jobs: Mutex<Vec<Arc<Job>>>,
    pool: Mutex<Pool>,
    shared: Arc<Shared>,
    job_total: AtomicUsize,
    started: AtomicBool,
    aborted: AtomicBool,
    max_override: usize,
    resolved_max: AtomicUsize,
}

impl JobGroup {
    /// 以默认参数构造；`max_threads == 0` 表示 start() 时取逻辑核心数
    pub fn new(max_threads: usize) -> Result<Self, JobGroupError> {
        Self::builder().max_threads(max_threads).build()
    }

    pub fn builder() -> JobGroupBuilder {
        JobGroupBuilder::default()
    }

    /// 加入一个作业
    ///
    /// 若作业组已启动或 `start_now` 为真，会先调用（幂等的）`start()`，
    /// 并单独提交新作业。提交失败时返回 `JobSubmission`，作业保持惰性并计为一次失败完成。
    pub fn add<A, F>(&self, callback: F, argument: A, start_now: bool) -> Result<JobId, JobGroupError>
    where
        A: Send + 'static,
        F: FnOnce(A) -> anyhow::Result<()> + Send + 'static,
    {
        if self.is_aborted() {
            return Err(JobGroupError::Aborted);
        }

        let job = {
            let mut jobs = lock(&self.jobs);
            let job = Arc::new(Job::new(JobId(jobs.len()), callback, argument));
            jobs.push(Arc::clone(&job));
            self.job_total.fetch_add(1, Ordering::AcqRel);
            job
        };

        if self.is_started() || start_now {
            // 先占下新作业的调度标志，start() 只提交其余作业；新作业的提交错误直接返回给调用方
            let claimed = job.try_schedule();
            self.start();
            if claimed {
                self.submit(&job)?;
            }
        }
        Ok(job.id)
    }

    /// 启动作业组（幂等）：解析线程上限并提交所有尚未调度的作业
    pub fn start(&self) {
        {
            let mut pool = lock(&self.pool);
            if self.is_started() || self.is_aborted() {
                return;
            }
            let max = if self.max_override == 0 { logical_core_count() } else { self.max_override };
            pool.max_threads = max.max(pool.min_threads);
            self.resolved_max.store(pool.max_threads, Ordering::Release);
            self.started.store(true, Ordering::Release);
            debug!(max_threads = pool.max_threads, min_threads = pool.min_threads, "job group started");
        }

        let jobs = lock(&self.jobs);
        for job in jobs.iter() {
            if job.try_schedule() {
                if let Err(err) = self.submit(job) {
                    error!(job = %job.id, %err, "failed to submit job");
                }
            }
        }
    }

    /// 阻塞直到全部作业完成或出现失败；仅在全部完成且无失败时返回 Ok
    pub fn wait(&self) -> Result<(), JobGroupError> {
        if !self.is_started() {
            return Err(JobGroupError::NotStarted);
        }

        let mut guard = lock(&self.shared.progress);
        loop {
            if self.is_aborted() {
                return Err(JobGroupError::Aborted);
            }
            match self.status() {
                GroupStatus::Pending => {}
                GroupStatus::Success => return Ok(()),
                GroupStatus::Failure { errors } => return Err(JobGroupError::JobsFailed { errors }),
            }
            guard = match self.shared.signal.wait_timeout(guard, WAIT_BACKOFF) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// 非阻塞地检查完成状态
    ///
    /// 一旦记录到失败即返回 `Failure`，不等待其余运行中的作业；复用或释放前必须调用 `abort()`。
    pub fn poll(&self) -> GroupStatus {
        if !self.is_started() || self.is_aborted() {
            return GroupStatus::Failure { errors: self.error_count() };
        }
        self.status()
    }

    /// 取消尚未开始的作业并阻塞等待运行中的作业结束；与析构等价，可重复调用
    pub fn abort(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.aborted.store(true, Ordering::Release);

        let workers = lock(&self.pool).close();
        let worker_count = workers.len();
        join_workers(workers);

        let dropped = {
            let mut jobs = lock(&self.jobs);
            let n = jobs.len();
            jobs.clear();
            n
        };
        if worker_count > 0 || dropped > 0 {
            debug!(
                workers = worker_count,
                jobs = dropped,
                completed = self.completed(),
                errors = self.error_count(),
                "job group drained"
            );
        }
    }

    /// 实际使用的线程上限；start() 之前为 0
    pub fn max_threads(&self) -> usize {
        if self.is_started() { self.resolved_max.load(Ordering::Acquire) } else { 0 }
    }

    pub fn job_count(&self) -> usize {
        self.job_total.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> usize {
        self.shared.completed.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> usize {
        self.shared.errors.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn status(&self) -> GroupStatus {
        // 先读 completed 再读 errors：看到某次完成时，它之前的失败计数一定可见
        let total = self.job_count();
        let completed = self.completed();
        let errors = self.error_count();
        if errors > 0 {
            GroupStatus::Failure { errors }
        } else if completed >= total {
            GroupStatus::Success
        } else {
            GroupStatus::Pending
        }
    }

    fn submit(&self, job: &Arc<Job>) -> Result<(), JobGroupError> {
        let result = lock(&self.pool).submit(Arc::clone(job), &self.shared);
        if result.is_err() {
            // 惰性作业永远不会运行；计为失败完成，避免 wait() 永久阻塞
            self.shared.finish(true);
        }
        result
    }
}

impl Drop for JobGroup {
    fn drop(&mut self) {
        self.abort();
    }
}

impl fmt::Debug for JobGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobGroup")
            .field("jobs", &self.job_count())
            .field("completed", &self.completed())
            .field("errors", &self.error_count())
            .field("started", &self.is_started())
            .field("max_threads", &self.max_threads())
            .finish()
    }
}

/// 工作线程间共享的计数与通知
#[derive(Default)]
struct Shared {
    completed: AtomicUsize,
    errors: AtomicUsize,
    cancelled: AtomicBool,
    progress: Mutex<()>,
    signal: Condvar,
}

impl Shared {
    fn finish(&self, failed: bool) {
        if failed {
            self.errors.fetch_add(1, Ordering::AcqRel);
        }
        self.completed.fetch_add(1, Ordering::AcqRel);
        let _guard = lock(&self.progress);
        self.signal.notify_all();
    }
}

/// 线程池资源（受 JobGroup::pool 锁保护）
struct Pool {
    sender: Option<Sender<Arc<Job>>>,
    receiver: Receiver<Arc<Job>>,
    workers: Vec<JoinHandle<()>>,
    min_threads: usize,
    max_threads: usize,
    thread_name: String,
    stack_size: Option<usize>,
}

impl Pool {
    fn spawn_worker(&mut self, shared: &Arc<Shared>) -> std::io::Result<()> {
        let queue = self.receiver.clone();
        let shared = Arc::clone(shared);
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.thread_name, self.workers.len()));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        let handle = builder.spawn(move || worker_loop(queue, shared))?;
        self.workers.push(handle);
        Ok(())
    }

    /// 投递作业；线程数未达上限时顺带扩容一个工作线程
    fn submit(&mut self, job: Arc<Job>, shared: &Arc<Shared>) -> Result<(), JobGroupError> {
        if self.sender.is_none() {
            return Err(JobGroupError::JobSubmission { reason: "job queue is closed".to_string() });
        }
        if self.workers.len() < self.max_threads {
            if let Err(err) = self.spawn_worker(shared) {
                if self.workers.is_empty() {
                    return Err(JobGroupError::JobSubmission { reason: format!("spawn worker thread: {err}") });
                }
                warn!(%err, workers = self.workers.len(), "worker spawn failed, continuing with existing workers");
            }
        }
        match &self.sender {
            Some(sender) => sender
                .send(job)
                .map_err(|_| JobGroupError::JobSubmission { reason: "job queue is closed".to_string() }),
            None => Err(JobGroupError::JobSubmission { reason: "job queue is closed".to_string() }),
        }
    }

    /// 关闭队列（工作线程取空后退出）并交出线程句柄
    fn close(&mut self) -> Vec<JoinHandle<()>> {
        self.sender = None;
        std::mem::take(&mut self.workers)
    }
}

fn join_workers(workers: Vec<JoinHandle<()>>) {
    let me = thread::current().id();
    for handle in workers {
        if handle.thread().id() == me {
            warn!("job group torn down from inside a job callback; skipping self-join");
            continue;
        }
        if handle.join().is_err() {
            warn!("worker thread terminated abnormally");
        }
    }
}

fn worker_loop(queue: Receiver<Arc<Job>>, shared: Arc<Shared>) {
    while let Ok(job) = queue.recv() {
        if shared.cancelled.load(Ordering::Acquire) {
            debug!(job = %job.id, "job cancelled before start");
            continue;
        }
        let Some(task) = job.take_task() else { continue };

        let failed = match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => false,
            Ok(Err(err)) => {
                let msg = format!("{err:#}");
                debug!(job = %job.id, error = %msg, "job failed");
                true
            }
            Err(payload) => {
                error!(job = %job.id, panic = panic_message(payload.as_ref()), "job panicked");
                true
            }
        };
        shared.finish(failed);
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
