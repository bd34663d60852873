//! 扫描主流程与并行调度
//!
//! 流程：解析并行度 → 构造作业组 → 枚举单元并快照 → 逐个提交作业（每次提交后检查取消）
//! → 定时轮询（每轮检查取消）→ 作业组完成后按枚举顺序输出单元消息并合并命中。
//!
//! 结果是“全有或全无”的：取消、提交失败、快照失败或任一作业失败都会丢弃全部命中。
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::detectors::Matcher;
use crate::error::JobGroupError;
use crate::findings::merge_unit_matches;
use crate::group::{panic_message, GroupStatus, JobGroup};
use crate::host::{CancelCheck, MessageSink};
use crate::options::{ScanOptions, ScanStats};
use crate::source::{UnitDescriptor, UnitSource};
use crate::types::Match;
use crate::unit::{UnitOutput, UnitScan, UnitSlot};

/// 扫描中止原因
#[derive(Debug)]
pub enum AbortReason {
    /// 用户取消（或超时），不是错误
    Cancelled,
    GroupInit(JobGroupError),
    Enumeration(String),
    Snapshot { unit: String, error: String },
    Submission(JobGroupError),
    JobsFailed { errors: usize },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "canceled"),
            AbortReason::GroupInit(err) => write!(f, "job group create failed: {err}"),
            AbortReason::Enumeration(err) => write!(f, "unit enumeration failed: {err}"),
            AbortReason::Snapshot { unit, error } => write!(f, "snapshot of \"{unit}\" failed: {error}"),
            AbortReason::Submission(err) => write!(f, "job add failed: {err}"),
            AbortReason::JobsFailed { errors } => write!(f, "scanning failed, total errors: {errors}"),
        }
    }
}

/// 成功完成时的汇总结果
#[derive(Debug)]
pub struct ScanReport {
    /// 按地址升序的全部命中
    pub matches: Vec<Match>,
    /// 实际扫描的单元（按枚举顺序）
    pub units: Vec<UnitDescriptor>,
    pub stats: ScanStats,
    /// 作业组实际使用的线程上限
    pub threads: usize,
    pub elapsed: Duration,
}

/// 扫描结果
#[derive(Debug)]
pub enum ScanOutcome {
    Completed(ScanReport),
    Aborted(AbortReason),
}

impl ScanOutcome {
    /// 合并后的命中；中止时为空
    pub fn matches(&self) -> &[Match] {
        match self {
            ScanOutcome::Completed(r) => &r.matches,
            ScanOutcome::Aborted(_) => &[],
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ScanOutcome::Aborted(_))
    }

    pub fn report(&self) -> Option<&ScanReport> {
        match self {
            ScanOutcome::Completed(r) => Some(r),
            ScanOutcome::Aborted(_) => None,
        }
    }
}

/// 单个作业的参数：单元快照归作业独占
struct UnitJob {
    base: u64,
    snapshot: Vec<u8>,
    matcher: Arc<dyn Matcher>,
    slot: UnitSlot,
    max_per_rule: usize,
    verbose: bool,
}

/// 属主线程保留的单元上下文
struct UnitContext {
    unit: UnitDescriptor,
    slot: UnitSlot,
}

/// 作业回调：在工作线程上扫描快照，结果写入一次性槽位
fn run_unit_job(job: UnitJob) -> anyhow::Result<()> {
    let UnitJob { base, snapshot, matcher, slot, max_per_rule, verbose } = job;
    let mut scan = UnitScan::new(base, max_per_rule, verbose);
    // 引擎 panic 也归到本单元：保留已排队的消息，panic 文本作为失败原因
    let result = match panic::catch_unwind(AssertUnwindSafe(|| matcher.scan(&snapshot, &mut scan))) {
        Ok(r) => r,
        Err(payload) => Err(anyhow!("matcher panicked: {}", panic_message(payload.as_ref()))),
    };
    let failure = result.as_ref().err().map(|e| format!("{e:#}"));
    let _ = slot.set(scan.finish(failure));
    result
}

/// 扫描宿主提供的全部单元并返回合并结果
///
/// 所有对 `source` / `cancel` / `sink` 的调用都发生在调用线程上；作业回调只接触各自的快照与结果槽。
pub fn scan_units(
    source: &dyn UnitSource,
    matcher: Arc<dyn Matcher>,
    cancel: &dyn CancelCheck,
    sink: &dyn MessageSink,
    opts: &ScanOptions,
) -> ScanOutcome {
    let started = Instant::now();

    // 1) 并行度与作业组
    let threads = opts.resolve_threads();
    if threads == 1 {
        sink.message("Using single threaded scanning.");
    } else {
        sink.message(&format!("Using up to {threads} logical core threads for scanning."));
    }
    let group = match JobGroup::builder().max_threads(threads).build() {
        Ok(g) => g,
        Err(err) => {
            sink.message(&format!("** Job group create failed! Reason: \"{err}\" **"));
            return aborted(sink, AbortReason::GroupInit(err));
        }
    };

    // 2) 枚举单元、快照并提交作业
    let candidates = match source.units() {
        Ok(u) => u,
        Err(err) => {
            sink.message(&format!("** Unit enumeration failed! Reason: \"{err:#}\" **"));
            return aborted(sink, AbortReason::Enumeration(format!("{err:#}")));
        }
    };
    let mut stats = ScanStats { units_total: candidates.len(), ..Default::default() };
    let mut contexts: Vec<UnitContext> = Vec::new();

    sink.message("Walking units:");
    for unit in candidates {
        if !unit.is_scannable() {
            stats.units_skipped += 1;
            debug!(unit = %unit.name, kind = ?unit.kind, size = unit.size, "unit skipped");
            continue;
        }
        sink.message(&format!(
            " \"{}\", {}, {:#X} - {:#X}, {}",
            unit.name,
            unit.class,
            unit.start,
            unit.end(),
            byte_size_string(unit.size)
        ));

        let snapshot = match source.snapshot(&unit) {
            Ok(bytes) => bytes,
            Err(err) => {
                sink.message(&format!("** Snapshot of \"{}\" failed! Reason: \"{err:#}\" **", unit.name));
                group.abort();
                return aborted(sink, AbortReason::Snapshot { unit: unit.name, error: format!("{err:#}") });
            }
        };
        stats.bytes_scanned += snapshot.len() as u64;

        let slot: UnitSlot = Arc::new(OnceLock::new());
        let job = UnitJob {
            base: unit.start,
            snapshot,
            matcher: Arc::clone(&matcher),
            slot: Arc::clone(&slot),
            max_per_rule: opts.max_matches_per_rule,
            verbose: opts.verbose,
        };
        contexts.push(UnitContext { unit, slot });

        // 视线程池余量立即开始或排队
        if let Err(err) = group.add(run_unit_job, job, true) {
            sink.message(&format!("** Job group add failed! Reason: \"{err}\" **"));
            group.abort();
            return aborted(sink, AbortReason::Submission(err));
        }
        stats.units_scanned += 1;

        if cancel.is_cancelled() {
            group.abort();
            return aborted(sink, AbortReason::Cancelled);
        }
    }
    // 没有可扫描单元时也要进入已启动状态，poll() 才会报告完成
    group.start();
    info!(units = stats.units_scanned, skipped = stats.units_skipped, threads = group.max_threads(), "scan jobs submitted");

    // 3) 轮询等待，期间检查取消
    sink.message("Scanning:");
    thread::sleep(opts.poll_interval);
    let status = loop {
        if cancel.is_cancelled() {
            group.abort();
            return aborted(sink, AbortReason::Cancelled);
        }
        thread::sleep(opts.poll_interval);
        match group.poll() {
            GroupStatus::Pending => continue,
            s => break s,
        }
    };

    if let GroupStatus::Failure { .. } = status {
        // 失败时 poll() 不等待其余作业；先排空再读取单元结果
        group.abort();
        let errors = group.error_count();
        flush_units(sink, contexts);
        sink.message(&format!("** Scanning failed! Total errors: {errors} **"));
        return aborted(sink, AbortReason::JobsFailed { errors });
    }

    // 4) 输出单元消息并合并命中
    let threads = group.max_threads();
    let units: Vec<UnitDescriptor> = contexts.iter().map(|c| c.unit.clone()).collect();
    let per_unit = flush_units(sink, contexts);
    let matches = merge_unit_matches(per_unit);
    stats.matches = matches.len();

    let elapsed = started.elapsed();
    if matches.is_empty() {
        sink.message("Done. No rule matches found.");
    } else {
        sink.message(&format!("Found {} matches in {:.2?}", matches.len(), elapsed));
    }
    info!(matches = stats.matches, units = stats.units_scanned, ?elapsed, "scan finished");

    ScanOutcome::Completed(ScanReport { matches, units, stats, threads, elapsed })
}

/// 按枚举顺序输出每个单元的摘要与排队消息，返回各单元命中
fn flush_units(sink: &dyn MessageSink, contexts: Vec<UnitContext>) -> Vec<Vec<Match>> {
    let mut per_unit = Vec::with_capacity(contexts.len());
    for (index, ctx) in contexts.into_iter().enumerate() {
        // 槽位为空说明作业在开始前就被 abort() 取消
        let output = take_output(ctx.slot).unwrap_or_else(|| UnitOutput {
            failure: Some("not run".to_string()),
            ..Default::default()
        });

        let mut line = format!(" [{index}] \"{}\"", ctx.unit.name);
        if let Some(f) = &output.failure {
            line.push_str(&format!(" ** Error: {f} **"));
        }
        if !output.matches.is_empty() {
            line.push_str(&format!(", {} matches", output.matches.len()));
        }
        sink.message(&line);
        for m in &output.messages {
            sink.message(m);
        }
        per_unit.push(output.matches);
    }
    per_unit
}

fn take_output(slot: UnitSlot) -> Option<UnitOutput> {
    match Arc::try_unwrap(slot) {
        Ok(cell) => cell.into_inner(),
        Err(shared) => shared.get().cloned(),
    }
}

fn aborted(sink: &dyn MessageSink, reason: AbortReason) -> ScanOutcome {
    warn!(%reason, "scan aborted");
    sink.message("* Aborted *");
    ScanOutcome::Aborted(reason)
}

/// 人类可读的字节数
fn byte_size_string(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{value:.1} {}", UNITS[idx])
}
