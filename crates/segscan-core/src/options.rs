//! 扫描选项与统计信息（模块）
use std::time::Duration;

use crate::unit::DEFAULT_MAX_MATCHES_PER_RULE;

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 扫描选项
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// 单线程模式：线程池上限固定为 1
    pub single_thread: bool,
    /// 线程数：None 表示自动（等于逻辑核心数）；single_thread 优先
    pub max_threads: Option<usize>,
    /// 属主线程轮询作业组状态与取消标志的间隔
    pub poll_interval: Duration,
    /// 单元内单条规则最多记录的命中数
    pub max_matches_per_rule: usize,
    /// 是否保留匹配引擎的控制台输出
    pub verbose: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            single_thread: false,
            max_threads: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_matches_per_rule: DEFAULT_MAX_MATCHES_PER_RULE,
            verbose: false,
        }
    }
}

impl ScanOptions {
    /// 解析并行度：单线程模式为 1，否则为显式值或逻辑核心数
    pub fn resolve_threads(&self) -> usize {
        if self.single_thread {
            return 1;
        }
        match self.max_threads {
            Some(n) if n >= 1 => n,
            _ => crate::group::logical_core_count(),
        }
    }
}

/// 扫描统计信息（便于 CLI 打印）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    /// 宿主枚举出的单元总数
    pub units_total: usize,
    /// 提交为作业的单元数
    pub units_scanned: usize,
    /// 因类型或长度被跳过的单元数
    pub units_skipped: usize,
    /// 快照的总字节数
    pub bytes_scanned: u64,
    pub matches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_threads() {
        let single = ScanOptions { single_thread: true, max_threads: Some(8), ..Default::default() };
        assert_eq!(single.resolve_threads(), 1);

        let fixed = ScanOptions { max_threads: Some(3), ..Default::default() };
        assert_eq!(fixed.resolve_threads(), 3);

        let auto = ScanOptions { max_threads: Some(0), ..Default::default() };
        assert_eq!(auto.resolve_threads(), crate::group::logical_core_count());
    }
}
