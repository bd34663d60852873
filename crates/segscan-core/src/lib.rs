//! 并发分段扫描核心库
//!
//! 设计要点：
//! - 作业组（`JobGroup`）管理有界工作线程池与一次性作业队列，计数只增不减，析构时先取消再排空。
//! - 编排层（`scan_units`）枚举宿主单元、复制快照、逐个提交作业，轮询期间支持协作式取消。
//! - 每个作业只写自己的结果槽，属主线程在作业组完成后按枚举顺序合并，并按地址升序排序。
//! - 结果“全有或全无”：取消或任一失败都不输出部分命中。
//! - 匹配引擎、单元枚举、取消与消息输出都由宿主以 trait 形式提供。

mod error;
mod job;
mod group;
mod options;
mod types;
mod source;
mod host;
mod unit;
mod rules;
mod detectors;
mod findings;
mod scan;

pub use error::{JobGroupError, RuleError};
pub use job::JobId;
pub use group::{logical_core_count, GroupStatus, JobGroup, JobGroupBuilder};
pub use options::{ScanOptions, ScanStats, DEFAULT_POLL_INTERVAL};
pub use types::{Match, OutputItem, Rule};
pub use source::{FileUnits, MemoryUnits, UnitDescriptor, UnitKind, UnitSource, FILE_UNITS_ALIGN, FILE_UNITS_BASE};
pub use host::{CancelCheck, CancelToken, MessageSink, TracingSink};
pub use unit::{UnitScan, DEFAULT_MAX_MATCHES_PER_RULE};
pub use detectors::{Matcher, RegexMatcher};
pub use findings::{merge_unit_matches, write_matches_json};
pub use scan::{scan_units, AbortReason, ScanOutcome, ScanReport};
