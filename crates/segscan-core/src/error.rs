//! 错误类型（作业组与规则加载）
use std::path::PathBuf;
use thiserror::Error;

/// 作业组错误
#[derive(Debug, Error)]
pub enum JobGroupError {
    /// 构造期线程池资源分配失败；已分配的部分资源均已释放，对象不可再用
    #[error("job group initialization failed: {0}")]
    ResourceInit(#[source] std::io::Error),

    /// 单个作业提交失败；作业保持惰性，调用方应视整个操作失败
    #[error("job submission failed: {reason}")]
    JobSubmission { reason: String },

    /// 在 start() 之前调用 wait()
    #[error("job group was never started")]
    NotStarted,

    /// 已调用 abort()（或正在析构），作业组不可再用
    #[error("job group was aborted")]
    Aborted,

    /// 至少一个作业回调返回失败或发生 panic
    #[error("{errors} job(s) failed")]
    JobsFailed { errors: usize },
}

/// 规则文件加载与编译错误
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("read rules file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse rules file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("rule \"{id}\" has an invalid pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("no rules loaded")]
    Empty,
}
