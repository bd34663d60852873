//! 宿主协作接口：取消检查与诊断消息输出
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 用户取消检查（协作式，只在属主线程上调用）
pub trait CancelCheck {
    fn is_cancelled(&self) -> bool;
}

impl<F: Fn() -> bool> CancelCheck for F {
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// 宿主诊断消息输出（只在属主线程上调用）
pub trait MessageSink {
    fn message(&self, text: &str);
}

/// 默认输出：转发到 tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn message(&self, text: &str) {
        tracing::info!("{}", text);
    }
}

/// 可跨线程共享的取消标志，附带可选的截止时间
///
/// 超时策略叠加在取消检查之上：超过截止时间即视为已取消。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从现在起 `timeout` 之后自动取消
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), deadline: Instant::now().checked_add(timeout) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl CancelCheck for CancelToken {
    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire) || self.deadline_passed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_token_deadline() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(token.deadline_passed());
        assert!(token.is_cancelled());
        assert!(!CancelToken::with_timeout(Duration::from_secs(3600)).is_cancelled());
    }

    #[test]
    fn test_closure_as_cancel_check() {
        let check = || true;
        assert!(check.is_cancelled());
    }
}
