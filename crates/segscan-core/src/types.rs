//! 公共类型（对外暴露）
use serde::Serialize;
use std::sync::Arc;

/// 规则元数据（由匹配引擎提供）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub identifier: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// 规则所在的命名空间（通常为规则文件路径）
    pub namespace: String,
}

impl Rule {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), description: None, tags: Vec::new(), namespace: String::new() }
    }

    /// 展示名：有描述时用描述，否则用规则标识
    pub fn display_name(&self) -> &str {
        match self.description.as_deref() {
            Some(d) if !d.is_empty() => d,
            _ => &self.identifier,
        }
    }
}

/// 单次命中：规则 + 绝对地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub rule: Arc<Rule>,
    pub address: u64,
}

/// 输出项结构（对应 result.json 的单个元素）
#[derive(Debug, Clone, Serialize)]
pub struct OutputItem<'a> {
    pub address: u64,
    pub unit: &'a str,
    pub rule: &'a str,
    pub description: Option<&'a str>,
    pub tags: &'a [String],
    pub namespace: &'a str,
}
