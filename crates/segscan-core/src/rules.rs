//! 规则文件加载（TOML）
use serde::Deserialize;
use std::path::Path;

use crate::error::RuleError;

/// 单条规则的配置（支持 pattern 或 regex 字段）
#[derive(Debug, Clone, Deserialize)]
struct RuleEntry {
    pub id: String,
    #[serde(default, alias = "name")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
}

/// 顶层规则文件结构
#[derive(Debug, Clone, Deserialize)]
struct RuleFile {
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// 归一化后的规则规格（内部使用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RuleSpec {
    pub id: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub pat: String,
}

/// 从 TOML 规则文件加载并归一化为 RuleSpec 列表
pub(crate) fn load_rule_specs(path: &Path) -> Result<Vec<RuleSpec>, RuleError> {
    let txt = std::fs::read_to_string(path).map_err(|source| RuleError::Io { path: path.to_path_buf(), source })?;
    parse_rule_specs(&txt)
}

pub(crate) fn parse_rule_specs(txt: &str) -> Result<Vec<RuleSpec>, RuleError> {
    let parsed: RuleFile = toml::from_str(txt)?;
    let mut out = Vec::new();

    for e in parsed.rules {
        // 兼容两种字段名：pattern 或 regex
        let pat = match (e.pattern, e.regex) {
            (Some(p), _) => p,
            (None, Some(r)) => r,
            _ => {
                tracing::warn!(rule = %e.id, "rule has no pattern, skipped");
                continue;
            }
        };
        out.push(RuleSpec { id: e.id, description: e.description, tags: e.tags, pat });
    }

    Ok(out)
}
