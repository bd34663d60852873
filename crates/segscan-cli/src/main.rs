use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use segscan_core::{
    scan_units, write_matches_json, CancelToken, FileUnits, RegexMatcher, ScanOptions, ScanOutcome, TracingSink,
    DEFAULT_MAX_MATCHES_PER_RULE,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "segscan", version, about = "并发分段规则扫描")]
struct Cli {
    /// 输出调试日志并保留匹配引擎的控制台消息
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 扫描文件或目录（每个文件一个单元）并生成 result.json
    Scan {
        /// 输入文件或目录
        #[arg(long)]
        input: PathBuf,

        /// 规则文件路径（TOML），默认 ./rules/default.toml
        #[arg(long)]
        rules: Option<PathBuf>,

        /// 输出文件（JSON 数组）
        #[arg(long, default_value = "./result.json")]
        output: PathBuf,

        /// 线程数（"auto"=逻辑核心数）
        #[arg(long, default_value = "auto")]
        threads: String,

        /// 单线程扫描（优先于 --threads）
        #[arg(long)]
        single_thread: bool,

        /// 单元内单条规则最多记录的命中数
        #[arg(long, default_value_t = DEFAULT_MAX_MATCHES_PER_RULE)]
        max_matches: usize,

        /// 轮询间隔（毫秒）
        #[arg(long, default_value_t = 50)]
        poll_ms: u64,

        /// 超时（秒）；超时后按取消处理，丢弃全部结果
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Scan { input, rules, output, threads, single_thread, max_matches, poll_ms, timeout_secs } => {
            info!(?input, ?output, "starting scan");

            let rules_path = rules.unwrap_or_else(|| PathBuf::from("./rules/default.toml"));
            info!(rules = ?rules_path, "loading rules");
            let matcher = RegexMatcher::from_rules_file(&rules_path).context("load rules")?;
            info!(rules = matcher.rule_count(), "rules loaded");

            let units = FileUnits::discover(&input).context("enumerate input units")?;

            let opts = ScanOptions {
                single_thread,
                max_threads: parse_threads(&threads),
                poll_interval: Duration::from_millis(poll_ms.max(1)),
                max_matches_per_rule: max_matches,
                verbose: cli.verbose,
            };
            let cancel = match timeout_secs {
                Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
                None => CancelToken::new(),
            };

            let outcome = scan_units(&units, Arc::new(matcher), &cancel, &TracingSink, &opts);
            let report = match outcome {
                ScanOutcome::Completed(report) => report,
                ScanOutcome::Aborted(reason) => {
                    error!(%reason, "scan aborted, no results written");
                    bail!("scan aborted: {reason}");
                }
            };

            // 以缓冲方式打开输出文件，按 JSON 数组流式写入
            let mut out = BufWriter::new(File::create(&output).context("create output file")?);
            let written = write_matches_json(&mut out, &report.matches, &report.units).context("write results")?;
            out.flush().context("flush output file")?;

            info!(
                units_scanned = report.stats.units_scanned,
                units_skipped = report.stats.units_skipped,
                bytes = report.stats.bytes_scanned,
                matches = written,
                threads = report.threads,
                elapsed = ?report.elapsed,
                "scan finished"
            );
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // 支持通过环境变量 RUST_LOG 控制日志等级；--verbose 时默认 debug
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(env_filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 解析线程参数
fn parse_threads(s: &str) -> Option<usize> {
    if s.eq_ignore_ascii_case("auto") { return None; }
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}
