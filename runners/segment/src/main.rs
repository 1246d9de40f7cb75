//! 肺部 CT 多折集成分割.
//!
//! 读取 DICOM 序列, 对每个任务运行全部折的 nnU-Net 推理, 融合为集成结果,
//! 合成肺部与发现标签, 最后输出 DICOM-SEG (失败时输出 NIfTI).

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

mod adapters;
mod result;
mod runner;

#[derive(Debug, Parser)]
#[command(name = "segment", version, about = "Multi-fold lung CT ensemble segmentation")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = utils::env::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Input DICOM series directory (overrides `[runner] source_series_dir`).
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output directory (overrides `[runner] target_dir`).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Concurrent inference limit (overrides `[runner] max_concurrent_inference`).
    #[arg(long)]
    jobs: Option<usize>,

    /// Log filter, e.g. `debug` or `lung_berry=trace`. Defaults to `$RUST_LOG`, then `info`.
    #[arg(long)]
    log_level: Option<String>,

    /// Resolve and print the settings without running anything.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

/// 命令行给出的相对路径以当前目录为基准, 不受 `data_base_dir` 影响.
fn absolute(p: PathBuf) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p);
    }
    Ok(std::env::current_dir()
        .context("reading current directory")?
        .join(p))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_tracing(cli.log_level.as_deref());

    let mut config =
        utils::load_config(cli.config.as_deref()).context("loading configuration")?;
    if let Some(p) = cli.input {
        config.runner.source_series_dir = absolute(p)?;
    }
    if let Some(p) = cli.output {
        config.runner.target_dir = absolute(p)?;
    }
    if let Some(jobs) = cli.jobs {
        config.runner.max_concurrent_inference = jobs;
    }
    let add_background_label = config.runner.add_background_label;
    let settings = utils::settings_from(config).context("resolving pipeline settings")?;

    let cpus = utils::cpus();
    if settings.max_concurrent_inference > cpus {
        tracing::warn!(
            jobs = settings.max_concurrent_inference,
            cpus,
            "more concurrent inferences than available cores"
        );
    }

    let programs = runner::Programs::from_env();
    if cli.dry_run {
        println!("{settings:#?}");
        println!("{programs:#?}");
        return Ok(());
    }

    let start = Instant::now();
    let report = runner::run(settings, &programs, add_background_label)
        .context("segmentation run aborted")?;
    result::summarize_into(&report, start.elapsed(), &mut io::stdout().lock())
        .context("writing run report")?;

    let failed = report.failed_count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} task(s) failed", report.outcomes.len());
    }
    Ok(())
}
