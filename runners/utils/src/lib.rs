//! 运行器依赖的通用组件.

use lung_berry::config::Config;
use lung_berry::pipeline::PipelineSettings;
use std::io::{self, Write};
use std::path::Path;
use tracing_subscriber::EnvFilter;

pub mod env;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep_to<W: Write>(mut w: W) -> io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 初始化日志输出.
///
/// 1. 若 `level` 非空, 则以其为过滤规则;
/// 2. 否则使用 `$RUST_LOG`;
/// 3. 以上都不可用时, 默认为 `info`.
pub fn init_tracing(level: Option<&str>) {
    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// 加载配置. 位置按 [`env::config_path`] 解析, 找不到配置文件时使用默认配置.
pub fn load_config(cli: Option<&Path>) -> lung_berry::Result<Config> {
    match env::config_path(cli) {
        Some(p) => {
            tracing::info!(path = %p.display(), "loading configuration");
            Config::load(p)
        }
        None => {
            tracing::info!("no configuration file found, using defaults");
            Ok(Config::default())
        }
    }
}

/// 由配置得到流水线参数. 未配置 `checkpoint` 的任务从环境变量解析.
#[inline]
pub fn settings_from(config: Config) -> lung_berry::Result<PipelineSettings> {
    config.into_settings(env::checkpoint_from_env)
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_cpus() {
        assert!(super::cpus() >= 1);
    }

    #[test]
    fn test_load_config_from_cli_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[tasks]]\nname = \"nsclc_rg\"\ncheckpoint = \"/models/nsclc_rg\"\n\n\
             [runner.output_names]\nnsclc_rg = \"seg_lesions_ensemble.nii.gz\"\n",
        )
        .unwrap();
        let config = super::load_config(Some(&path)).unwrap();
        let settings = super::settings_from(config).unwrap();
        assert_eq!(settings.tasks.len(), 1);
        assert_eq!(settings.tasks[0].checkpoint(), std::path::Path::new("/models/nsclc_rg"));
    }

    #[test]
    fn test_sep() {
        let mut buf = Vec::new();
        super::sep_to(&mut buf).unwrap();
        assert!(buf.ends_with(b"-\n"));
    }
}
