//! 环境变量与默认位置解析.

use std::env;
use std::path::{Path, PathBuf};

/// 配置文件位置的环境变量.
pub const CONFIG_ENV: &str = "LUNG_BERRY_CONFIG";

/// dcmqi 安装位置的环境变量.
pub const DCMQI_ENV: &str = "DCMQI_PACKAGE_PATH";

/// nnU-Net 推理程序的环境变量.
pub const NNUNET_ENV: &str = "NNUNET_PREDICT";

/// dcm2niix 程序的环境变量.
pub const DCM2NIIX_ENV: &str = "DCM2NIIX";

/// nnU-Net 权重目录下, 3D 全分辨率模型相对于 `3d_fullres/{task_name}` 的子目录.
pub const NNUNET_TRAINER_DIR: &str = "nnUNetTrainerV2__nnUNetPlansv2.1";

/// 获取配置文件位置.
///
/// 1. 若命令行给出了 `cli`, 则返回其值;
/// 2. 否则, 若环境变量 `$LUNG_BERRY_CONFIG` 非空, 则返回其值;
/// 3. 否则, 若 `{config_dir}/lung-berry/config.toml` 存在, 则返回该位置;
/// 4. 以上都不满足时返回 `None`, 即使用默认配置.
pub fn config_path(cli: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = cli {
        return Some(p.to_owned());
    }
    if let Some(p) = non_empty_var(CONFIG_ENV) {
        return Some(PathBuf::from(p));
    }
    dirs::config_dir()
        .map(|d| d.join("lung-berry").join("config.toml"))
        .filter(|p| p.is_file())
}

/// 由权重根目录和 nnU-Net 任务名拼出模型位置:
/// `{weights}/3d_fullres/{task_name}/nnUNetTrainerV2__nnUNetPlansv2.1`.
pub fn checkpoint_from<P: AsRef<Path>>(weights: P, task_name: &str) -> PathBuf {
    weights
        .as_ref()
        .join("3d_fullres")
        .join(task_name)
        .join(NNUNET_TRAINER_DIR)
}

/// 从环境变量解析任务 `task` 的模型位置.
///
/// 需要同时设置 `$WEIGHTS_FOLDER_{TASK}` 与 `$TASK_NAME_{TASK}`,
/// 其中 `{TASK}` 为任务名的大写形式 (例如 `NSCLC_RG`).
pub fn checkpoint_from_env(task: &str) -> Option<PathBuf> {
    let suffix = task.to_uppercase();
    let weights = non_empty_var(&format!("WEIGHTS_FOLDER_{suffix}"))?;
    let task_name = non_empty_var(&format!("TASK_NAME_{suffix}"))?;
    Some(checkpoint_from(weights, &task_name))
}

/// 获取外部程序名. 若环境变量 `var` 非空则使用其值, 否则使用 `default`.
pub fn program_from_env(var: &str, default: &str) -> PathBuf {
    non_empty_var(var).map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// 获取 dcmqi 安装位置 (`$DCMQI_PACKAGE_PATH`).
pub fn dcmqi_dir_from_env() -> Option<PathBuf> {
    non_empty_var(DCMQI_ENV).map(PathBuf::from)
}

#[inline]
fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::Path;

    #[test]
    fn test_checkpoint_from() {
        assert_eq!(
            checkpoint_from("/weights", "Task775_CT_NSCLC_RG"),
            Path::new(
                "/weights/3d_fullres/Task775_CT_NSCLC_RG/nnUNetTrainerV2__nnUNetPlansv2.1"
            )
        );
    }

    #[test]
    #[serial]
    fn test_checkpoint_from_env() {
        env::set_var("WEIGHTS_FOLDER_NSCLC_RG", "/models/nsclc");
        env::set_var("TASK_NAME_NSCLC_RG", "Task775_CT_NSCLC_RG");
        env::remove_var("TASK_NAME_NODULES");
        assert_eq!(
            checkpoint_from_env("nsclc_rg"),
            Some(checkpoint_from("/models/nsclc", "Task775_CT_NSCLC_RG"))
        );
        assert_eq!(checkpoint_from_env("nodules"), None);
        env::remove_var("WEIGHTS_FOLDER_NSCLC_RG");
        env::remove_var("TASK_NAME_NSCLC_RG");
    }

    #[test]
    #[serial]
    fn test_config_path_priority() {
        env::set_var(CONFIG_ENV, "/etc/lung-berry.toml");
        assert_eq!(
            config_path(Some(Path::new("cli.toml"))),
            Some(PathBuf::from("cli.toml"))
        );
        assert_eq!(config_path(None), Some(PathBuf::from("/etc/lung-berry.toml")));
        env::remove_var(CONFIG_ENV);
    }

    #[test]
    #[serial]
    fn test_program_from_env() {
        env::set_var(NNUNET_ENV, "");
        assert_eq!(program_from_env(NNUNET_ENV, "nnunet-predict"), Path::new("nnunet-predict"));
        env::set_var(NNUNET_ENV, "/opt/bin/predict");
        assert_eq!(program_from_env(NNUNET_ENV, "nnunet-predict"), Path::new("/opt/bin/predict"));
        env::remove_var(NNUNET_ENV);
    }
}
