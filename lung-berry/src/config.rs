//! TOML 配置.
//!
//! 所有字段都有默认值, 因此空文件也是合法配置. 相对路径以 `[general] data_base_dir`
//! 为基准解析 (未设置时保持原样).
//!
//! # 从 YAML 部署配置迁移
//!
//! | YAML 键 | TOML 键 |
//! |---|---|
//! | `general.data_base_dir` | `[general] data_base_dir` |
//! | `modules.NNUnetRunner.source_ct_dir` | `[runner] source_series_dir` |
//! | `modules.NNUnetRunner.target_dir` | `[runner] target_dir` |
//! | `modules.NNUnetRunner.num_folds` | `[runner] fold_count` (或 `[[tasks]] fold_count`) |
//! | `modules.NNUnetRunner.organ_label` | `[runner] finding_label` |
//! | `modules.NNUnetRunner.output_nodules_seg_name` | `[runner.output_names] nodules` |
//! | `modules.NNUnetRunner.output_lesions_seg_name` | `[runner.output_names] nsclc_rg` |
//!
//! 模型位置与 dcmqi 位置不在 YAML 中, 而是来自环境变量. 这里同样支持
//! 从环境变量解析 (见 [`Config::into_settings`]), 也可以直接写进 `[[tasks]] checkpoint`.

use crate::consts::*;
use crate::fold::Task;
use crate::fusion::{LabelMatch, VoteThreshold};
use crate::pipeline::PipelineSettings;
use crate::post_proc::SelectionPolicy;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 完整配置.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 通用配置.
    pub general: General,

    /// 流水线配置.
    pub runner: RunnerConfig,

    /// 结构掩膜的连通域筛选策略.
    pub selection: SelectionPolicy,

    /// 任务列表.
    pub tasks: Vec<TaskConfig>,
}

/// 通用配置.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct General {
    /// 相对路径的基准目录.
    pub data_base_dir: Option<PathBuf>,
}

/// 流水线配置.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// 输入 DICOM 序列目录.
    pub source_series_dir: PathBuf,

    /// 输出目录.
    pub target_dir: PathBuf,

    /// 临时目录.
    pub scratch_dir: PathBuf,

    /// 未单独指定时, 每个任务的折数.
    pub fold_count: u32,

    /// 投票阈值.
    pub vote_threshold: f64,

    /// 提供结构掩膜的任务名.
    pub structural_task: String,

    /// 结构标签. 0 表示任意非零标签.
    pub structural_label: u8,

    /// 发现标签. 0 表示任意非零标签.
    pub finding_label: u8,

    /// 同时运行的推理个数上限.
    pub max_concurrent_inference: usize,

    /// 分割元数据描述文件.
    pub dicom_seg_meta: PathBuf,

    /// 编码前是否将所有标签加 1 (为背景预留标签).
    pub add_background_label: bool,

    /// 任务名 -> 回退输出文件名.
    pub output_names: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            source_series_dir: PathBuf::from("input"),
            target_dir: PathBuf::from("output"),
            scratch_dir: std::env::temp_dir().join("lung-berry"),
            fold_count: DEFAULT_FOLD_COUNT,
            vote_threshold: DEFAULT_VOTE_THRESHOLD,
            structural_task: DEFAULT_STRUCTURAL_TASK.to_string(),
            structural_label: label::BACKGROUND,
            finding_label: DEFAULT_FINDING_LABEL,
            max_concurrent_inference: 1,
            dicom_seg_meta: PathBuf::from("dicom_seg_meta.json"),
            add_background_label: false,
            output_names: [
                ("nodules", "seg_nodules_ensemble.nii.gz"),
                (DEFAULT_STRUCTURAL_TASK, "seg_lesions_ensemble.nii.gz"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        }
    }
}

/// 单个任务的配置.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskConfig {
    /// 任务名.
    pub name: String,

    /// 模型权重位置. 未设置时由调用者解析 (例如从环境变量).
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,

    /// 覆盖 `[runner] fold_count`.
    #[serde(default)]
    pub fold_count: Option<u32>,
}

impl TaskConfig {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            checkpoint: None,
            fold_count: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: General::default(),
            runner: RunnerConfig::default(),
            selection: SelectionPolicy::default(),
            tasks: vec![
                TaskConfig::named("nodules"),
                TaskConfig::named(DEFAULT_STRUCTURAL_TASK),
            ],
        }
    }
}

impl Config {
    /// 从 TOML 文本解析并检查配置.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载并检查配置.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// 检查配置一致性.
    pub fn validate(&self) -> Result<()> {
        let r = &self.runner;
        if r.fold_count == 0 || self.tasks.iter().any(|t| t.fold_count == Some(0)) {
            return Err(Error::InvalidConfig("fold_count must be at least 1".into()));
        }
        self.vote_threshold()?;
        if r.max_concurrent_inference == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_inference must be at least 1".into(),
            ));
        }
        if !self.tasks.iter().any(|t| t.name == r.structural_task) {
            return Err(Error::InvalidConfig(format!(
                "structural task `{}` is not declared in [[tasks]]",
                r.structural_task
            )));
        }
        if let Some(task) = r
            .output_names
            .keys()
            .find(|k| !self.tasks.iter().any(|t| &&t.name == k))
        {
            return Err(Error::InvalidConfig(format!(
                "output name given for undeclared task `{task}`"
            )));
        }
        Ok(())
    }

    /// 经过检查的投票阈值.
    pub fn vote_threshold(&self) -> Result<VoteThreshold> {
        let t = self.runner.vote_threshold;
        VoteThreshold::new(t)
            .ok_or_else(|| Error::InvalidConfig(format!("vote_threshold {t} not in (0, 1]")))
    }

    /// 以 `data_base_dir` 为基准解析 `path`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.general.data_base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_owned(),
        }
    }

    /// 转换为流水线参数.
    ///
    /// 未配置 `checkpoint` 的任务通过 `resolve_checkpoint(任务名)` 查找权重位置,
    /// 仍找不到时返回 [`Error::InvalidConfig`].
    pub fn into_settings<F>(self, resolve_checkpoint: F) -> Result<PipelineSettings>
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        self.validate()?;
        let vote_threshold = self.vote_threshold()?;

        let mut tasks = Vec::with_capacity(self.tasks.len());
        for t in self.tasks.iter() {
            let checkpoint = match &t.checkpoint {
                Some(p) => self.resolve(p),
                None => resolve_checkpoint(&t.name).ok_or_else(|| {
                    Error::InvalidConfig(format!("no checkpoint configured for task `{}`", t.name))
                })?,
            };
            let fold_count = t.fold_count.unwrap_or(self.runner.fold_count);
            let task = Task::new(t.name.as_str(), checkpoint, fold_count).ok_or_else(|| {
                Error::InvalidConfig(format!("task `{}` has no fold", t.name))
            })?;
            tasks.push(task);
        }

        let r = &self.runner;
        let settings = PipelineSettings {
            source_series_dir: self.resolve(&r.source_series_dir),
            target_dir: self.resolve(&r.target_dir),
            scratch_dir: self.resolve(&r.scratch_dir),
            tasks,
            structural_task: r.structural_task.clone(),
            structural_label: LabelMatch::from_config(r.structural_label),
            finding_label: LabelMatch::from_config(r.finding_label),
            vote_threshold,
            selection: self.selection,
            output_names: r.output_names.clone(),
            metadata: self.resolve(&r.dicom_seg_meta),
            max_concurrent_inference: r.max_concurrent_inference,
        };
        settings.validate()?;
        Ok(settings)
    }
}
