//! 折 (fold) 推理.
//!
//! 同一任务的每一折都是独立训练的模型. 对每个 (task, fold) 组合,
//! [`FoldRunner`] 至多调用一次外部推理后端, 结果以 `{task}_{fold}` 为键写入卷存储.

use crate::store::{fold_key, VolumeStore};
use crate::{Error, LabelVolume, NiftiHeaderAttr, Result, StagedCt};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

mod schedule;

pub use schedule::FoldPool;

/// 分割任务. 折数在构造时固定.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    name: String,
    checkpoint: PathBuf,
    fold_count: u32,
}

impl Task {
    /// 创建任务. `fold_count` 为 0 时返回 `None`.
    pub fn new<S: Into<String>, P: Into<PathBuf>>(
        name: S,
        checkpoint: P,
        fold_count: u32,
    ) -> Option<Self> {
        (fold_count > 0).then(|| Self {
            name: name.into(),
            checkpoint: checkpoint.into(),
            fold_count,
        })
    }

    /// 任务名, 同时也是缓存键的前缀.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 模型权重位置.
    #[inline]
    pub fn checkpoint(&self) -> &Path {
        &self.checkpoint
    }

    /// 折数.
    #[inline]
    pub fn fold_count(&self) -> u32 {
        self.fold_count
    }

    /// 全部折索引.
    #[inline]
    pub fn folds(&self) -> Range<u32> {
        0..self.fold_count
    }
}

/// 外部推理后端. 对单个 CT 体积执行某一折模型的逐体素推理.
///
/// 实现可以是外部进程, 也可以是测试中的假后端.
pub trait InferenceBackend: Send + Sync {
    /// 使用 `task.checkpoint()` 下第 `fold` 折的模型对 `input` 推理.
    ///
    /// 返回的标签体积应与 `input.scan` 形状一致.
    fn infer(&self, task: &Task, fold: u32, input: &StagedCt) -> Result<LabelVolume>;
}

/// 一次折推理的结果句柄. 结果本身位于卷存储的 `key` 下.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldHandle {
    /// 任务名.
    pub task: String,

    /// 折索引.
    pub fold: u32,

    /// 卷存储中的键.
    pub key: String,

    /// 结果是否来自缓存 (即本次没有调用推理后端).
    pub cached: bool,
}

impl FoldHandle {
    /// 从卷存储中读取结果.
    #[inline]
    pub fn load(&self, store: &dyn VolumeStore) -> Result<LabelVolume> {
        store.load(&self.key)
    }
}

/// 幂等的折推理执行器.
#[derive(Clone, Copy)]
pub struct FoldRunner<'a> {
    backend: &'a dyn InferenceBackend,
    store: &'a dyn VolumeStore,
}

impl<'a> FoldRunner<'a> {
    /// 初始化.
    pub fn new(backend: &'a dyn InferenceBackend, store: &'a dyn VolumeStore) -> Self {
        Self { backend, store }
    }

    /// 底层卷存储.
    #[inline]
    pub fn store(&self) -> &'a dyn VolumeStore {
        self.store
    }

    /// 执行 `task` 的第 `fold` 折推理.
    ///
    /// 1. 若卷存储中已存在 `{task}_{fold}`, 直接返回, 不调用后端;
    /// 2. 否则调用后端, 并将结果写入该键.
    ///
    /// 后端失败被包装为 [`Error::InferenceFailed`], 不会重试, 也不会写入任何内容.
    pub fn run(&self, task: &Task, fold: u32, input: &StagedCt) -> Result<FoldHandle> {
        if fold >= task.fold_count() {
            return Err(Error::InvalidConfig(format!(
                "fold {fold} out of range for task `{}` with {} folds",
                task.name(),
                task.fold_count()
            )));
        }

        let key = fold_key(task.name(), fold);
        let handle = |cached| FoldHandle {
            task: task.name().to_string(),
            fold,
            key: key.clone(),
            cached,
        };

        if self.store.contains(&key) {
            info!(task = task.name(), fold, key = %key, "fold result cached, skipping inference");
            return Ok(handle(true));
        }

        debug!(task = task.name(), fold, "running inference");
        let mask = self
            .backend
            .infer(task, fold, input)
            .map_err(|e| match e {
                e @ Error::InferenceFailed { .. } => e,
                other => Error::InferenceFailed {
                    task: task.name().to_string(),
                    fold,
                    reason: other.to_string(),
                },
            })?;
        if mask.shape() != input.scan.shape() {
            return Err(Error::ShapeMismatch {
                context: format!("inference output of `{key}`"),
                expected: input.scan.shape(),
                found: mask.shape(),
            });
        }
        self.store.save(&key, &mask)?;
        info!(task = task.name(), fold, key = %key, "fold inferred");
        Ok(handle(false))
    }
}
