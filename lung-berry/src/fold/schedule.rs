//! 折推理调度.

use super::{FoldHandle, FoldRunner, Task};
use crate::{Error, Result, StagedCt};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
        use rayon::{ThreadPool, ThreadPoolBuilder};
        use std::sync::atomic::{AtomicBool, Ordering};
        use tracing::debug;
    }
}

/// 有界的折推理池. 所有任务共享同一个池, 因此同时运行的推理个数不会超过 `size`.
///
/// 未启用 `rayon` 特性时退化为顺序执行.
pub struct FoldPool {
    size: usize,

    #[cfg(feature = "rayon")]
    pool: ThreadPool,
}

impl FoldPool {
    /// 创建并发上限为 `size` 的推理池. `size` 必须至少为 1.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_inference must be at least 1".into(),
            ));
        }

        #[cfg(feature = "rayon")]
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("fold-worker-{i}"))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot build fold pool: {e}")))?;

        Ok(Self {
            size,
            #[cfg(feature = "rayon")]
            pool,
        })
    }

    /// 并发上限.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// 借助 `rayon`, 在池内并行执行 `task` 的全部折推理. 返回值按折索引排列.
    ///
    /// 任一折失败后, 该任务尚未开始的折不再调度, 返回第一个失败折的错误.
    #[cfg(feature = "rayon")]
    pub fn run_task(
        &self,
        runner: &FoldRunner<'_>,
        task: &Task,
        input: &StagedCt,
    ) -> Result<Vec<FoldHandle>> {
        let failed = AtomicBool::new(false);
        let results: Vec<Option<Result<FoldHandle>>> = self.pool.install(|| {
            task.folds()
                .into_par_iter()
                .map(|k| {
                    if failed.load(Ordering::Acquire) {
                        return None;
                    }
                    let r = runner.run(task, k, input);
                    if r.is_err() {
                        failed.store(true, Ordering::Release);
                    }
                    Some(r)
                })
                .collect()
        });

        let mut handles = Vec::with_capacity(results.len());
        for (k, r) in task.folds().zip(results) {
            match r {
                Some(r) => handles.push(r?),
                None => {
                    debug!(task = task.name(), fold = k, "fold skipped after failure");
                }
            }
        }
        if handles.len() < task.fold_count() as usize {
            return Err(Error::InferenceFailed {
                task: task.name().to_string(),
                fold: handles.len() as u32,
                reason: "fold skipped".into(),
            });
        }
        Ok(handles)
    }

    /// 顺序执行 `task` 的全部折推理. 返回值按折索引排列.
    ///
    /// 遇到第一个失败的折即停止.
    #[cfg(not(feature = "rayon"))]
    pub fn run_task(
        &self,
        runner: &FoldRunner<'_>,
        task: &Task,
        input: &StagedCt,
    ) -> Result<Vec<FoldHandle>> {
        task.folds().map(|k| runner.run(task, k, input)).collect()
    }
}

impl std::fmt::Debug for FoldPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FoldPool").field("size", &self.size).finish()
    }
}
