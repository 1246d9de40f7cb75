//! 流水线编排器.

use super::{
    clinical_file_name, ClinicalEncoder, CtIngest, Delivery, EncodeRequest, RunReport,
    SeriesRepair, TaskOutcome,
};
use crate::consts::{CT_SCRATCH_DIR, STAGED_CT_FILENAME};
use crate::fold::{FoldHandle, FoldPool, FoldRunner, InferenceBackend, Task};
use crate::fusion::{fuse, LabelMatch, VoteThreshold};
use crate::post_proc::{composite, confine, select, SelectionPolicy};
use crate::store::{
    composite_key, ensemble_key, structural_ensemble_key, VolumeStore, STRUCTURAL_KEY,
};
use crate::{Error, LabelVolume, NiftiHeaderAttr, Result, StagedCt};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 流水线参数.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// 输入 DICOM 序列目录.
    pub source_series_dir: PathBuf,

    /// 输出目录. 每个任务在其中恰好留下一个产物.
    pub target_dir: PathBuf,

    /// 临时目录. 暂存 CT 位于 `{scratch_dir}/ct/ct_0000.nii.gz`.
    pub scratch_dir: PathBuf,

    /// 全部任务. 每个任务都会执行折推理.
    pub tasks: Vec<Task>,

    /// 提供结构掩膜的任务名.
    pub structural_task: String,

    /// 构造结构掩膜时, 哪些体素算作一票.
    pub structural_label: LabelMatch,

    /// 构造发现掩膜时, 哪些体素算作一票.
    pub finding_label: LabelMatch,

    /// 投票阈值.
    pub vote_threshold: VoteThreshold,

    /// 结构掩膜的连通域筛选策略.
    pub selection: SelectionPolicy,

    /// 任务名 -> 回退输出文件名. 只有出现在这里的任务才会产出结果.
    pub output_names: BTreeMap<String, String>,

    /// 分割元数据描述文件.
    pub metadata: PathBuf,

    /// 同时运行的推理个数上限.
    pub max_concurrent_inference: usize,
}

impl PipelineSettings {
    /// 检查参数一致性.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if self.tasks.is_empty() {
            return invalid("no task declared".into());
        }
        let mut names = HashSet::with_capacity(self.tasks.len());
        for t in self.tasks.iter() {
            if !names.insert(t.name()) {
                return invalid(format!("task `{}` declared twice", t.name()));
            }
        }
        if !names.contains(self.structural_task.as_str()) {
            return invalid(format!(
                "structural task `{}` is not declared",
                self.structural_task
            ));
        }
        if self.output_names.is_empty() {
            return invalid("no output name configured".into());
        }
        for (task, name) in self.output_names.iter() {
            if !names.contains(task.as_str()) {
                return invalid(format!("output name given for undeclared task `{task}`"));
            }
            if name.is_empty() {
                return invalid(format!("empty output name for task `{task}`"));
            }
            if clinical_file_name(name) == *name {
                return invalid(format!(
                    "output name `{name}` of task `{task}` collides with its clinical output"
                ));
            }
        }
        if self.max_concurrent_inference == 0 {
            return invalid("max_concurrent_inference must be at least 1".into());
        }
        Ok(())
    }

    /// 暂存 CT 的位置.
    pub fn staged_ct_path(&self) -> PathBuf {
        self.scratch_dir
            .join(CT_SCRATCH_DIR)
            .join(STAGED_CT_FILENAME)
    }

    /// 需要产出结果的任务, 按声明顺序排列.
    fn finding_tasks(&self) -> impl Iterator<Item = &str> + '_ {
        self.tasks
            .iter()
            .map(Task::name)
            .filter(|n| self.output_names.contains_key(*n))
    }
}

/// 流水线依赖的全部外部协作者.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// CT 转换.
    pub ingest: &'a dyn CtIngest,

    /// 推理后端.
    pub backend: &'a dyn InferenceBackend,

    /// 临床格式编码.
    pub encoder: &'a dyn ClinicalEncoder,

    /// 元数据修复.
    pub repair: &'a dyn SeriesRepair,

    /// 卷存储, 同时也是断点续跑的缓存.
    pub store: &'a dyn VolumeStore,
}

/// 流水线编排器.
///
/// 每个任务依次经历 转换 -> 推理 -> 融合 -> 筛选 -> 合成 -> 编码 几个阶段.
/// 各任务的推理与收尾分别在独立的 scoped 线程中并行执行,
/// 推理本身则受共享 [`FoldPool`] 的并发上限约束.
///
/// # 注意
///
/// 1. 只有 CT 转换失败 (或暂存失败) 会令整个运行返回 `Err`.
///   其它失败都只记录在对应任务的 [`TaskOutcome::Failed`] 中.
/// 2. 结构任务失败时, 其它任务以 [`Error::StructureUnavailable`] 失败.
/// 3. 临床格式编码失败时, 原始合成体积被写到该任务的回退输出位置.
pub struct Orchestrator<'a> {
    settings: PipelineSettings,
    with: Collaborators<'a>,
    pool: FoldPool,
}

impl<'a> Orchestrator<'a> {
    /// 检查参数并初始化.
    pub fn new(settings: PipelineSettings, with: Collaborators<'a>) -> Result<Self> {
        settings.validate()?;
        let pool = FoldPool::new(settings.max_concurrent_inference)?;
        Ok(Self {
            settings,
            with,
            pool,
        })
    }

    /// 执行一次完整运行.
    pub fn run(&self) -> Result<RunReport> {
        let start = Instant::now();
        let staged = self.stage_ct()?;
        let mut inferred = self.infer_all(&staged);

        let structural = self.settings.structural_task.as_str();
        let (structure, mut structure_err) = match inferred.get(structural) {
            Some(Ok(handles)) => match self.refine_structure(handles, &staged) {
                Ok(s) => (Some(s), None),
                Err(e) => {
                    error!(task = structural, error = %e, "structural refinement failed");
                    (None, Some(e))
                }
            },
            _ => (None, None),
        };
        let unavailable = || Error::StructureUnavailable {
            task: structural.to_string(),
        };

        let prepared: Vec<(&str, Result<Vec<FoldHandle>>)> = self
            .settings
            .finding_tasks()
            .map(|task| {
                let r = match inferred.remove(task) {
                    Some(Err(e)) => Err(e),
                    Some(Ok(h)) if structure.is_some() => Ok(h),
                    Some(Ok(_)) if task == structural => {
                        Err(structure_err.take().unwrap_or_else(unavailable))
                    }
                    Some(Ok(_)) => Err(unavailable()),
                    None => Err(Error::InvalidConfig(format!("task `{task}` was not inferred"))),
                };
                (task, r)
            })
            .collect();

        let reference = self.repair_series();
        let (staged_ref, reference) = (&staged, reference.as_path());
        let finished: Vec<(&str, Result<Delivery>)> = thread::scope(|s| {
            let jobs: Vec<_> = prepared
                .into_iter()
                .map(|(task, r)| {
                    let job = r.and_then(|folds| {
                        let structure = structure.as_ref().ok_or_else(unavailable)?;
                        Ok(s.spawn(move || {
                            self.finish_task(task, &folds, structure, staged_ref, reference)
                        }))
                    });
                    (task, job)
                })
                .collect();

            jobs.into_iter()
                .map(|(task, job)| {
                    let r = job.and_then(|th| {
                        th.join()
                            .unwrap_or_else(|_| Err(Error::Panicked(task.to_string())))
                    });
                    (task, r)
                })
                .collect()
        });

        let outcomes = finished
            .into_iter()
            .map(|(task, r)| {
                let outcome = match r {
                    Ok(d @ Delivery::Clinical(_)) => {
                        info!(task, path = %d.path().display(), "task delivered");
                        TaskOutcome::Delivered(d)
                    }
                    Ok(d) => {
                        warn!(
                            task,
                            path = %d.path().display(),
                            "task delivered raw composite only"
                        );
                        TaskOutcome::Delivered(d)
                    }
                    Err(e) => {
                        error!(task, error = %e, "task failed");
                        TaskOutcome::Failed(e)
                    }
                };
                (task.to_string(), outcome)
            })
            .collect();

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(RunReport {
            ct: staged.path,
            outcomes,
        })
    }

    /// 转换并暂存 CT.
    fn stage_ct(&self) -> Result<StagedCt> {
        let source = &self.settings.source_series_dir;
        info!(series = %source.display(), "converting CT series");
        let scan = self.with.ingest.convert(source).map_err(|e| match e {
            e @ Error::Conversion(_) => e,
            other => Error::Conversion(other.to_string()),
        })?;

        let path = self.settings.staged_ct_path();
        scan.save(&path)?;
        info!(path = %path.display(), shape = ?scan.shape(), "CT staged");
        Ok(StagedCt { scan, path })
    }

    /// 对全部任务执行折推理. 每个任务一个线程, 返回前等待所有任务结束.
    fn infer_all(&self, staged: &StagedCt) -> BTreeMap<&str, Result<Vec<FoldHandle>>> {
        let runner = FoldRunner::new(self.with.backend, self.with.store);
        let (runner, pool) = (&runner, &self.pool);

        thread::scope(|s| {
            let handles: Vec<_> = self
                .settings
                .tasks
                .iter()
                .map(|task| {
                    let th = s.spawn(move || {
                        info!(task = task.name(), folds = task.fold_count(), "inferring");
                        pool.run_task(runner, task, staged)
                    });
                    (task.name(), th)
                })
                .collect();

            handles
                .into_iter()
                .map(|(name, th)| {
                    let r = th
                        .join()
                        .unwrap_or_else(|_| Err(Error::Panicked(name.to_string())));
                    if let Err(e) = &r {
                        error!(task = name, error = %e, "inference failed");
                    }
                    (name, r)
                })
                .collect()
        })
    }

    /// 融合结构任务的折结果并筛选连通域, 得到结构掩膜.
    fn refine_structure(&self, handles: &[FoldHandle], staged: &StagedCt) -> Result<LabelVolume> {
        let store = self.with.store;
        if store.contains(STRUCTURAL_KEY) {
            let s = store.load(STRUCTURAL_KEY)?;
            staged.scan.ensure_co_registered(&s, "cached structural mask")?;
            info!(key = STRUCTURAL_KEY, "structural mask cached");
            return Ok(s);
        }

        let task = self.settings.structural_task.as_str();
        info!(task, "fusing structural mask");
        let folds = load_folds(store, handles)?;
        let ensemble = fuse(
            task,
            &folds,
            self.settings.structural_label,
            self.settings.vote_threshold,
        )?;
        staged.scan.ensure_co_registered(&ensemble, "structural ensemble")?;
        store.save(&structural_ensemble_key(task), &ensemble)?;

        let refined = select(&ensemble, &self.settings.selection);
        info!(
            task,
            before = ensemble.foreground_count(),
            after = refined.foreground_count(),
            "structural mask refined"
        );
        store.save(STRUCTURAL_KEY, &refined)?;
        Ok(refined)
    }

    /// 修复参考序列. 修复失败时沿用原序列.
    fn repair_series(&self) -> PathBuf {
        let source = &self.settings.source_series_dir;
        match self.with.repair.repair(source) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "series repair failed, using original series");
                source.clone()
            }
        }
    }

    /// 单个任务的收尾: 融合, 限制, 合成, 编码.
    fn finish_task(
        &self,
        task: &str,
        handles: &[FoldHandle],
        structure: &LabelVolume,
        staged: &StagedCt,
        reference: &Path,
    ) -> Result<Delivery> {
        let store = self.with.store;
        let key = composite_key(task);
        let seg = if store.contains(&key) {
            let seg = store.load(&key)?;
            staged.scan.ensure_co_registered(&seg, "cached composite")?;
            info!(task, key = %key, "composite cached, skipping post-processing");
            seg
        } else {
            info!(task, "fusing findings");
            let folds = load_folds(store, handles)?;
            let mut finding = fuse(
                task,
                &folds,
                self.settings.finding_label,
                self.settings.vote_threshold,
            )?;
            staged.scan.ensure_co_registered(&finding, "finding ensemble")?;
            store.save(&ensemble_key(task), &finding)?;

            let cleared = confine(&mut finding, structure)?;
            debug!(task, cleared, "finding confined to structure");
            let seg = composite(structure, &finding, &staged.scan)?;
            store.save(&key, &seg)?;
            seg
        };

        let located = store.locate(&key);
        self.deliver(task, &seg, located.as_deref(), reference)
    }

    /// 编码合成分割. 编码失败时写出原始合成体积.
    fn deliver(
        &self,
        task: &str,
        seg: &LabelVolume,
        composite_path: Option<&Path>,
        reference: &Path,
    ) -> Result<Delivery> {
        let name = self
            .settings
            .output_names
            .get(task)
            .ok_or_else(|| Error::InvalidConfig(format!("no output name for task `{task}`")))?;
        let target = &self.settings.target_dir;
        fs::create_dir_all(target)?;
        let fallback = target.join(name);
        let clinical = target.join(clinical_file_name(name));

        let request = EncodeRequest {
            task,
            composite: seg,
            composite_path,
            reference_series: reference,
            metadata: &self.settings.metadata,
            output: &clinical,
        };
        info!(task, output = %clinical.display(), "encoding");
        match self.with.encoder.encode(&request) {
            Ok(path) => {
                if fallback != path && fallback.exists() {
                    fs::remove_file(&fallback)?;
                }
                Ok(Delivery::Clinical(path))
            }
            Err(e) => {
                warn!(task, error = %e, "clinical encoding failed, emitting raw composite");
                seg.save(&fallback)?;
                if clinical.exists() {
                    if let Err(rm) = fs::remove_file(&clinical) {
                        warn!(
                            task,
                            path = %clinical.display(),
                            error = %rm,
                            "cannot remove partial clinical output"
                        );
                    }
                }
                Ok(Delivery::Fallback {
                    path: fallback,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[inline]
fn load_folds(store: &dyn VolumeStore, handles: &[FoldHandle]) -> Result<Vec<LabelVolume>> {
    handles.iter().map(|h| h.load(store)).collect()
}
