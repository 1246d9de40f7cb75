//! 任务结局与运行报告.

use crate::Error;
use std::path::{Path, PathBuf};

/// 成功交付的产物.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 临床格式产物.
    Clinical(PathBuf),

    /// 临床格式编码失败, 交付了原始合成体积.
    Fallback {
        /// 原始合成体积的位置.
        path: PathBuf,
        /// 编码失败的原因.
        reason: String,
    },
}

impl Delivery {
    /// 产物位置.
    #[inline]
    pub fn path(&self) -> &Path {
        match self {
            Delivery::Clinical(p) => p,
            Delivery::Fallback { path, .. } => path,
        }
    }

    /// 是否是回退产物?
    #[inline]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Delivery::Fallback { .. })
    }
}

/// 单个任务的最终结局.
#[derive(Debug)]
pub enum TaskOutcome {
    /// 已交付.
    Delivered(Delivery),

    /// 失败. 不影响其它任务.
    Failed(Error),
}

impl TaskOutcome {
    /// 是否已交付?
    #[inline]
    pub fn is_delivered(&self) -> bool {
        matches!(self, TaskOutcome::Delivered(_))
    }
}

/// 一次运行的报告. 任务按配置中声明的顺序排列.
#[derive(Debug)]
pub struct RunReport {
    /// 暂存的 CT 位置.
    pub ct: PathBuf,

    /// `(任务名, 结局)`.
    pub outcomes: Vec<(String, TaskOutcome)>,
}

impl RunReport {
    /// 获取任务 `task` 的结局.
    pub fn outcome(&self, task: &str) -> Option<&TaskOutcome> {
        self.outcomes
            .iter()
            .find_map(|(name, o)| (name == task).then_some(o))
    }

    /// 是否所有任务都已交付 (包括回退交付)?
    pub fn all_delivered(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.is_delivered())
    }

    /// 失败任务个数.
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| !o.is_delivered()).count()
    }

    /// 回退交付的任务个数.
    pub fn fallback_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, TaskOutcome::Delivered(d) if d.is_fallback()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let report = RunReport {
            ct: "ct_0000.nii.gz".into(),
            outcomes: vec![
                (
                    "nodules".into(),
                    TaskOutcome::Delivered(Delivery::Fallback {
                        path: "out/seg_nodules_ensemble.nii.gz".into(),
                        reason: "dcmqi missing".into(),
                    }),
                ),
                (
                    "nsclc_rg".into(),
                    TaskOutcome::Failed(Error::StructureUnavailable {
                        task: "nsclc_rg".into(),
                    }),
                ),
            ],
        };
        assert!(!report.all_delivered());
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.fallback_count(), 1);
        let Some(TaskOutcome::Delivered(d)) = report.outcome("nodules") else {
            panic!("nodules must be delivered");
        };
        assert!(d.path().ends_with("seg_nodules_ensemble.nii.gz"));
        assert!(report.outcome("missing").is_none());
    }
}
