//! 流水线编排.
//!
//! 依次驱动 CT 转换, 折推理, 投票融合, 连通域筛选, 标签合成与临床格式输出.
//! DICOM 的解码与编码以及元数据修复都由外部协作者完成, 本模块只定义它们的接口.

use crate::consts::CLINICAL_EXT;
use crate::{CtScan, LabelVolume, Result};
use std::path::{Path, PathBuf};

mod orchestrator;
mod outcome;

pub use orchestrator::{Collaborators, Orchestrator, PipelineSettings};
pub use outcome::{Delivery, RunReport, TaskOutcome};

/// CT 转换协作者.
pub trait CtIngest: Send + Sync {
    /// 将 `series_dir` 下的 DICOM 序列转换为单个 CT 体积.
    ///
    /// 找不到或找到多个候选体积时返回 [`crate::Error::Conversion`].
    fn convert(&self, series_dir: &Path) -> Result<CtScan>;
}

/// 一次临床格式编码请求.
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    /// 任务名.
    pub task: &'a str,

    /// 合成分割.
    pub composite: &'a LabelVolume,

    /// 合成分割在文件系统上的位置 (若卷存储落盘).
    pub composite_path: Option<&'a Path>,

    /// 参考 DICOM 序列目录.
    pub reference_series: &'a Path,

    /// 分割元数据描述文件 (标签编号 -> 分割名称与属性).
    pub metadata: &'a Path,

    /// 期望的输出位置.
    pub output: &'a Path,
}

/// 临床格式编码协作者.
pub trait ClinicalEncoder: Send + Sync {
    /// 编码并写出临床格式产物, 返回产物位置.
    ///
    /// 失败时返回 [`crate::Error::Encoding`]. 失败时可能在 `request.output`
    /// 留下不完整的文件, 由调用者负责清理.
    fn encode(&self, request: &EncodeRequest<'_>) -> Result<PathBuf>;
}

/// DICOM 元数据修复协作者.
pub trait SeriesRepair: Send + Sync {
    /// 修复 `series_dir`, 返回修复后的序列目录.
    fn repair(&self, series_dir: &Path) -> Result<PathBuf>;
}

/// 不做任何修复, 原样返回序列目录.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRepair;

impl SeriesRepair for NoRepair {
    #[inline]
    fn repair(&self, series_dir: &Path) -> Result<PathBuf> {
        Ok(series_dir.to_owned())
    }
}

/// 由回退输出文件名得到临床格式输出文件名: 取第一个 `.` 之前的部分, 再加 `.dcm`.
///
/// ```
/// use lung_berry::pipeline::clinical_file_name;
///
/// assert_eq!(clinical_file_name("seg_nodules_ensemble.nii.gz"), "seg_nodules_ensemble.dcm");
/// ```
pub fn clinical_file_name(output_name: &str) -> String {
    let stem = output_name.split('.').next().unwrap_or(output_name);
    format!("{stem}.{CLINICAL_EXT}")
}

#[cfg(test)]
mod tests {
    use super::{clinical_file_name, NoRepair, SeriesRepair};
    use std::path::Path;

    #[test]
    fn test_clinical_file_name() {
        assert_eq!(clinical_file_name("seg_lesions_ensemble.nii.gz"), "seg_lesions_ensemble.dcm");
        assert_eq!(clinical_file_name("plain"), "plain.dcm");
    }

    #[test]
    fn test_no_repair() {
        let dir = Path::new("/data/ct");
        assert_eq!(NoRepair.repair(dir).unwrap(), dir);
    }
}
