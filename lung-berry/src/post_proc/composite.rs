//! 结构掩膜与发现掩膜的标签合成.

use crate::consts::label::*;
use crate::{CtScan, Error, LabelVolume, NiftiHeaderAttr, Result};
use ndarray::Zip;

/// 将 `finding` 中位于 `structure` 之外的前景全部置零. 返回被置零的体素个数.
///
/// # 错误
///
/// 二者不 co-registered 时返回 [`Error::ShapeMismatch`], 此时 `finding` 不会被修改.
pub fn confine(finding: &mut LabelVolume, structure: &LabelVolume) -> Result<usize> {
    structure.ensure_co_registered(finding, "confining finding to structure")?;
    let mut cleared = 0usize;
    Zip::from(finding.data_mut())
        .and(structure.data())
        .for_each(|f, &s| {
            if is_foreground(*f) && is_background(s) {
                *f = BACKGROUND;
                cleared += 1;
            }
        });
    Ok(cleared)
}

/// 合成最终分割: 结构前景为 [`STRUCTURE`], 发现前景为 [`FINDING`], 其余为背景.
///
/// 输出的空间坐标系取自 `reference`.
///
/// # 错误
///
/// 1. 三者形状不一致时返回 [`Error::ShapeMismatch`];
/// 2. `finding` 在 `structure` 之外仍有前景时返回 [`Error::FindingOutsideStructure`].
///   调用者应先执行 [`confine`].
pub fn composite(
    structure: &LabelVolume,
    finding: &LabelVolume,
    reference: &CtScan,
) -> Result<LabelVolume> {
    for (v, context) in [(structure, "composite structure"), (finding, "composite finding")] {
        if v.shape() != reference.shape() {
            return Err(Error::ShapeMismatch {
                context: context.to_string(),
                expected: reference.shape(),
                found: v.shape(),
            });
        }
    }

    let outside = Zip::from(structure.data())
        .and(finding.data())
        .fold(0usize, |acc, &s, &f| {
            acc + usize::from(is_foreground(f) && is_background(s))
        });
    if outside > 0 {
        return Err(Error::FindingOutsideStructure { voxels: outside });
    }

    let merged = Zip::from(structure.data())
        .and(finding.data())
        .map_collect(|&s, &f| {
            if is_foreground(f) {
                FINDING
            } else if is_foreground(s) {
                STRUCTURE
            } else {
                BACKGROUND
            }
        });
    Ok(LabelVolume::with_frame_of(reference, merged))
}
