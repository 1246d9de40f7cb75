//! 卷存储. 按逻辑名读写 3D 标签体积.
//!
//! 折推理结果, 集成掩膜, 结构掩膜与合成分割都以逻辑键缓存在这里.
//! 键的构造集中在本模块, 保证不同组件对同一产物得到同一个键.

use crate::{LabelVolume, Result};
use std::path::PathBuf;

mod memory;
mod nifti_dir;

pub use memory::MemoryStore;
pub use nifti_dir::NiftiStore;

/// 精化后结构掩膜的键.
pub const STRUCTURAL_KEY: &str = "structural_refined";

/// 折推理结果的键: `{task}_{fold}`.
#[inline]
pub fn fold_key(task: &str, fold: u32) -> String {
    format!("{task}_{fold}")
}

/// 某任务在发现标签下的集成掩膜的键.
#[inline]
pub fn ensemble_key(task: &str) -> String {
    format!("{task}_ensemble")
}

/// 结构任务在结构标签下的集成掩膜的键 (连通域筛选之前).
#[inline]
pub fn structural_ensemble_key(task: &str) -> String {
    format!("{task}_structure_ensemble")
}

/// 某任务合成分割的键.
#[inline]
pub fn composite_key(task: &str) -> String {
    format!("{task}_composite")
}

/// 按逻辑名寻址的标签体积存储.
///
/// # 注意
///
/// 1. `contains` 是幂等性判断的唯一依据 ("存在即完成"),
///   因此实现必须保证 `save` 的原子性: 读者不能观察到写了一半的体积.
/// 2. 实现需要是 `Send + Sync` 的, 多个任务线程会共享同一个存储.
pub trait VolumeStore: Send + Sync {
    /// 是否已存在 `key` 对应的体积?
    fn contains(&self, key: &str) -> bool;

    /// 读取 `key` 对应的体积. 不存在时返回 [`crate::Error::MissingVolume`].
    fn load(&self, key: &str) -> Result<LabelVolume>;

    /// 写入 `key` 对应的体积, 覆盖已有内容.
    fn save(&self, key: &str, volume: &LabelVolume) -> Result<()>;

    /// `key` 在文件系统上的位置. 纯内存实现返回 `None`.
    fn locate(&self, key: &str) -> Option<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_distinct() {
        let keys = [
            fold_key("nsclc_rg", 0),
            ensemble_key("nsclc_rg"),
            structural_ensemble_key("nsclc_rg"),
            composite_key("nsclc_rg"),
            STRUCTURAL_KEY.to_string(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_eq!(fold_key("nodules", 3), "nodules_3");
    }
}
