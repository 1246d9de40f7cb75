//! 通用常量.

/// 体素标签值.
pub mod label {
    /// 背景的体素值.
    pub const BACKGROUND: u8 = 0;

    /// 合成分割中, 结构区域 (肺部) 的体素值.
    pub const STRUCTURE: u8 = 1;

    /// 合成分割中, 限制在结构区域内的发现 (结节/病灶) 的体素值.
    pub const FINDING: u8 = 2;

    /// 二值掩膜中前景的体素值.
    pub const MASK_ON: u8 = 1;

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }

    /// 体素是否是前景 (任意非零标签)?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        !is_background(p)
    }

    /// 体素是否是发现?
    #[inline]
    pub const fn is_finding(p: u8) -> bool {
        matches!(p, FINDING)
    }
}

/// 每个任务默认的折数.
pub const DEFAULT_FOLD_COUNT: u32 = 5;

/// 默认投票阈值.
pub const DEFAULT_VOTE_THRESHOLD: f64 = 0.6;

/// 连通域筛选时默认跳过的排名靠前的区域个数.
pub const DEFAULT_SKIP_COMPONENTS: usize = 1;

/// 连通域筛选时默认最多保留的区域个数.
pub const DEFAULT_MAX_COMPONENTS: usize = 2;

/// 连通域被保留所需的体素个数下限 (严格大于).
pub const DEFAULT_MIN_VOXELS: usize = 20;

/// 源数据中发现类标签的默认值.
pub const DEFAULT_FINDING_LABEL: u8 = 9;

/// 默认提供结构 (肺部) 掩膜的任务名.
pub const DEFAULT_STRUCTURAL_TASK: &str = "nsclc_rg";

/// 临时目录下暂存 CT 的子目录名.
pub const CT_SCRATCH_DIR: &str = "ct";

/// 临时目录下折结果缓存的子目录名.
pub const FOLD_CACHE_DIR: &str = "folds";

/// 暂存 CT 的文件名.
pub const STAGED_CT_FILENAME: &str = "ct_0000.nii.gz";

/// 卷存储中 nii 文件的扩展名.
pub const NIFTI_EXT: &str = "nii.gz";

/// 临床格式 (DICOM-SEG) 输出文件的扩展名.
pub const CLINICAL_EXT: &str = "dcm";
