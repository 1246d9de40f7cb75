//! 多折投票融合.
//!
//! 每一折的结果先被归约为 "体素是否命中目标标签" 的指示量,
//! 再按票数比例与阈值比较, 得到集成掩膜.

use crate::consts::{label::*, DEFAULT_VOTE_THRESHOLD};
use crate::{Error, LabelVolume, NiftiHeaderAttr, Result};
use ndarray::{Array3, Zip};
use tracing::debug;

/// 单折结果中, 哪些体素算作一票.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LabelMatch {
    /// 体素值恰为给定标签.
    Exact(u8),

    /// 任意非零标签.
    Foreground,
}

impl LabelMatch {
    /// 体素值 `p` 是否命中?
    #[inline]
    pub fn matches(self, p: u8) -> bool {
        match self {
            LabelMatch::Exact(l) => p == l,
            LabelMatch::Foreground => is_foreground(p),
        }
    }

    /// 按配置惯例解析: 0 表示任意前景, 其余值表示精确匹配.
    #[inline]
    pub fn from_config(label: u8) -> Self {
        if is_background(label) {
            LabelMatch::Foreground
        } else {
            LabelMatch::Exact(label)
        }
    }
}

/// 投票阈值, 取值范围 (0, 1].
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct VoteThreshold(f64);

impl Default for VoteThreshold {
    fn default() -> Self {
        Self(DEFAULT_VOTE_THRESHOLD)
    }
}

impl VoteThreshold {
    /// 创建阈值. `t` 不在 (0, 1] 范围内 (包括 NaN) 时返回 `None`.
    #[inline]
    pub fn new(t: f64) -> Option<Self> {
        (t > 0.0 && t <= 1.0).then_some(Self(t))
    }

    /// 阈值本身.
    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }

    /// `n` 折参与投票时, 体素成为前景所需的最少票数,
    /// 即满足 `k / n >= t` 的最小 `k`.
    ///
    /// 例如 5 折, 阈值 0.6 时为 3.
    pub fn min_votes(self, n: usize) -> usize {
        (1..=n)
            .find(|&k| k as f64 / n as f64 >= self.0)
            .unwrap_or(n)
    }
}

/// 融合 `task` 的全部折结果 `folds`.
///
/// 输出掩膜中某体素为 [`MASK_ON`], 当且仅当命中 `target` 的折数不少于
/// `threshold.min_votes(folds.len())`. 输出沿用第一折的空间坐标系.
///
/// # 错误
///
/// 1. `folds` 为空时返回 [`Error::InvalidConfig`];
/// 2. 任意一折与第一折不 co-registered 时返回 [`Error::ShapeMismatch`].
pub fn fuse(
    task: &str,
    folds: &[LabelVolume],
    target: LabelMatch,
    threshold: VoteThreshold,
) -> Result<LabelVolume> {
    let (first, rest) = folds.split_first().ok_or_else(|| {
        Error::InvalidConfig(format!("no fold results to fuse for task `{task}`"))
    })?;
    for (i, f) in rest.iter().enumerate() {
        first.ensure_co_registered(f, &format!("fusion of `{task}` fold result #{}", i + 1))?;
    }

    let n = folds.len();
    let min_votes = threshold.min_votes(n) as u32;
    let mut votes = Array3::<u32>::zeros(first.shape());
    let vote = |v: &mut u32, &p: &u8| {
        if target.matches(p) {
            *v += 1;
        }
    };
    for f in folds {
        let zip = Zip::from(&mut votes).and(f.data());
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                zip.par_for_each(vote);
            } else {
                zip.for_each(vote);
            }
        }
    }

    let fused = votes.mapv(|v| if v >= min_votes { MASK_ON } else { BACKGROUND });
    let fused = LabelVolume::with_frame_of(first, fused);
    debug!(
        task,
        folds = n,
        min_votes,
        foreground = fused.foreground_count(),
        "ensemble fused"
    );
    Ok(fused)
}
