//! 3D 连通域标记、排序与筛选.

use crate::consts::label::*;
use crate::consts::{DEFAULT_MAX_COMPONENTS, DEFAULT_MIN_VOXELS, DEFAULT_SKIP_COMPONENTS};
use crate::{Idx3d, LabelVolume};
use ndarray::Array3;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::debug;

/// 体素相邻规则.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// 共面相邻, 每个体素 6 个邻居.
    Face6,

    /// 共面、共边或共顶点相邻, 每个体素 26 个邻居.
    #[default]
    Full26,
}

impl Connectivity {
    /// 全部邻居偏移量 `(dz, dh, dw)`.
    pub fn offsets(self) -> Vec<(isize, isize, isize)> {
        let mut ans = Vec::with_capacity(26);
        for dz in -1isize..=1 {
            for dh in -1isize..=1 {
                for dw in -1isize..=1 {
                    let manhattan = dz.abs() + dh.abs() + dw.abs();
                    let ok = match self {
                        Connectivity::Face6 => manhattan == 1,
                        Connectivity::Full26 => manhattan != 0,
                    };
                    if ok {
                        ans.push((dz, dh, dw));
                    }
                }
            }
        }
        ans
    }
}

/// 连通域筛选策略.
///
/// 按体素个数降序排列所有区域后, 跳过前 `skip` 名, 在随后的 `keep` 名中
/// 保留体素个数严格大于 `min_voxels` 的连通域, 其余全部置零.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// 跳过的名次个数.
    pub skip: usize,

    /// 参与保留判断的名次个数.
    pub keep: usize,

    /// 体素个数下限 (严格大于才保留).
    pub min_voxels: usize,

    /// 相邻规则.
    pub connectivity: Connectivity,

    /// 背景是否作为一个区域参与排序.
    ///
    /// 为真时背景通常占据第 1 名并因此被跳过. 背景本身永远不会被写为前景,
    /// 但它仍占用名次.
    pub rank_background: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            skip: DEFAULT_SKIP_COMPONENTS,
            keep: DEFAULT_MAX_COMPONENTS,
            min_voxels: DEFAULT_MIN_VOXELS,
            connectivity: Connectivity::default(),
            rank_background: true,
        }
    }
}

/// 连通域标记结果. 背景编号为 0, 连通域按首个体素的光栅顺序 `(z, h, w)`
/// 从 1 开始编号.
#[derive(Debug, Clone)]
pub struct Components {
    labels: Array3<u32>,
    counts: Vec<usize>,
}

impl Components {
    /// 连通域个数 (不含背景).
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// 是否没有任何连通域?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// 第 `id` 个连通域的体素个数. `id` 为 0 时返回背景体素个数.
    pub fn count(&self, id: u32) -> usize {
        match id {
            0 => self.labels.len() - self.counts.iter().sum::<usize>(),
            id => self.counts.get(id as usize - 1).copied().unwrap_or(0),
        }
    }

    /// 体素 `pos` 所属的连通域编号.
    #[inline]
    pub fn id_at(&self, pos: Idx3d) -> u32 {
        self.labels[pos]
    }
}

/// 排序后的区域.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ranked {
    /// 区域编号, 0 为背景.
    pub id: u32,

    /// 体素个数.
    pub count: usize,
}

/// 按 `conn` 规则标记 `mask` 的全部前景连通域.
pub fn label_components(mask: &LabelVolume, conn: Connectivity) -> Components {
    let data = mask.data();
    let (z, h, w) = data.dim();
    let offsets = conn.offsets();
    let mut labels = Array3::<u32>::zeros((z, h, w));
    let mut counts = Vec::new();
    let mut bfs_q = VecDeque::with_capacity(64);

    #[inline]
    fn shift(p: usize, d: isize, bound: usize) -> Option<usize> {
        p.checked_add_signed(d).filter(|&v| v < bound)
    }

    // 标准布局下 `indexed_iter` 即光栅顺序.
    for (pos, &p) in data.indexed_iter() {
        if is_background(p) || labels[pos] != 0 {
            continue;
        }
        let id = counts.len() as u32 + 1;
        labels[pos] = id;
        bfs_q.push_back(pos);
        let mut cnt = 0usize;

        while let Some((cz, ch, cw)) = bfs_q.pop_front() {
            cnt += 1;
            for &(dz, dh, dw) in offsets.iter() {
                let (Some(nz), Some(nh), Some(nw)) =
                    (shift(cz, dz, z), shift(ch, dh, h), shift(cw, dw, w))
                else {
                    continue;
                };
                let next = (nz, nh, nw);
                if is_foreground(data[next]) && labels[next] == 0 {
                    labels[next] = id;
                    bfs_q.push_back(next);
                }
            }
        }
        counts.push(cnt);
    }

    Components { labels, counts }
}

/// 将全部区域按体素个数降序排列. 个数相同时编号小者在前.
///
/// `include_background` 为真且背景非空时, 背景 (编号 0) 也参与排序.
pub fn ranking(components: &Components, include_background: bool) -> Vec<Ranked> {
    let background = (include_background && components.count(0) > 0).then_some(Ranked {
        id: 0,
        count: components.count(0),
    });
    let mut ans: Vec<Ranked> = background
        .into_iter()
        .chain(components.counts.iter().enumerate().map(|(i, &count)| Ranked {
            id: i as u32 + 1,
            count,
        }))
        .collect();
    // 稳定排序: 编号本身已升序.
    ans.sort_by(|a, b| b.count.cmp(&a.count));
    ans
}

/// 按 `policy` 筛选 `mask` 的连通域, 返回新的二值掩膜 (前景为 [`MASK_ON`]).
///
/// 结果的前景永远是输入前景的子集. 没有合格区域时返回全零掩膜.
pub fn select(mask: &LabelVolume, policy: &SelectionPolicy) -> LabelVolume {
    let components = label_components(mask, policy.connectivity);
    let ranked = ranking(&components, policy.rank_background);
    debug!(
        components = components.len(),
        top = ?&ranked[..ranked.len().min(policy.skip + policy.keep)],
        "component ranking"
    );

    let mut kept = vec![false; components.len() + 1];
    for r in ranked.iter().skip(policy.skip).take(policy.keep) {
        if r.id != 0 && r.count > policy.min_voxels {
            kept[r.id as usize] = true;
        }
    }

    let refined = components
        .labels
        .mapv(|id| if kept[id as usize] { MASK_ON } else { BACKGROUND });
    LabelVolume::with_frame_of(mask, refined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NiftiHeaderAttr;

    /// 在 `data` 中从 `(z, 0, w0)` 开始填充一个 `len` 体素长的行.
    fn fill_row(data: &mut Array3<u8>, z: usize, h: usize, w0: usize, len: usize) {
        for w in w0..w0 + len {
            data[(z, h, w)] = 1;
        }
    }

    fn volume(data: Array3<u8>) -> LabelVolume {
        LabelVolume::fake(data, [1.0, 1.0, 1.0])
    }

    #[test]
    fn test_offsets() {
        assert_eq!(Connectivity::Face6.offsets().len(), 6);
        assert_eq!(Connectivity::Full26.offsets().len(), 26);
    }

    #[test]
    fn test_diagonal_connectivity() {
        let mut data = Array3::zeros((2, 2, 2));
        data[(0, 0, 0)] = 1;
        data[(1, 1, 1)] = 1;
        let v = volume(data);
        assert_eq!(label_components(&v, Connectivity::Full26).len(), 1);
        let c = label_components(&v, Connectivity::Face6);
        assert_eq!(c.len(), 2);
        assert_eq!(c.id_at((0, 0, 0)), 1);
        assert_eq!(c.id_at((1, 1, 1)), 2);
        assert_eq!(c.count(0), 6);
    }

    #[test]
    fn test_ranking_ties_by_id() {
        let mut data = Array3::zeros((1, 5, 10));
        fill_row(&mut data, 0, 0, 0, 3);
        fill_row(&mut data, 0, 2, 0, 5);
        fill_row(&mut data, 0, 4, 0, 3);
        let c = label_components(&volume(data), Connectivity::Full26);
        let ids: Vec<u32> = ranking(&c, false).iter().map(|r| r.id).collect();
        assert_eq!(ids, [2, 1, 3]);
        let with_bg = ranking(&c, true);
        assert_eq!(with_bg[0], Ranked { id: 0, count: 50 - 11 });
    }

    #[test]
    fn test_keep_larger_of_two_with_background() {
        // 30 体素与 15 体素两个连通域, 背景排第一.
        let mut data = Array3::zeros((1, 10, 40));
        fill_row(&mut data, 0, 1, 0, 30);
        fill_row(&mut data, 0, 6, 0, 15);
        let mask = volume(data);

        let refined = select(&mask, &SelectionPolicy::default());
        assert_eq!(refined.foreground_count(), 30);
        assert_eq!(refined[(0, 1, 0)], MASK_ON);
        assert_eq!(refined[(0, 6, 0)], BACKGROUND);
        assert!(refined.is_co_registered(&mask));
    }

    #[test]
    fn test_skip_largest_without_background() {
        let mut data = Array3::zeros((1, 10, 40));
        fill_row(&mut data, 0, 0, 0, 40);
        fill_row(&mut data, 0, 3, 0, 30);
        fill_row(&mut data, 0, 6, 0, 25);
        fill_row(&mut data, 0, 9, 0, 10);
        let policy = SelectionPolicy {
            rank_background: false,
            ..Default::default()
        };
        let refined = select(&volume(data), &policy);
        assert_eq!(refined.foreground_count(), 55);
        assert_eq!(refined[(0, 0, 0)], BACKGROUND);
        assert_eq!(refined[(0, 3, 0)], MASK_ON);
        assert_eq!(refined[(0, 6, 0)], MASK_ON);
        assert_eq!(refined[(0, 9, 0)], BACKGROUND);
    }

    #[test]
    fn test_min_voxels_is_strict() {
        let mut data = Array3::zeros((1, 10, 40));
        fill_row(&mut data, 0, 0, 0, 40);
        fill_row(&mut data, 0, 3, 0, 20);
        let policy = SelectionPolicy {
            rank_background: false,
            ..Default::default()
        };
        assert!(select(&volume(data), &policy).is_background());
    }

    #[test]
    fn test_empty_and_never_grows() {
        let empty = volume(Array3::zeros((2, 3, 3)));
        assert!(select(&empty, &SelectionPolicy::default()).is_background());

        let full = volume(Array3::ones((2, 3, 3)));
        for rank_background in [true, false] {
            let policy = SelectionPolicy {
                rank_background,
                ..Default::default()
            };
            let refined = select(&full, &policy);
            assert!(refined.foreground_count() <= full.foreground_count());
            assert!(refined.is_background());
        }
    }
}
