#![warn(missing_docs)]

//! 核心库. 将单个患者的胸部 CT 扫描经多折 (fold) 模型集成推理,
//! 得到肺结节 (nodules) 与非小细胞肺癌病灶 (nsclc_rg) 两份带临床标签的分割结果.
//!
//! 该 crate 只负责 **集成编排与融合**. 模型本身、DICOM 解码/编码、
//! DICOM 元数据修复都被视为外部协作者, 以 trait 的形式注入
//! (见 [`pipeline`] 与 [`fold`]).
//!
//! # 注意
//!
//! 1. 所有参与融合与合成的体积必须与原始 CT 共享形状和空间坐标系 (co-registered),
//!   否则返回 [`Error::ShapeMismatch`], 而不会尝试自动修复.
//! 2. 折推理结果以 `{task}_{fold}` 为键缓存在 [`store::VolumeStore`] 中.
//!   "存在即完成", 因此写入端必须保证原子性 (先写临时文件再重命名).
//! 3. 本 crate 不会删除任何中间缓存. 清理缓存是调用者的职责.
//!
//! # 流程概览
//!
//! ### 折推理 ✅
//!
//! 每个 (task, fold) 至多调用一次外部推理后端, 已存在的结果直接复用.
//!
//! 实现位于 `lung-berry/src/fold`.
//!
//! ### 多折投票融合 ✅
//!
//! 某体素被判为前景, 当且仅当投票比例不小于阈值 (默认 0.6, 即 5 折中至少 3 票).
//!
//! 实现位于 `lung-berry/src/fusion`.
//!
//! ### 连通域排序与筛选 ✅
//!
//! 跳过体素数最大的区域, 保留第 2、3 名中足够大的连通域.
//!
//! 实现位于 `lung-berry/src/post_proc/components.rs`.
//!
//! ### 标签合成 ✅
//!
//! 肺部为标签 1, 限制在肺内的病灶为标签 2.
//!
//! 实现位于 `lung-berry/src/post_proc/composite.rs`.
//!
//! ### 编排与输出回退 ✅
//!
//! 两个任务相互隔离; 临床格式编码失败时直接输出原始合成体积.
//!
//! 实现位于 `lung-berry/src/pipeline`.

/// 三维索引 `(z, h, w)`, 同时也用来描述体积形状.
pub type Idx3d = (usize, usize, usize);

/// 3D CT nii 文件基础数据结构.
mod data;

pub use data::{CtScan, LabelVolume, NiftiHeaderAttr, SpatialFrame, StagedCt};

mod error;

pub use error::{Error, Result};

pub mod config;
pub mod consts;
pub mod fold;
pub mod fusion;
pub mod pipeline;
pub mod post_proc;
pub mod prelude;
pub mod store;
