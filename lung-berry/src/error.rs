//! 运行时错误.

use crate::Idx3d;
use thiserror::Error;

/// 本 crate 通用的 `Result`.
pub type Result<T> = std::result::Result<T, Error>;

/// 流水线运行时错误.
///
/// 按严重程度大致分为:
///
/// 1. [`Error::Conversion`]: 整个运行中止 (没有 CT 就没有后续).
/// 2. [`Error::InferenceFailed`], [`Error::StructureUnavailable`]: 仅对所属任务致命.
/// 3. [`Error::ShapeMismatch`]: 致命. 通常意味着缓存已损坏, 需要人工清理.
/// 4. [`Error::Encoding`]: 可恢复. 触发回退输出.
#[derive(Error, Debug)]
pub enum Error {
    /// 未能从序列目录得到唯一的 CT 体积.
    #[error("CT conversion failed: {0}")]
    Conversion(String),

    /// 某个 (task, fold) 的推理失败. 不会自动重试.
    #[error("inference failed for task `{task}` fold {fold}: {reason}")]
    InferenceFailed {
        /// 任务名.
        task: String,
        /// 折索引.
        fold: u32,
        /// 后端给出的原因.
        reason: String,
    },

    /// 参与运算的体积不在同一空间坐标系中.
    #[error("shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// 发生不一致的位置.
        context: String,
        /// 期望的 `(z, h, w)` 形状.
        expected: Idx3d,
        /// 实际的 `(z, h, w)` 形状.
        found: Idx3d,
    },

    /// 临床格式编码失败.
    #[error("clinical encoding failed: {0}")]
    Encoding(String),

    /// 卷存储读写失败.
    #[error("volume store error at `{key}`: {source}")]
    Store {
        /// 逻辑键.
        key: String,
        /// 底层错误.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// 卷存储中不存在该键.
    #[error("no volume stored under `{0}`")]
    MissingVolume(String),

    /// 发现掩膜在结构掩膜之外仍有前景. 调用者应先执行 `confine`.
    #[error("{voxels} finding voxels lie outside the structural mask")]
    FindingOutsideStructure {
        /// 越界体素个数.
        voxels: usize,
    },

    /// 提供结构掩膜的任务未能完成.
    #[error("structural mask unavailable: task `{task}` did not finish")]
    StructureUnavailable {
        /// 提供结构掩膜的任务名.
        task: String,
    },

    /// 任务线程异常退出.
    #[error("worker for task `{0}` panicked")]
    Panicked(String),

    /// 配置不合法.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 其他底层 I/O 错误.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// 包装卷存储底层错误.
    pub fn store<E>(key: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store {
            key: key.to_string(),
            source: Box::new(source),
        }
    }
}
