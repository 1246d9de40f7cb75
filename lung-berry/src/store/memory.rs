use super::VolumeStore;
use crate::{Error, LabelVolume, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// 纯内存卷存储. 用于测试与不需要落盘的场景.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, LabelVolume>>,
}

impl MemoryStore {
    /// 初始化空存储.
    pub fn new() -> Self {
        Self::default()
    }

    /// 已保存的体积个数.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 是否为空.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 所有已保存的键, 按字典序排列.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    // 持锁期间不会 panic, 被毒化时直接沿用内部数据.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, LabelVolume>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl VolumeStore for MemoryStore {
    fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn load(&self, key: &str) -> Result<LabelVolume> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::MissingVolume(key.to_string()))
    }

    fn save(&self, key: &str, volume: &LabelVolume) -> Result<()> {
        self.lock().insert(key.to_string(), volume.clone());
        Ok(())
    }

    #[inline]
    fn locate(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::store::VolumeStore;
    use crate::{Error, LabelVolume};
    use ndarray::Array3;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert!(matches!(store.load("a"), Err(Error::MissingVolume(k)) if k == "a"));

        let v = LabelVolume::fake(Array3::ones((1, 2, 2)), [1.0, 1.0, 1.0]);
        store.save("b", &v).unwrap();
        store.save("a", &v).unwrap();
        assert!(store.contains("a"));
        assert_eq!(store.load("b").unwrap(), v);
        assert_eq!(store.keys(), ["a", "b"]);
        assert_eq!(store.locate("a"), None);
    }
}
