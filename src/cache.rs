//! Frame Cache: the latest encoded frame per camera.
//!
//! Each camera has its own slot guarded by its own mutex; the map of slots is
//! behind an `RwLock` that publishers and readers only take for reading. The
//! critical section of a slot is a pointer swap of an `Arc<Vec<u8>>`, so a
//! reader never waits on an encode and a publisher never waits on a reader
//! copying bytes out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub type EncodedFrame = Arc<Vec<u8>>;

#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Option<EncodedFrame>>,
    sequence: AtomicU64,
}

impl FrameSlot {
    pub fn publish(&self, bytes: EncodedFrame) {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(bytes);
        self.sequence.fetch_add(1, Ordering::Release);
    }

    pub fn read(&self) -> Option<EncodedFrame> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of frames published into this slot.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

#[derive(Default)]
pub struct FrameCache {
    slots: RwLock<HashMap<String, Arc<FrameSlot>>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for a camera, created empty on first use. Workers hold on to their
    /// slot so the steady-state publish path never touches the map lock.
    pub fn slot(&self, camera: &str) -> Arc<FrameSlot> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(camera)
        {
            return slot.clone();
        }
        self.slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(camera.to_string())
            .or_default()
            .clone()
    }

    pub fn publish(&self, camera: &str, bytes: Vec<u8>) {
        self.slot(camera).publish(Arc::new(bytes));
    }

    pub fn read(&self, camera: &str) -> Option<EncodedFrame> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(camera)
            .and_then(|slot| slot.read())
    }

    pub fn sequence(&self, camera: &str) -> u64 {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(camera)
            .map_or(0, |slot| slot.sequence())
    }

    pub fn remove(&self, camera: &str) {
        self.slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(camera);
    }

    /// Drop every slot whose camera is not in `keep`.
    pub fn retain<'a>(&self, keep: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = keep.into_iter().collect();
        self.slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|name, _| keep.contains(name.as_str()));
    }

    pub fn cameras(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_of_unknown_camera_is_empty() {
        let cache = FrameCache::new();
        assert!(cache.read("nope").is_none());
        assert_eq!(cache.sequence("nope"), 0);
    }

    #[test]
    fn publish_overwrites_and_reads_repeat() {
        let cache = FrameCache::new();
        cache.publish("a", vec![1]);
        cache.publish("a", vec![2]);
        assert_eq!(cache.read("a").as_deref(), Some(&vec![2]));
        assert_eq!(cache.read("a").as_deref(), Some(&vec![2]));
        assert_eq!(cache.sequence("a"), 2);
    }

    #[test]
    fn held_reader_copy_survives_publish() {
        let cache = FrameCache::new();
        cache.publish("a", vec![1, 1, 1]);
        let held = cache.read("a").unwrap();
        cache.publish("a", vec![2]);
        assert_eq!(*held, vec![1, 1, 1]);
    }

    #[test]
    fn retain_drops_removed_cameras() {
        let cache = FrameCache::new();
        cache.publish("a", vec![1]);
        cache.publish("b", vec![2]);
        cache.retain(["b"]);
        assert!(cache.read("a").is_none());
        assert_eq!(cache.cameras(), vec!["b".to_string()]);
    }

    #[test]
    fn detached_slot_no_longer_feeds_cache() {
        let cache = FrameCache::new();
        let slot = cache.slot("a");
        cache.remove("a");
        slot.publish(Arc::new(vec![9]));
        assert!(cache.read("a").is_none());
    }
}
