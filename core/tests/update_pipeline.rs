use mmt_core::{
    BatchContent, BatchWriter, MemoryId, Result, StreamWatermarks, UpdateBatch, UpdateId, UpdateManager,
    UpdateOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Log {
    entries: Vec<(MemoryId, u64)>,
    deletions: Vec<MemoryId>,
}

impl BatchContent for Log {
    type Entry = u64;

    fn add(&mut self, memory: MemoryId, entry: u64) {
        self.entries.push((memory, entry));
    }

    fn delete(&mut self, memory: MemoryId) {
        self.entries.retain(|(m, _)| *m != memory);
        self.deletions.push(memory);
    }

    fn len(&self) -> usize {
        self.entries.len() + self.deletions.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.deletions.clear();
    }
}

/// Records every committed watermark vector.
#[derive(Default)]
struct Recorder {
    entries: Mutex<Vec<(MemoryId, u64)>>,
    snapshots: Mutex<Vec<StreamWatermarks>>,
}

impl BatchWriter<Log> for Recorder {
    fn put_batch(&self, batch: &UpdateBatch<Log>) -> Result<()> {
        self.entries.lock().extend(batch.content().entries.iter().copied());
        self.snapshots.lock().push(batch.watermarks().clone());
        Ok(())
    }
}

fn options(buffer_size: usize) -> UpdateOptions {
    UpdateOptions {
        buffer_size,
        max_delay_secs: 0.01,
    }
}

#[test]
fn replayed_update_is_stored_once() {
    let recorder = Arc::new(Recorder::default());
    let manager = UpdateManager::new("replay", recorder.clone(), &options(16), StreamWatermarks::new()).unwrap();

    manager.add(UpdateId::new(0, 7), 1, 100).unwrap();
    manager.flush().unwrap();
    manager.add(UpdateId::new(0, 7), 1, 100).unwrap();
    manager.shutdown().unwrap();

    assert_eq!(*recorder.entries.lock(), vec![(1, 100)]);
    assert_eq!(manager.watermarks().get(0), 7);
}

#[test]
fn restart_from_committed_watermarks_rejects_old_updates() {
    let recorder = Arc::new(Recorder::default());
    let mut committed = StreamWatermarks::new();
    committed.advance(&UpdateId::new(2, 50));

    let manager = UpdateManager::new("restart", recorder.clone(), &options(16), committed).unwrap();
    manager.add(UpdateId::new(2, 49), 1, 1).unwrap();
    manager.add(UpdateId::new(2, 50), 1, 2).unwrap();
    manager.add(UpdateId::new(2, 51), 1, 3).unwrap();
    manager.shutdown().unwrap();

    assert_eq!(*recorder.entries.lock(), vec![(1, 3)]);
}

#[test]
fn committed_watermarks_never_decrease() {
    let recorder = Arc::new(Recorder::default());
    let manager = Arc::new(UpdateManager::new("monotonic", recorder.clone(), &options(3), StreamWatermarks::new()).unwrap());

    let producers: Vec<_> = (0..3u16)
        .map(|stream| {
            let manager = manager.clone();
            std::thread::spawn(move || {
                for seq in 0..40i64 {
                    let id = UpdateId::new(stream, seq);
                    if seq % 10 == 9 {
                        manager.delete(id, stream as MemoryId).unwrap();
                    } else {
                        manager.add(id, stream as MemoryId, seq as u64).unwrap();
                    }
                    // duplicate delivery
                    manager.add(id, stream as MemoryId, seq as u64).unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    manager.shutdown().unwrap();

    let snapshots = recorder.snapshots.lock();
    assert!(!snapshots.is_empty());
    for pair in snapshots.windows(2) {
        for stream in 0..3u16 {
            assert!(pair[0].get(stream) <= pair[1].get(stream));
        }
    }
    let last = snapshots.last().unwrap();
    for stream in 0..3u16 {
        assert_eq!(last.get(stream), 39);
    }
}
