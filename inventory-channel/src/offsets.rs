//! 消费位点跟踪（OffsetTracker）
//!
//! 记录每个已分配分区的“下一条待消费”位置。位置在记录被**投递**时
//! 推进，而非处理器返回时——自动提交任务据此快照提交，从而复刻
//! “提交与处理完成在时间上解耦”的默认策略。
//!
use std::collections::HashMap;
use std::sync::Mutex;

/// 每 worker 一份的位点跟踪器
#[derive(Default)]
pub struct OffsetTracker {
    positions: Mutex<HashMap<(String, u32), i64>>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重置为一组新分配的分区及其起始位置（通常取自已提交位点）
    pub fn reset(&self, seeds: Vec<(String, u32, i64)>) {
        let mut positions = self.positions.lock().expect("offset tracker poisoned");
        positions.clear();
        for (topic, partition, position) in seeds {
            positions.insert((topic, partition), position);
        }
    }

    /// 投递时推进位置（单调，不回退）
    pub fn advance(&self, topic: &str, partition: u32, next: i64) {
        let mut positions = self.positions.lock().expect("offset tracker poisoned");
        let slot = positions
            .entry((topic.to_string(), partition))
            .or_insert(next);
        *slot = (*slot).max(next);
    }

    /// 查询某分区的当前位置；未分配则为 None
    pub fn position(&self, topic: &str, partition: u32) -> Option<i64> {
        let positions = self.positions.lock().expect("offset tracker poisoned");
        positions.get(&(topic.to_string(), partition)).copied()
    }

    /// 当前全部位置的快照（提交任务使用）
    pub fn snapshot(&self) -> Vec<(String, u32, i64)> {
        let positions = self.positions.lock().expect("offset tracker poisoned");
        positions
            .iter()
            .map(|((topic, partition), position)| (topic.clone(), *partition, *position))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic() {
        let tracker = OffsetTracker::new();
        tracker.reset(vec![("t".into(), 0, 0)]);

        tracker.advance("t", 0, 3);
        tracker.advance("t", 0, 1);

        assert_eq!(tracker.position("t", 0), Some(3));
    }

    #[test]
    fn reset_drops_previous_assignment() {
        let tracker = OffsetTracker::new();
        tracker.reset(vec![("t".into(), 0, 5)]);
        tracker.reset(vec![("t".into(), 1, 2)]);

        assert_eq!(tracker.position("t", 0), None);
        assert_eq!(tracker.position("t", 1), Some(2));
    }
}
