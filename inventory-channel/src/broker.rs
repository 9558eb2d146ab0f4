//! 进程内代理（Broker）
//!
//! 以分区化、仅追加的日志模拟外部消息代理，承担两类职责：
//! - 日志侧：按整型键哈希（无键则轮询）选择分区并追加记录；
//!   单分区内的投递顺序即追加顺序；
//! - 协调侧：订阅组成员关系、分区分配、代际（generation）栅栏与
//!   会话超时驱逐；成员变更即提升代际，旧代际的 fetch/commit 一律
//!   以 `RebalanceInProgress` 拒绝，促使 worker 重新入组。
//!
//! 已提交位点（committed offset）表示“下一条待消费”的偏移，按
//! (group, topic, partition) 维度单调推进。
//!
use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// 代理持有的投递单元：信封 + 代理赋予的分区/位点元数据
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    pub key: Option<i32>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// 入组结果：当前代际与分配到的分区集合
#[derive(Debug, Clone)]
pub struct Membership {
    pub generation: u64,
    pub partitions: Vec<u32>,
}

/// 记录接收端：生产者把记录交给它传输
///
/// 进程内场景由 [`Broker`] 实现；测试可注入故障实现以验证
/// 生产者的重试与丢弃策略。
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// 传输一条记录，返回代理选定的 (partition, offset)
    async fn deliver(
        &self,
        topic: &str,
        key: Option<i32>,
        body: String,
    ) -> ChannelResult<(u32, i64)>;
}

struct StoredRecord {
    key: Option<i32>,
    body: String,
    timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
    round_robin: u32,
}

struct MemberState {
    topic: String,
    deadline: Instant,
    session_timeout: Duration,
}

#[derive(Default)]
struct GroupState {
    generation: u64,
    // BTreeMap 保证分配对成员 id 排序稳定
    members: BTreeMap<String, MemberState>,
    committed: HashMap<(String, u32), i64>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    groups: HashMap<String, GroupState>,
}

/// 进程内代理：分区日志 + 订阅组协调
pub struct Broker {
    partitions_per_topic: u32,
    state: Mutex<BrokerState>,
}

impl Broker {
    /// 创建代理；主题在首次使用时自动创建，每主题固定 `partitions_per_topic` 个分区
    pub fn new(partitions_per_topic: u32) -> Self {
        assert!(partitions_per_topic > 0, "topic needs at least one partition");
        Self {
            partitions_per_topic,
            state: Mutex::new(BrokerState::default()),
        }
    }

    pub fn partitions_per_topic(&self) -> u32 {
        self.partitions_per_topic
    }

    /// 追加一条记录：有键按键哈希选分区，无键轮询
    pub async fn append(
        &self,
        topic: &str,
        key: Option<i32>,
        body: String,
    ) -> ChannelResult<(u32, i64)> {
        let mut state = self.state.lock().await;
        let partition_count = self.partitions_per_topic;
        let log = state.topics.entry(topic.to_string()).or_default();

        if log.partitions.is_empty() {
            log.partitions = (0..partition_count).map(|_| Vec::new()).collect();
        }

        let partition = match key {
            Some(k) => (k as i64).rem_euclid(i64::from(partition_count)) as u32,
            None => {
                let p = log.round_robin % partition_count;
                log.round_robin = log.round_robin.wrapping_add(1);
                p
            }
        };

        let slot = &mut log.partitions[partition as usize];
        let offset = slot.len() as i64;
        slot.push(StoredRecord {
            key,
            body,
            timestamp: Utc::now(),
        });

        Ok((partition, offset))
    }

    /// 入组（或重入组）：返回当前代际与该成员的分区分配。
    /// 新成员加入会提升代际，使组内其余成员的在途 fetch/commit 失效。
    pub async fn join(
        &self,
        group: &str,
        topic: &str,
        member: &str,
        session_timeout: Duration,
    ) -> Membership {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        Self::sweep_expired(&mut state, group, now);

        let group_state = state.groups.entry(group.to_string()).or_default();
        let is_new = !group_state.members.contains_key(member);

        group_state.members.insert(
            member.to_string(),
            MemberState {
                topic: topic.to_string(),
                deadline: now + session_timeout,
                session_timeout,
            },
        );

        if is_new {
            group_state.generation += 1;
            tracing::info!(group, member, generation = group_state.generation, "member joined group");
        }

        Membership {
            generation: group_state.generation,
            partitions: Self::assignment(group_state, topic, member, self.partitions_per_topic),
        }
    }

    /// 主动离组：提升代际并触发重分配
    pub async fn leave(&self, group: &str, member: &str) {
        let mut state = self.state.lock().await;
        if let Some(group_state) = state.groups.get_mut(group)
            && group_state.members.remove(member).is_some()
        {
            group_state.generation += 1;
            tracing::info!(group, member, generation = group_state.generation, "member left group");
        }
    }

    /// 拉取分配分区内从 `from` 开始、至多 `max` 条的投递单元。
    /// 每次调用刷新该成员的会话期限（等价于心跳）。
    pub async fn fetch(
        &self,
        group: &str,
        member: &str,
        generation: u64,
        topic: &str,
        partition: u32,
        from: i64,
        max: usize,
    ) -> ChannelResult<Vec<Delivery>> {
        if partition >= self.partitions_per_topic {
            return Err(ChannelError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }

        let mut state = self.state.lock().await;
        let now = Instant::now();
        Self::sweep_expired(&mut state, group, now);
        Self::fence(&mut state, group, member, generation, Some(now))?;

        let Some(log) = state.topics.get(topic) else {
            return Ok(Vec::new());
        };
        let Some(slot) = log.partitions.get(partition as usize) else {
            return Ok(Vec::new());
        };

        let start = from.max(0) as usize;
        let end = slot.len().min(start.saturating_add(max));
        if start >= end {
            return Ok(Vec::new());
        }

        let deliveries = slot[start..end]
            .iter()
            .enumerate()
            .map(|(i, record)| Delivery {
                topic: topic.to_string(),
                partition,
                offset: (start + i) as i64,
                key: record.key,
                body: record.body.clone(),
                timestamp: record.timestamp,
            })
            .collect();

        Ok(deliveries)
    }

    /// 提交位点（“下一条待消费”的偏移），仅单调推进
    pub async fn commit(
        &self,
        group: &str,
        member: &str,
        generation: u64,
        topic: &str,
        partition: u32,
        offset: i64,
    ) -> ChannelResult<()> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        Self::sweep_expired(&mut state, group, now);
        Self::fence(&mut state, group, member, generation, None)?;

        if let Some(group_state) = state.groups.get_mut(group) {
            let slot = group_state
                .committed
                .entry((topic.to_string(), partition))
                .or_insert(0);
            *slot = (*slot).max(offset);
        }

        Ok(())
    }

    /// 查询已提交位点；从未提交过则为 0（从头消费）
    pub async fn committed(&self, group: &str, topic: &str, partition: u32) -> i64 {
        let state = self.state.lock().await;
        state
            .groups
            .get(group)
            .and_then(|g| g.committed.get(&(topic.to_string(), partition)))
            .copied()
            .unwrap_or(0)
    }

    /// 会话超时驱逐：静默超过 session_timeout 的成员被移出，代际提升，
    /// 其分区随后重新分配（未提交的投递将被其他成员重新消费）。
    fn sweep_expired(state: &mut BrokerState, group: &str, now: Instant) {
        let Some(group_state) = state.groups.get_mut(group) else {
            return;
        };

        let expired: Vec<String> = group_state
            .members
            .iter()
            .filter(|(_, m)| m.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        for member in &expired {
            group_state.members.remove(member);
            tracing::warn!(group, member = %member, "member session expired, evicting");
        }
        group_state.generation += 1;
    }

    /// 代际栅栏：未知成员或过期代际的请求一律拒绝
    fn fence(
        state: &mut BrokerState,
        group: &str,
        member: &str,
        generation: u64,
        refresh: Option<Instant>,
    ) -> ChannelResult<()> {
        let Some(group_state) = state.groups.get_mut(group) else {
            return Err(ChannelError::UnknownMember {
                group: group.to_string(),
                member: member.to_string(),
            });
        };

        let Some(member_state) = group_state.members.get_mut(member) else {
            return Err(ChannelError::UnknownMember {
                group: group.to_string(),
                member: member.to_string(),
            });
        };

        if generation != group_state.generation {
            return Err(ChannelError::RebalanceInProgress {
                group: group.to_string(),
                generation: group_state.generation,
            });
        }

        if let Some(now) = refresh {
            member_state.deadline = now + member_state.session_timeout;
        }

        Ok(())
    }

    /// 分区分配：订阅同一主题的成员按 id 排序，分区按下标取模轮转分摊。
    /// 同一 (partition, generation) 至多属于一个成员。
    fn assignment(
        group_state: &GroupState,
        topic: &str,
        member: &str,
        partition_count: u32,
    ) -> Vec<u32> {
        let subscribers: Vec<&String> = group_state
            .members
            .iter()
            .filter(|(_, m)| m.topic == topic)
            .map(|(id, _)| id)
            .collect();

        let Some(index) = subscribers.iter().position(|id| id.as_str() == member) else {
            return Vec::new();
        };

        (0..partition_count)
            .filter(|p| (*p as usize) % subscribers.len() == index)
            .collect()
    }
}

#[async_trait]
impl RecordSink for Broker {
    async fn deliver(
        &self,
        topic: &str,
        key: Option<i32>,
        body: String,
    ) -> ChannelResult<(u32, i64)> {
        self.append(topic, key, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "KiberGroup";
    const TOPIC: &str = "myTopic";
    const SESSION: Duration = Duration::from_secs(15);

    #[tokio::test]
    async fn keyed_records_land_on_a_stable_partition_in_order() {
        let broker = Broker::new(3);

        let (p1, o1) = broker.append(TOPIC, Some(7), "a".into()).await.unwrap();
        let (p2, o2) = broker.append(TOPIC, Some(7), "b".into()).await.unwrap();

        assert_eq!(p1, p2);
        assert_eq!((o1, o2), (0, 1));
    }

    #[tokio::test]
    async fn negative_keys_still_map_into_partition_range() {
        let broker = Broker::new(3);
        let (partition, _) = broker.append(TOPIC, Some(-5), "x".into()).await.unwrap();

        assert!(partition < 3);
    }

    #[tokio::test]
    async fn keyless_records_round_robin_across_partitions() {
        let broker = Broker::new(3);
        let mut seen = Vec::new();
        for i in 0..3 {
            let (p, _) = broker.append(TOPIC, None, format!("m{i}")).await.unwrap();
            seen.push(p);
        }

        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn single_member_owns_every_partition() {
        let broker = Broker::new(4);
        let membership = broker.join(GROUP, TOPIC, "w1", SESSION).await;

        assert_eq!(membership.partitions, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn second_join_splits_partitions_and_bumps_generation() {
        let broker = Broker::new(4);
        let first = broker.join(GROUP, TOPIC, "w1", SESSION).await;
        let second = broker.join(GROUP, TOPIC, "w2", SESSION).await;

        assert!(second.generation > first.generation);

        let first = broker.join(GROUP, TOPIC, "w1", SESSION).await;
        let mut all: Vec<u32> = first
            .partitions
            .iter()
            .chain(second.partitions.iter())
            .copied()
            .collect();
        all.sort_unstable();

        assert_eq!(all, vec![0, 1, 2, 3]);
        assert!(!first.partitions.is_empty());
        assert!(!second.partitions.is_empty());
    }

    #[tokio::test]
    async fn stale_generation_fetch_is_fenced() {
        let broker = Broker::new(1);
        let old = broker.join(GROUP, TOPIC, "w1", SESSION).await;
        broker.join(GROUP, TOPIC, "w2", SESSION).await;

        let err = broker
            .fetch(GROUP, "w1", old.generation, TOPIC, 0, 0, 10)
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::RebalanceInProgress { .. }));
    }

    #[tokio::test]
    async fn silent_member_is_evicted_after_session_timeout() {
        let broker = Broker::new(2);
        broker
            .join(GROUP, TOPIC, "w1", Duration::from_millis(20))
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // 任何组操作都会触发过期清扫；新成员接管全部分区
        let membership = broker.join(GROUP, TOPIC, "w2", SESSION).await;

        assert_eq!(membership.partitions, vec![0, 1]);
    }

    #[tokio::test]
    async fn commit_is_monotonic_and_survives_member_turnover() {
        let broker = Broker::new(1);
        let m = broker.join(GROUP, TOPIC, "w1", SESSION).await;

        broker
            .commit(GROUP, "w1", m.generation, TOPIC, 0, 5)
            .await
            .unwrap();
        broker
            .commit(GROUP, "w1", m.generation, TOPIC, 0, 3)
            .await
            .unwrap();

        assert_eq!(broker.committed(GROUP, TOPIC, 0).await, 5);

        broker.leave(GROUP, "w1").await;
        assert_eq!(broker.committed(GROUP, TOPIC, 0).await, 5);
    }

    #[tokio::test]
    async fn fetch_returns_publish_order_within_a_partition() {
        let broker = Broker::new(1);
        for i in 0..5 {
            broker.append(TOPIC, None, format!("m{i}")).await.unwrap();
        }
        let m = broker.join(GROUP, TOPIC, "w1", SESSION).await;

        let deliveries = broker
            .fetch(GROUP, "w1", m.generation, TOPIC, 0, 0, 10)
            .await
            .unwrap();

        let bodies: Vec<&str> = deliveries.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2", "m3", "m4"]);
        let offsets: Vec<i64> = deliveries.iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }
}
