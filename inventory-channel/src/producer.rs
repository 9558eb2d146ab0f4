//! 生产者通道客户端（Producer）
//!
//! 负责把信封从写路径搬运到代理：
//! - `send` 在记录被出站缓冲接纳后立即返回，不等待代理确认；
//! - 缓冲按字节计量（`buffer_memory_bytes`），占满时阻塞调用方
//!   （复刻参考实现的策略）；
//! - 专用后台发送任务把缓冲凝聚成批次（`batch_size_bytes`），
//!   最多延迟 `linger` 等待更多记录凑批；
//! - 瞬时发送失败按 `retries` 重试，默认不重试——单次失败即
//!   记日志丢弃（尽力而为投递）。
//!
//! 客户端为显式构造、显式传递的依赖：`connect` 时拉起发送任务，
//! `close` 时先排空缓冲再停止任务。
//!
use crate::broker::RecordSink;
use crate::error::{ChannelError, ChannelResult};
use bon::Builder;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 生产者配置（构造时固定，运行期不可变）
#[derive(Clone, Debug, Builder)]
pub struct ProducerConfig {
    /// 代理连接目标
    #[builder(into, default = "localhost:9092".to_string())]
    pub broker_address: String,
    /// 瞬时发送失败的重发次数（默认 0：尽力而为，不重试）
    #[builder(default = 0)]
    pub retries: u32,
    /// 两次重发之间的退避
    #[builder(default = Duration::from_millis(100))]
    pub retry_backoff: Duration,
    /// 单个网络批次的字节上限
    #[builder(default = 16384)]
    pub batch_size_bytes: usize,
    /// 凑批等待窗口
    #[builder(default = Duration::from_millis(1))]
    pub linger: Duration,
    /// 未传输记录允许占用的内存总量
    #[builder(default = 33_554_432)]
    pub buffer_memory_bytes: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct PendingRecord {
    topic: String,
    key: Option<i32>,
    body: String,
    bytes: usize,
}

impl PendingRecord {
    fn new(topic: &str, key: Option<i32>, body: String) -> Self {
        // 键按定长 4 字节计
        let bytes = topic.len() + body.len() + 4;
        Self {
            topic: topic.to_string(),
            key,
            body,
            bytes,
        }
    }
}

#[derive(Default)]
struct QueueState {
    records: VecDeque<PendingRecord>,
    buffered_bytes: usize,
    sending: bool,
    closed: bool,
}

struct ProducerShared {
    config: ProducerConfig,
    sink: Arc<dyn RecordSink>,
    queue: Mutex<QueueState>,
    /// 缓冲释放字节时唤醒被阻塞的 send 调用
    space: Notify,
    /// 新记录入队时唤醒发送任务
    arrival: Notify,
    /// 缓冲排空时唤醒 flush 等待者
    idle: Notify,
}

impl ProducerShared {
    fn is_idle(&self) -> bool {
        let queue = self.queue.lock().expect("producer queue poisoned");
        queue.records.is_empty() && !queue.sending
    }
}

/// 生产者：出站缓冲 + 专用后台发送任务
pub struct Producer {
    shared: Arc<ProducerShared>,
    token: CancellationToken,
    sender_task: Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    /// 连接代理（记录接收端）并拉起后台发送任务
    pub fn connect(sink: Arc<dyn RecordSink>, config: ProducerConfig) -> Self {
        tracing::info!(broker = %config.broker_address, "producer connected");

        let shared = Arc::new(ProducerShared {
            config,
            sink,
            queue: Mutex::new(QueueState::default()),
            space: Notify::new(),
            arrival: Notify::new(),
            idle: Notify::new(),
        });
        let token = CancellationToken::new();
        let task = tokio::spawn(Self::run_sender(shared.clone(), token.clone()));

        Self {
            shared,
            token,
            sender_task: Mutex::new(Some(task)),
        }
    }

    /// 把一条记录交给出站缓冲。
    ///
    /// 返回即表示记录已被缓冲接纳，不代表代理已确认。缓冲占满时
    /// 调用方在此等待，直至发送任务释放出足够空间（阻塞策略，
    /// 见 DESIGN.md）。
    pub async fn send(&self, topic: &str, key: Option<i32>, body: String) -> ChannelResult<()> {
        let record = PendingRecord::new(topic, key, body);

        loop {
            // 先注册唤醒，再检查条件，避免丢通知
            let space = self.shared.space.notified();
            {
                let mut queue = self.shared.queue.lock().expect("producer queue poisoned");
                if queue.closed {
                    return Err(ChannelError::ProducerClosed);
                }

                let fits = queue.buffered_bytes + record.bytes
                    <= self.shared.config.buffer_memory_bytes;
                // 超大记录在缓冲完全空闲时放行，否则永远无法发出
                let empty = queue.records.is_empty() && !queue.sending;
                if fits || empty {
                    queue.buffered_bytes += record.bytes;
                    queue.records.push_back(record);
                    drop(queue);
                    self.shared.arrival.notify_one();
                    return Ok(());
                }
            }
            space.await;
        }
    }

    /// 等待出站缓冲完全排空（含在途批次）
    pub async fn flush(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if self.shared.is_idle() {
                return;
            }
            idle.await;
        }
    }

    /// 排空缓冲并停止发送任务；之后的 send 返回 `ProducerClosed`
    pub async fn close(&self) {
        {
            let mut queue = self.shared.queue.lock().expect("producer queue poisoned");
            queue.closed = true;
        }
        self.flush().await;
        self.token.cancel();

        let task = self
            .sender_task
            .lock()
            .expect("producer task slot poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn run_sender(shared: Arc<ProducerShared>, token: CancellationToken) {
        loop {
            // 等首条记录；取消且缓冲已空才退出
            loop {
                let arrival = shared.arrival.notified();
                let empty = shared
                    .queue
                    .lock()
                    .expect("producer queue poisoned")
                    .records
                    .is_empty();
                if !empty {
                    break;
                }
                if token.is_cancelled() {
                    return;
                }
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = arrival => {}
                }
            }

            // linger 窗口：稍作等待让更多记录凑进同一批
            if !shared.config.linger.is_zero() && !token.is_cancelled() {
                tokio::time::sleep(shared.config.linger).await;
            }

            let batch = Self::take_batch(&shared);
            for record in batch {
                Self::transmit(&shared, &record).await;

                let mut queue = shared.queue.lock().expect("producer queue poisoned");
                queue.buffered_bytes = queue.buffered_bytes.saturating_sub(record.bytes);
                drop(queue);
                shared.space.notify_waiters();
            }

            let mut queue = shared.queue.lock().expect("producer queue poisoned");
            queue.sending = false;
            let drained = queue.records.is_empty();
            drop(queue);
            if drained {
                shared.idle.notify_waiters();
            }
        }
    }

    /// 从缓冲头部取出一个批次（至少一条，总量不超过 batch_size_bytes）
    fn take_batch(shared: &ProducerShared) -> Vec<PendingRecord> {
        let mut queue = shared.queue.lock().expect("producer queue poisoned");
        let mut batch = Vec::new();
        let mut batch_bytes = 0usize;

        while let Some(record) = queue.records.front() {
            if !batch.is_empty() && batch_bytes + record.bytes > shared.config.batch_size_bytes {
                break;
            }
            batch_bytes += record.bytes;
            batch.push(queue.records.pop_front().expect("front checked above"));
        }

        queue.sending = !batch.is_empty();
        batch
    }

    /// 单条记录传输：至多 1 + retries 次尝试，耗尽后记日志丢弃
    async fn transmit(shared: &ProducerShared, record: &PendingRecord) {
        let attempts = shared.config.retries.saturating_add(1);

        for attempt in 1..=attempts {
            match shared
                .sink
                .deliver(&record.topic, record.key, record.body.clone())
                .await
            {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %record.topic,
                        partition,
                        offset,
                        "record transmitted"
                    );
                    return;
                }
                Err(err) if attempt < attempts => {
                    tracing::warn!(
                        topic = %record.topic,
                        attempt,
                        error = %err,
                        "send failed, retrying"
                    );
                    tokio::time::sleep(shared.config.retry_backoff).await;
                }
                Err(err) => {
                    tracing::warn!(
                        topic = %record.topic,
                        attempts,
                        error = %err,
                        "send failed, dropping record"
                    );
                }
            }
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// 可注入门闩与故障次数的记录接收端
    struct TestSink {
        delivered: Mutex<Vec<(String, Option<i32>, String)>>,
        attempts: AtomicUsize,
        fail_first: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl TestSink {
        fn open() -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
                fail_first: AtomicUsize::new(0),
                gate: None,
            })
        }

        fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
                fail_first: AtomicUsize::new(0),
                gate: Some(gate),
            })
        }

        fn failing(times: usize) -> Arc<Self> {
            let sink = Self::open();
            sink.fail_first.store(times, Ordering::SeqCst);
            sink
        }

        fn bodies(&self) -> Vec<String> {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .map(|(_, _, b)| b.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RecordSink for TestSink {
        async fn deliver(
            &self,
            topic: &str,
            key: Option<i32>,
            body: String,
        ) -> ChannelResult<(u32, i64)> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ChannelError::Transport {
                    topic: topic.to_string(),
                    reason: "injected failure".to_string(),
                });
            }

            let mut delivered = self.delivered.lock().unwrap();
            let offset = delivered.len() as i64;
            delivered.push((topic.to_string(), key, body));
            Ok((0, offset))
        }
    }

    fn quick_config() -> ProducerConfig {
        ProducerConfig::builder()
            .linger(Duration::from_millis(0))
            .retry_backoff(Duration::from_millis(1))
            .build()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_returns_before_broker_acknowledges() {
        let gate = Arc::new(Semaphore::new(0));
        let sink = TestSink::gated(gate.clone());
        let producer = Producer::connect(sink.clone(), quick_config());

        // 接收端被门闩卡住，send 依然立刻返回
        tokio::time::timeout(Duration::from_secs(1), producer.send("myTopic", None, "a".into()))
            .await
            .expect("send must not wait for the broker")
            .unwrap();
        assert!(sink.bodies().is_empty());

        gate.add_permits(1);
        producer.flush().await;
        assert_eq!(sink.bodies(), vec!["a"]);
        producer.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_buffer_blocks_caller_until_space_frees() {
        let gate = Arc::new(Semaphore::new(0));
        let sink = TestSink::gated(gate.clone());
        let config = ProducerConfig::builder()
            .linger(Duration::from_millis(0))
            .buffer_memory_bytes(16)
            .build();
        let producer = Producer::connect(sink.clone(), config);

        // 首条记录独占缓冲（空闲缓冲放行超限记录）
        producer.send("t", None, "aaaaaaaaaaaa".into()).await.unwrap();

        // 第二条在缓冲满时必须等待
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), producer.send("t", None, "b".into()))
                .await;
        assert!(blocked.is_err(), "send should block while the buffer is full");

        // 放行接收端后空间释放，同一调用可以完成
        gate.add_permits(2);
        tokio::time::timeout(Duration::from_secs(1), producer.send("t", None, "b".into()))
            .await
            .expect("send should resume after drain")
            .unwrap();

        producer.flush().await;
        assert_eq!(sink.bodies(), vec!["aaaaaaaaaaaa", "b"]);
        producer.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn default_policy_drops_record_after_single_failed_attempt() {
        let sink = TestSink::failing(1);
        let producer = Producer::connect(sink.clone(), quick_config());

        producer.send("t", None, "lost".into()).await.unwrap();
        producer.send("t", None, "kept".into()).await.unwrap();
        producer.flush().await;

        // retries=0：第一条仅尝试一次即被丢弃
        assert_eq!(sink.bodies(), vec!["kept"]);
        producer.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn configured_retries_recover_transient_failures() {
        let sink = TestSink::failing(2);
        let config = ProducerConfig::builder()
            .linger(Duration::from_millis(0))
            .retries(2)
            .retry_backoff(Duration::from_millis(1))
            .build();
        let producer = Producer::connect(sink.clone(), config);

        producer.send("t", None, "eventually".into()).await.unwrap();
        producer.flush().await;

        assert_eq!(sink.bodies(), vec!["eventually"]);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        producer.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_rejects_later_sends() {
        let sink = TestSink::open();
        let producer = Producer::connect(sink, quick_config());
        producer.close().await;

        let err = producer.send("t", None, "late".into()).await.unwrap_err();
        assert!(matches!(err, ChannelError::ProducerClosed));
    }
}
