//! 订阅组 worker（GroupWorker）
//!
//! 单线程的 轮询 → 投递 → 处理 循环：
//! - 入组取得分区分配，以已提交位点为起点拉取；
//! - 同一 worker 绝不并发处理两条投递；处理器失败记日志后继续；
//! - 观察到代际失效（`RebalanceInProgress`/`UnknownMember`）即重新入组；
//! - 默认开启自动提交：独立周期任务按 `auto_commit_interval` 提交
//!   位点快照，**不**等待在途处理器返回。由此产生的已知风险：
//!   位点先于处理完成被提交、worker 随即死亡，则该消息对组而言
//!   永久丢失——这是对参考策略的有意复刻，而非缺陷。
//! - 关闭自动提交时，位点只在优雅退出（离组交接）时提交一次；
//!   非正常死亡的成员不提交，其消息将被重新投递。
//!
//! 并发来自运行多个 worker（共享 group_id），而非单 worker 内部。
//!
use crate::broker::Broker;
use crate::error::ChannelError;
use crate::handler::MessageHandler;
use crate::offsets::OffsetTracker;
use bon::Builder;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 消费者配置（构造时固定）
#[derive(Clone, Debug, Builder)]
pub struct ConsumerConfig {
    /// 代理连接目标
    #[builder(into, default = "localhost:9092".to_string())]
    pub bootstrap_address: String,
    /// 订阅组标识：同组成员互斥瓜分主题分区
    #[builder(into, default = "KiberGroup".to_string())]
    pub group_id: String,
    /// 成员静默超过该时长即被代理驱逐并重新分配其分区
    #[builder(default = Duration::from_secs(15))]
    pub session_timeout: Duration,
    /// 自动提交开关（默认开启，复刻参考配置）
    #[builder(default = true)]
    pub enable_auto_commit: bool,
    /// 自动提交间隔
    #[builder(default = Duration::from_millis(100))]
    pub auto_commit_interval: Duration,
    /// 单次拉取的最大记录数
    #[builder(default = 64)]
    pub max_poll_records: usize,
    /// 空轮询后的退避
    #[builder(default = Duration::from_millis(10))]
    pub poll_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

static WORKER_SEQ: AtomicU64 = AtomicU64::new(0);

/// 订阅组 worker：一个成员、一条轮询循环、一个处理器
pub struct GroupWorker {
    broker: Arc<Broker>,
    topic: String,
    config: ConsumerConfig,
    handler: Arc<dyn MessageHandler>,
    member_id: String,
}

impl GroupWorker {
    pub fn new(
        broker: Arc<Broker>,
        topic: impl Into<String>,
        config: ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let member_id = format!(
            "{}-worker-{}",
            config.group_id,
            WORKER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            broker,
            topic: topic.into(),
            config,
            handler,
            member_id,
        }
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// 拉起轮询循环与（可选的）自动提交任务，返回控制句柄
    pub fn start(self) -> WorkerHandle {
        let token = CancellationToken::new();
        let tracker = Arc::new(OffsetTracker::new());
        let generation = Arc::new(AtomicU64::new(0));
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(2);

        if self.config.enable_auto_commit {
            let broker = self.broker.clone();
            let tracker = tracker.clone();
            let generation = generation.clone();
            let group = self.config.group_id.clone();
            let member = self.member_id.clone();
            let interval = self.config.auto_commit_interval;

            tasks.push(Self::spawn_periodic(token.clone(), interval, move || {
                let broker = broker.clone();
                let tracker = tracker.clone();
                let generation = generation.clone();
                let group = group.clone();
                let member = member.clone();
                async move {
                    commit_positions(
                        &broker,
                        &group,
                        &member,
                        generation.load(Ordering::Acquire),
                        &tracker,
                    )
                    .await;
                }
            }));
        }

        tasks.push(tokio::spawn(self.poll_loop(
            token.clone(),
            tracker,
            generation,
        )));

        WorkerHandle { token, tasks }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    /// 状态机：Joining → Assigned → Polling → (Deliver → Handling)* →
    /// Rebalancing → Assigned … → Leaving
    async fn poll_loop(
        self,
        token: CancellationToken,
        tracker: Arc<OffsetTracker>,
        generation: Arc<AtomicU64>,
    ) {
        let group = self.config.group_id.clone();
        let member = self.member_id.clone();
        tracing::info!(
            broker = %self.config.bootstrap_address,
            group = %group,
            member = %member,
            "consumer connected"
        );

        'join: loop {
            if token.is_cancelled() {
                break;
            }

            // JOINING → ASSIGNED
            let membership = self
                .broker
                .join(&group, &self.topic, &member, self.config.session_timeout)
                .await;
            generation.store(membership.generation, Ordering::Release);

            let mut seeds = Vec::with_capacity(membership.partitions.len());
            for &partition in &membership.partitions {
                let committed = self.broker.committed(&group, &self.topic, partition).await;
                seeds.push((self.topic.clone(), partition, committed));
            }
            tracker.reset(seeds);
            tracing::info!(
                group = %group,
                member = %member,
                generation = membership.generation,
                partitions = ?membership.partitions,
                "partitions assigned"
            );

            // POLLING
            loop {
                if token.is_cancelled() {
                    break 'join;
                }

                let mut delivered = false;
                for &partition in &membership.partitions {
                    let from = tracker.position(&self.topic, partition).unwrap_or(0);
                    let batch = self
                        .broker
                        .fetch(
                            &group,
                            &member,
                            membership.generation,
                            &self.topic,
                            partition,
                            from,
                            self.config.max_poll_records,
                        )
                        .await;

                    match batch {
                        Ok(deliveries) => {
                            for delivery in deliveries {
                                delivered = true;
                                // 位点在投递时推进；自动提交可能赶在
                                // 处理器返回之前把它提交掉
                                tracker.advance(&self.topic, partition, delivery.offset + 1);

                                // HANDLING：同步调用，处理期间不拉取也不心跳；
                                // 阻塞超过 session_timeout 将被驱逐
                                if let Err(err) = self.handler.handle(&delivery).await {
                                    tracing::error!(
                                        handler = self.handler.name(),
                                        group = %group,
                                        member = %member,
                                        partition,
                                        offset = delivery.offset,
                                        error = %err,
                                        "message handler failed"
                                    );
                                }

                                if token.is_cancelled() {
                                    break 'join;
                                }
                            }
                        }
                        Err(
                            ChannelError::RebalanceInProgress { .. }
                            | ChannelError::UnknownMember { .. },
                        ) => {
                            // REBALANCING：重新入组换取新分配
                            tracing::info!(group = %group, member = %member, "rebalance observed, rejoining");
                            continue 'join;
                        }
                        Err(err) => {
                            tracing::warn!(group = %group, member = %member, partition, error = %err, "fetch failed");
                        }
                    }
                }

                if !delivered {
                    tokio::select! {
                        _ = token.cancelled() => break 'join,
                        _ = tokio::time::sleep(self.config.poll_backoff) => {}
                    }
                    // 空分配的成员没有 fetch 可做，靠周期性重新入组
                    // 保活会话并在组成员变动后拿到分区
                    if membership.partitions.is_empty() {
                        continue 'join;
                    }
                }
            }
        }

        // LEAVING：优雅退出前提交一次当前位点，再让出分区。
        // 关闭自动提交时，这里是位点唯一的提交时机。
        commit_positions(
            &self.broker,
            &group,
            &member,
            generation.load(Ordering::Acquire),
            &tracker,
        )
        .await;
        self.broker.leave(&group, &member).await;
        tracing::info!(group = %group, member = %member, "worker stopped");
    }
}

async fn commit_positions(
    broker: &Broker,
    group: &str,
    member: &str,
    generation: u64,
    tracker: &OffsetTracker,
) {
    for (topic, partition, position) in tracker.snapshot() {
        if let Err(err) = broker
            .commit(group, member, generation, &topic, partition, position)
            .await
        {
            // 代际已失效时 worker 很快会重新入组，这里只降噪记录
            tracing::debug!(group = %group, member = %member, partition, error = %err, "commit skipped");
        }
    }
}

/// worker 运行句柄：优雅关闭、硬终止（模拟进程死亡）与等待
pub struct WorkerHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// 请求优雅关闭：当前在途处理器跑完后离组
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// 硬终止全部任务，不提交、不离组——模拟 worker 进程死亡；
    /// 其分区待会话超时后由代理重新分配
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
