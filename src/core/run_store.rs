//! 按 thread_id 隔离的运行状态表
//!
//! 显式注入、不做全局单例。每个 thread 持有自己的 CancellationToken，可被外部取消；
//! 不同 thread 之间不共享任何可变状态。
//!
//! 每次 `create` 分配递增的 generation：同一 thread_id 被新运行覆盖后，旧运行持有的 generation
//! 不再匹配，它的 `update` / `finish` / `release` 都不会触碰新运行的槽位。
//! 已结束的运行保留 `retention` 时长，之后在下一次 `create` 或 `prune` 时清除。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::RunState;

/// 已结束运行的默认保留时长
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

struct Slot {
    generation: u64,
    state: RunState,
    cancel_token: CancellationToken,
    finished_at: Option<Instant>,
}

/// `create` 的返回：本次运行的 generation 与取消令牌
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub generation: u64,
    pub cancel_token: CancellationToken,
}

pub struct RunStore {
    runs: RwLock<HashMap<String, Slot>>,
    next_generation: AtomicU64,
    retention: Duration,
}

impl Default for RunStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            retention,
        }
    }

    /// 登记一次运行；同一 thread_id 再次登记时取消旧令牌并覆盖
    pub async fn create(&self, state: RunState) -> RunTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let thread_id = state.thread_id.clone();

        let mut runs = self.runs.write().await;
        Self::prune_locked(&mut runs, self.retention);
        let previous = runs.insert(
            thread_id,
            Slot {
                generation,
                state,
                cancel_token: token.clone(),
                finished_at: None,
            },
        );
        drop(runs);

        if let Some(old) = previous {
            tracing::debug!(thread_id = %old.state.thread_id, generation = old.generation, "run superseded");
            old.cancel_token.cancel();
        }
        RunTicket {
            generation,
            cancel_token: token,
        }
    }

    pub async fn get(&self, thread_id: &str) -> Option<RunState> {
        self.runs
            .read()
            .await
            .get(thread_id)
            .map(|slot| slot.state.clone())
    }

    /// 写入进行中的状态；槽位不存在或 generation 不匹配返回 false
    pub async fn update(&self, generation: u64, state: RunState) -> bool {
        self.write_slot(generation, state, false).await
    }

    /// 写入最终状态并开始保留计时
    pub async fn finish(&self, generation: u64, state: RunState) -> bool {
        self.write_slot(generation, state, true).await
    }

    async fn write_slot(&self, generation: u64, state: RunState, finished: bool) -> bool {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&state.thread_id) {
            Some(slot) if slot.generation == generation => {
                slot.state = state;
                if finished {
                    slot.finished_at = Some(Instant::now());
                }
                true
            }
            _ => false,
        }
    }

    /// 仅当槽位仍属于该 generation 时移除
    pub async fn release(&self, thread_id: &str, generation: u64) -> Option<RunState> {
        let mut runs = self.runs.write().await;
        match runs.get(thread_id) {
            Some(slot) if slot.generation == generation => runs.remove(thread_id).map(|s| s.state),
            _ => None,
        }
    }

    /// 无条件移除（进行中的运行会先被取消）
    pub async fn discard(&self, thread_id: &str) -> Option<RunState> {
        let slot = self.runs.write().await.remove(thread_id)?;
        slot.cancel_token.cancel();
        Some(slot.state)
    }

    /// 触发某个 thread 的取消；不存在返回 false
    pub async fn cancel(&self, thread_id: &str) -> bool {
        match self.runs.read().await.get(thread_id) {
            Some(slot) => {
                slot.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// 清除超过保留时长的已结束运行，返回清除条数
    pub async fn prune(&self) -> usize {
        let mut runs = self.runs.write().await;
        Self::prune_locked(&mut runs, self.retention)
    }

    fn prune_locked(runs: &mut HashMap<String, Slot>, retention: Duration) -> usize {
        let before = runs.len();
        runs.retain(|_, slot| match slot.finished_at {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        let removed = before - runs.len();
        if removed > 0 {
            tracing::debug!(removed, "expired runs pruned");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_discard() {
        let store = RunStore::new();
        store.create(RunState::new("t1", "alice", "a.jpg")).await;
        let t2 = store.create(RunState::new("t2", "bob", "b.jpg")).await;
        assert_eq!(store.len().await, 2);
        assert_eq!(store.get("t1").await.unwrap().username, "alice");

        let mut s = store.get("t2").await.unwrap();
        s.save_status = Some(true);
        assert!(store.update(t2.generation, s).await);
        assert_eq!(store.get("t2").await.unwrap().save_status, Some(true));

        assert!(store.discard("t1").await.is_some());
        assert!(store.get("t1").await.is_none());
        assert!(!store.update(t2.generation, RunState::new("t1", "alice", "a.jpg")).await);
    }

    #[tokio::test]
    async fn test_cancel_is_per_thread() {
        let store = RunStore::new();
        let t1 = store.create(RunState::new("t1", "alice", "a.jpg")).await;
        let t2 = store.create(RunState::new("t2", "bob", "b.jpg")).await;
        assert!(store.cancel("t1").await);
        assert!(t1.cancel_token.is_cancelled());
        assert!(!t2.cancel_token.is_cancelled());
        assert!(!store.cancel("missing").await);
    }

    #[tokio::test]
    async fn test_recreate_cancels_previous_token() {
        let store = RunStore::new();
        let old = store.create(RunState::new("t1", "alice", "a.jpg")).await;
        let new = store.create(RunState::new("t1", "alice", "b.jpg")).await;
        assert!(old.cancel_token.is_cancelled());
        assert!(!new.cancel_token.is_cancelled());
        assert_ne!(old.generation, new.generation);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_superseded_run_cannot_touch_new_slot() {
        let store = RunStore::new();
        let old = store.create(RunState::new("t1", "alice", "a.jpg")).await;
        let new = store.create(RunState::new("t1", "alice", "b.jpg")).await;

        assert!(!store.update(old.generation, RunState::new("t1", "alice", "a.jpg")).await);
        assert!(store.release("t1", old.generation).await.is_none());
        assert_eq!(store.get("t1").await.unwrap().image_ref, std::path::PathBuf::from("b.jpg"));

        let mut done = RunState::new("t1", "alice", "b.jpg");
        done.save_status = Some(true);
        assert!(store.finish(new.generation, done).await);
        assert_eq!(store.get("t1").await.unwrap().save_status, Some(true));
        assert!(store.cancel("t1").await);
        assert!(new.cancel_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_finished_runs_expire() {
        let store = RunStore::with_retention(Duration::ZERO);
        let done = store.create(RunState::new("t1", "alice", "a.jpg")).await;
        store.create(RunState::new("t2", "bob", "b.jpg")).await;
        assert!(store.finish(done.generation, RunState::new("t1", "alice", "a.jpg")).await);

        assert_eq!(store.prune().await, 1);
        assert!(store.get("t1").await.is_none());
        assert!(store.get("t2").await.is_some(), "in-flight runs are never pruned");
    }

    #[tokio::test]
    async fn test_create_sweeps_expired_runs() {
        let store = RunStore::with_retention(Duration::ZERO);
        let done = store.create(RunState::new("t1", "alice", "a.jpg")).await;
        store.finish(done.generation, RunState::new("t1", "alice", "a.jpg")).await;
        store.create(RunState::new("t2", "bob", "b.jpg")).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_discard_cancels_in_flight_run() {
        let store = RunStore::new();
        let ticket = store.create(RunState::new("t1", "alice", "a.jpg")).await;
        assert!(store.discard("t1").await.is_some());
        assert!(ticket.cancel_token.is_cancelled());
        assert!(store.discard("t1").await.is_none());
    }
}
