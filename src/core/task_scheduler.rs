//! 任务调度：追踪进行中与已结束的异步任务
//!
//! 状态机：Pending → Running → {Succeeded, Failed, Cancelled}，终态不可再变。
//! 任务表由一把 Mutex 独占，所有状态转换在锁内完成：取消与完成并发时先到终态者胜，后到者返回 false。
//! 已结束任务按完成顺序进入有界历史，超出上限时淘汰最旧的。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::{AgentRequest, AgentResponse};
use crate::router::RequestRouter;

/// 任务 ID
pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// 调度器追踪的任务记录
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub request: AgentRequest,
    pub response: Option<AgentResponse>,
    pub error: Option<String>,
}

struct ActiveEntry {
    seq: u64,
    task: Task,
    cancel: CancellationToken,
}

#[derive(Default)]
struct TaskTable {
    active: HashMap<TaskId, ActiveEntry>,
    history: VecDeque<Task>,
}

impl TaskTable {
    fn contains(&self, id: &str) -> bool {
        self.active.contains_key(id) || self.history.iter().any(|t| t.id == id)
    }
}

/// 任务调度器
pub struct TaskScheduler {
    table: Mutex<TaskTable>,
    history_limit: usize,
    /// 并发派发限制
    permits: Arc<Semaphore>,
    next_seq: AtomicU64,
}

impl TaskScheduler {
    pub fn new(history_limit: usize, max_concurrent: usize) -> Self {
        Self {
            table: Mutex::new(TaskTable::default()),
            history_limit: history_limit.max(1),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            next_seq: AtomicU64::new(0),
        }
    }

    /// 登记新任务（Pending），返回在本实例内从未出现过的 ID
    pub async fn schedule_task(&self, request: AgentRequest) -> TaskId {
        let mut table = self.table.lock().await;
        let id = loop {
            let candidate = format!("task_{}", uuid::Uuid::new_v4());
            if !table.contains(&candidate) {
                break candidate;
            }
        };

        let task = Task {
            id: id.clone(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            request,
            response: None,
            error: None,
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        table.active.insert(
            id.clone(),
            ActiveEntry {
                seq,
                task,
                cancel: CancellationToken::new(),
            },
        );
        tracing::debug!(task_id = %id, "task scheduled");
        id
    }

    /// Pending → Running
    pub async fn start_task(&self, task_id: &str) -> bool {
        let mut table = self.table.lock().await;
        match table.active.get_mut(task_id) {
            Some(entry) if entry.task.status == TaskStatus::Pending => {
                entry.task.status = TaskStatus::Running;
                entry.task.started_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Running → Succeeded
    pub async fn complete_task(&self, task_id: &str, response: AgentResponse) -> bool {
        let mut table = self.table.lock().await;
        self.finish(&mut table, task_id, TaskStatus::Succeeded, |task| {
            task.response = Some(response);
        })
    }

    /// Running → Failed
    pub async fn fail_task(&self, task_id: &str, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let mut table = self.table.lock().await;
        self.finish(&mut table, task_id, TaskStatus::Failed, |task| {
            task.error = Some(reason);
        })
    }

    /// Pending / Running → Cancelled；已终态或未知 ID 返回 false
    ///
    /// 同时触发该任务的取消令牌，让正在进行的派发中止。
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let mut table = self.table.lock().await;
        let token = table.active.get(task_id).map(|e| e.cancel.clone());
        let cancelled = self.finish(&mut table, task_id, TaskStatus::Cancelled, |_| {});
        if cancelled {
            if let Some(token) = token {
                token.cancel();
            }
            tracing::info!(task_id = %task_id, "task cancelled");
        }
        cancelled
    }

    /// 在锁内把活跃任务移入历史；Succeeded / Failed 只能从 Running 进入
    fn finish(
        &self,
        table: &mut TaskTable,
        task_id: &str,
        status: TaskStatus,
        apply: impl FnOnce(&mut Task),
    ) -> bool {
        let allowed = match table.active.get(task_id) {
            Some(entry) => match status {
                TaskStatus::Cancelled => true,
                _ => entry.task.status == TaskStatus::Running,
            },
            None => false,
        };
        if !allowed {
            return false;
        }
        let Some(entry) = table.active.remove(task_id) else {
            return false;
        };

        let mut task = entry.task;
        task.status = status;
        task.completed_at = Some(Utc::now());
        apply(&mut task);

        table.history.push_back(task);
        while table.history.len() > self.history_limit {
            if let Some(evicted) = table.history.pop_front() {
                tracing::debug!(task_id = %evicted.id, "task evicted from history");
            }
        }
        true
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.get_task(task_id).await.map(|t| t.status)
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        let table = self.table.lock().await;
        if let Some(entry) = table.active.get(task_id) {
            return Some(entry.task.clone());
        }
        table.history.iter().find(|t| t.id == task_id).cloned()
    }

    /// Pending / Running 的任务，按创建顺序
    pub async fn get_active_tasks(&self) -> Vec<Task> {
        let table = self.table.lock().await;
        let mut entries: Vec<&ActiveEntry> = table.active.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.task.clone()).collect()
    }

    /// 已结束的任务，按完成顺序
    pub async fn get_task_history(&self) -> Vec<Task> {
        self.table.lock().await.history.iter().cloned().collect()
    }

    /// 清空历史，活跃任务不受影响；返回清除的数量
    pub async fn clear_completed_tasks(&self) -> usize {
        let mut table = self.table.lock().await;
        let cleared = table.history.len();
        table.history.clear();
        cleared
    }

    /// 活跃任务的取消令牌
    pub async fn cancellation_token(&self, task_id: &str) -> Option<CancellationToken> {
        let table = self.table.lock().await;
        table.active.get(task_id).map(|e| e.cancel.clone())
    }

    /// 登记任务并在 tokio 线程池上通过路由器执行
    ///
    /// 受并发许可限制；等待许可期间被取消的任务不会启动。取消不记录为处理错误。
    pub async fn spawn_dispatch(
        self: &Arc<Self>,
        router: Arc<RequestRouter>,
        request: AgentRequest,
    ) -> TaskId {
        let task_id = self.schedule_task(request.clone()).await;
        let Some(token) = self.cancellation_token(&task_id).await else {
            return task_id;
        };

        let scheduler = Arc::clone(self);
        let id = task_id.clone();
        tokio::spawn(async move {
            let permit = tokio::select! {
                _ = token.cancelled() => return,
                permit = scheduler.permits.clone().acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                tracing::warn!(task_id = %id, "scheduler semaphore closed");
                return;
            };

            if !scheduler.start_task(&id).await {
                return;
            }

            match router.dispatch_cancellable(request, &token).await {
                Ok(response) => {
                    scheduler.complete_task(&id, response).await;
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(task_id = %id, "dispatch aborted by cancellation");
                }
                Err(e) => {
                    tracing::warn!(task_id = %id, error = %e, "task failed");
                    scheduler.fail_task(&id, e.to_string()).await;
                }
            }
        });

        task_id
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(100, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn response() -> AgentResponse {
        AgentResponse {
            content: "done".to_string(),
            confidence: 0.9,
            meta: serde_json::Map::new(),
            agent_name: "Creative".to_string(),
        }
    }

    #[tokio::test]
    async fn test_schedule_produces_distinct_ids() {
        let scheduler = TaskScheduler::default();
        let mut ids = HashSet::new();
        for i in 0..20 {
            ids.insert(scheduler.schedule_task(AgentRequest::new(format!("job {i}"))).await);
        }
        assert_eq!(ids.len(), 20);

        let active = scheduler.get_active_tasks().await;
        assert_eq!(active.len(), 20);
        assert!(active.iter().all(|t| t.status == TaskStatus::Pending));
        assert_eq!(active[0].request.prompt, "job 0");
        assert_eq!(active[19].request.prompt, "job 19");
    }

    #[tokio::test]
    async fn test_lifecycle_success() {
        let scheduler = TaskScheduler::default();
        let id = scheduler.schedule_task(AgentRequest::new("x")).await;

        // 未开始的任务不能直接完成
        assert!(!scheduler.complete_task(&id, response()).await);
        assert!(scheduler.start_task(&id).await);
        assert!(!scheduler.start_task(&id).await);
        assert_eq!(scheduler.get_task_status(&id).await, Some(TaskStatus::Running));

        assert!(scheduler.complete_task(&id, response()).await);
        let task = scheduler.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(task.completed_at.is_some());
        assert_eq!(task.response.unwrap().content, "done");
        assert!(scheduler.get_active_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_twice() {
        let scheduler = TaskScheduler::default();
        let id = scheduler.schedule_task(AgentRequest::new("x")).await;
        let token = scheduler.cancellation_token(&id).await.unwrap();

        assert!(scheduler.cancel_task(&id).await);
        assert!(token.is_cancelled());
        assert!(!scheduler.cancel_task(&id).await);
        assert_eq!(scheduler.get_task_status(&id).await, Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_unknown_and_finished() {
        let scheduler = TaskScheduler::default();
        assert!(!scheduler.cancel_task("task_missing").await);
        assert_eq!(scheduler.get_task_status("task_missing").await, None);

        let id = scheduler.schedule_task(AgentRequest::new("x")).await;
        scheduler.start_task(&id).await;
        assert!(scheduler.fail_task(&id, "boom").await);
        assert!(!scheduler.cancel_task(&id).await);
        assert_eq!(scheduler.get_task_status(&id).await, Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn test_first_terminal_transition_wins() {
        let scheduler = TaskScheduler::default();
        let id = scheduler.schedule_task(AgentRequest::new("x")).await;
        scheduler.start_task(&id).await;

        assert!(scheduler.cancel_task(&id).await);
        assert!(!scheduler.complete_task(&id, response()).await);
        assert!(!scheduler.fail_task(&id, "late").await);
        assert_eq!(scheduler.get_task_status(&id).await, Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_concurrent_cancel_and_complete() {
        let scheduler = Arc::new(TaskScheduler::default());
        for _ in 0..50 {
            let id = scheduler.schedule_task(AgentRequest::new("race")).await;
            scheduler.start_task(&id).await;

            let (s1, s2) = (Arc::clone(&scheduler), Arc::clone(&scheduler));
            let (id1, id2) = (id.clone(), id.clone());
            let cancel = tokio::spawn(async move { s1.cancel_task(&id1).await });
            let complete = tokio::spawn(async move { s2.complete_task(&id2, response()).await });

            let cancelled = cancel.await.unwrap();
            let completed = complete.await.unwrap();
            assert!(cancelled ^ completed, "exactly one transition must win");
        }
    }

    #[tokio::test]
    async fn test_history_is_ordered_and_cleared() {
        let scheduler = TaskScheduler::default();
        let a = scheduler.schedule_task(AgentRequest::new("a")).await;
        let b = scheduler.schedule_task(AgentRequest::new("b")).await;
        let c = scheduler.schedule_task(AgentRequest::new("c")).await;
        let _pending = scheduler.schedule_task(AgentRequest::new("d")).await;

        scheduler.cancel_task(&b).await;
        scheduler.start_task(&a).await;
        scheduler.complete_task(&a, response()).await;
        scheduler.start_task(&c).await;

        let history: Vec<String> = scheduler
            .get_task_history()
            .await
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(history, vec![b, a]);

        let active_before = scheduler.get_active_tasks().await.len();
        assert_eq!(active_before, 2);
        assert_eq!(scheduler.clear_completed_tasks().await, 2);
        assert!(scheduler.get_task_history().await.is_empty());
        assert_eq!(scheduler.get_active_tasks().await.len(), active_before);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let scheduler = TaskScheduler::new(2, 1);
        let mut ids = Vec::new();
        for i in 0..3 {
            let id = scheduler.schedule_task(AgentRequest::new(format!("{i}"))).await;
            scheduler.cancel_task(&id).await;
            ids.push(id);
        }
        let history = scheduler.get_task_history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, ids[1]);
        assert_eq!(scheduler.get_task_status(&ids[0]).await, None);
    }
}
