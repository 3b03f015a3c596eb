//! Agent Registry (AR) - register agents, track liveness, match
//! capabilities, dispatch tasks, broadcast discoveries.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Heartbeat interval agents are expected to honor.
pub const HEARTBEAT_INTERVAL_SECS: i64 = 30;
/// Missed-heartbeat threshold after which an agent is considered idle.
pub const IDLE_AFTER_SECS: i64 = 90;
/// Missed-heartbeat threshold after which an agent is considered offline.
pub const OFFLINE_AFTER_SECS: i64 = 300;
/// Multiple of the heartbeat interval after which registry housekeeping
/// drops an agent from the active roster entirely.
pub const STALE_AFTER: i64 = 3 * HEARTBEAT_INTERVAL_SECS;
/// Base delay for the exponential backoff applied to a task's retry after
/// every candidate has declined it.
pub const RETRY_BASE_SECS: i64 = 30;
/// Ceiling on the backoff delay, so a much-declined task still gets retried
/// at a bounded cadence rather than drifting out to hours.
pub const RETRY_MAX_SECS: i64 = 30 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Idle,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub agent_id: String,
    pub role: String,
    pub capabilities: HashSet<String>,
    pub description: Option<String>,
    pub machine_id: String,
    pub status: AgentStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub active_task_count: u32,
}

impl Agent {
    /// Recompute `status` from elapsed time since the last heartbeat.
    /// Registry housekeeping calls this before every roster read.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_heartbeat_at).num_seconds();
        self.status = if elapsed >= OFFLINE_AFTER_SECS {
            AgentStatus::Offline
        } else if elapsed >= IDLE_AFTER_SECS {
            AgentStatus::Idle
        } else {
            AgentStatus::Active
        };
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Offered,
    Assigned,
    InProgress,
    Declined,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub requester_agent_id: Option<String>,
    pub requester_machine_id: String,
    pub required_capabilities: HashSet<String>,
    pub category: String,
    pub description: String,
    pub local_only: bool,
    pub status: TaskStatus,
    pub assigned_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attempt: u32,
    /// Agents that have already declined this task; excluded from
    /// subsequent candidate matching so a decline never loops back.
    #[serde(default)]
    pub declined_agent_ids: HashSet<String>,
    /// Set when every eligible candidate has declined and the task is
    /// waiting out an exponential backoff before matching is retried.
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,
}

/// Roster filter for `AgentRegistry::roster`.
#[derive(Debug, Clone, Default)]
pub struct RosterFilter {
    pub role: Option<String>,
    pub capability: Option<String>,
    pub machine_id: Option<String>,
    pub status: Option<AgentStatus>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("no eligible agent for task {0}")]
    NoEligibleAgent(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Exponential backoff for a task's Nth retry: `RETRY_BASE_SECS * 2^(attempt-1)`,
/// capped at `RETRY_MAX_SECS`.
fn backoff_secs(attempt: u32) -> i64 {
    let shift = attempt.saturating_sub(1).min(16);
    RETRY_BASE_SECS.saturating_mul(1i64 << shift).min(RETRY_MAX_SECS)
}

/// In-memory agent roster and task queue. Guarded by a single mutex per
/// §5's "read-heavy, copy-on-write snapshot" shared-resource policy - reads
/// clone a snapshot rather than holding the lock across awaits.
pub struct AgentRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<String, Agent>,
    tasks: HashMap<String, Task>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryState::default()),
        }
    }

    /// Upsert an agent, marking it active with a fresh heartbeat.
    pub fn register(
        &self,
        agent_id: &str,
        role: &str,
        capabilities: HashSet<String>,
        description: Option<String>,
        machine_id: &str,
    ) -> Agent {
        let now = Utc::now();
        let mut state = self.inner.lock().expect("registry lock poisoned");
        let entry = state
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| Agent {
                agent_id: agent_id.to_string(),
                role: role.to_string(),
                capabilities: capabilities.clone(),
                description: description.clone(),
                machine_id: machine_id.to_string(),
                status: AgentStatus::Active,
                last_heartbeat_at: now,
                registered_at: now,
                active_task_count: 0,
            });
        entry.role = role.to_string();
        entry.capabilities = capabilities;
        entry.description = description;
        entry.machine_id = machine_id.to_string();
        entry.status = AgentStatus::Active;
        entry.last_heartbeat_at = now;
        entry.clone()
    }

    pub fn heartbeat(&self, agent_id: &str) -> Result<()> {
        let mut state = self.inner.lock().expect("registry lock poisoned");
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))?;
        agent.last_heartbeat_at = Utc::now();
        agent.status = AgentStatus::Active;
        Ok(())
    }

    /// Snapshot the roster, refreshing liveness status first, optionally
    /// filtered by role/capability/machine/status.
    pub fn roster(&self, filter: &RosterFilter) -> Vec<Agent> {
        let now = Utc::now();
        let mut state = self.inner.lock().expect("registry lock poisoned");
        for agent in state.agents.values_mut() {
            agent.refresh_status(now);
        }
        state
            .agents
            .values()
            .filter(|a| filter.role.as_deref().is_none_or(|r| a.role == r))
            .filter(|a| {
                filter
                    .capability
                    .as_deref()
                    .is_none_or(|c| a.capabilities.contains(c))
            })
            .filter(|a| {
                filter
                    .machine_id
                    .as_deref()
                    .is_none_or(|m| a.machine_id == m)
            })
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .cloned()
            .collect()
    }

    /// Drop agents that have missed `STALE_AFTER` seconds of heartbeats
    /// entirely, rather than merely marking them offline. Run periodically
    /// by the background sweeper pool (§5).
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut state = self.inner.lock().expect("registry lock poisoned");
        let threshold = Duration::seconds(STALE_AFTER * 3);
        let stale: Vec<String> = state
            .agents
            .values()
            .filter(|a| now - a.last_heartbeat_at > threshold)
            .map(|a| a.agent_id.clone())
            .collect();
        for id in &stale {
            state.agents.remove(id);
        }
        stale
    }

    /// Queue a task for delegation and immediately attempt to match it.
    pub fn delegate(&self, mut task: Task) -> Result<Task> {
        task.status = TaskStatus::Pending;
        let assigned = {
            let state = self.inner.lock().expect("registry lock poisoned");
            self.best_candidate(&state, &task)
        };

        let mut state = self.inner.lock().expect("registry lock poisoned");
        match assigned {
            Some(agent_id) => {
                task.status = TaskStatus::Offered;
                task.assigned_agent_id = Some(agent_id.clone());
                if let Some(agent) = state.agents.get_mut(&agent_id) {
                    agent.active_task_count += 1;
                }
            }
            None => {
                task.status = TaskStatus::Pending;
            }
        }
        state.tasks.insert(task.task_id.clone(), task.clone());
        Ok(task)
    }

    /// Capability-matching ranking per §4.4: specificity, then load, then
    /// locality, with a random tiebreak among equally-ranked candidates.
    fn best_candidate(&self, state: &RegistryState, task: &Task) -> Option<String> {
        let mut candidates: Vec<&Agent> = state
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Active)
            .filter(|a| !task.declined_agent_ids.contains(&a.agent_id))
            .filter(|a| task.required_capabilities.is_subset(&a.capabilities))
            .collect();

        if candidates.is_empty() {
            return None;
        }

        candidates.sort_by(|a, b| {
            let spec_a = a.capabilities.intersection(&task.required_capabilities).count();
            let spec_b = b.capabilities.intersection(&task.required_capabilities).count();
            spec_b
                .cmp(&spec_a)
                .then(a.active_task_count.cmp(&b.active_task_count))
                .then_with(|| {
                    let local_a = (a.machine_id == task.requester_machine_id) as u8;
                    let local_b = (b.machine_id == task.requester_machine_id) as u8;
                    local_b.cmp(&local_a)
                })
        });

        candidates.first().map(|a| a.agent_id.clone())
    }

    /// Caller declined the offered task. Per §4.4 step 3, re-offer to the
    /// next-best remaining candidate immediately; if none is eligible,
    /// requeue as `Pending` with an exponential backoff before the next
    /// match attempt (see `retry_pending`).
    pub fn decline(&self, task_id: &str, declining_agent_id: &str) -> Result<Task> {
        let mut state = self.inner.lock().expect("registry lock poisoned");
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?
            .clone();
        if task.assigned_agent_id.as_deref() != Some(declining_agent_id) {
            return Ok(task);
        }

        if let Some(agent) = state.agents.get_mut(declining_agent_id) {
            agent.active_task_count = agent.active_task_count.saturating_sub(1);
        }

        let mut task = task;
        task.attempt += 1;
        task.declined_agent_ids.insert(declining_agent_id.to_string());

        match self.best_candidate(&state, &task) {
            Some(next_agent_id) => {
                task.status = TaskStatus::Offered;
                task.assigned_agent_id = Some(next_agent_id.clone());
                task.retry_after = None;
                if let Some(agent) = state.agents.get_mut(&next_agent_id) {
                    agent.active_task_count += 1;
                }
            }
            None => {
                task.status = TaskStatus::Pending;
                task.assigned_agent_id = None;
                task.retry_after = Some(Utc::now() + Duration::seconds(backoff_secs(task.attempt)));
            }
        }

        state.tasks.insert(task.task_id.clone(), task.clone());
        Ok(task)
    }

    /// Re-attempt matching for every `Pending` task whose backoff has
    /// elapsed. Run on the same cadence as `sweep_stale` by the background
    /// sweeper pool (§5). Returns the ids of tasks that were re-offered.
    pub fn retry_pending(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut state = self.inner.lock().expect("registry lock poisoned");
        let due: Vec<String> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.retry_after.is_none_or(|at| at <= now))
            .map(|t| t.task_id.clone())
            .collect();

        let mut reoffered = Vec::new();
        for task_id in due {
            let task = state.tasks.get(&task_id).expect("task vanished mid-sweep").clone();
            if let Some(agent_id) = self.best_candidate(&state, &task) {
                let mut task = task;
                task.status = TaskStatus::Offered;
                task.assigned_agent_id = Some(agent_id.clone());
                task.retry_after = None;
                if let Some(agent) = state.agents.get_mut(&agent_id) {
                    agent.active_task_count += 1;
                }
                state.tasks.insert(task_id.clone(), task);
                reoffered.push(task_id);
            }
        }
        reoffered
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .agents
            .get(agent_id)
            .cloned()
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .tasks
            .get(task_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_is_idempotent_and_upserts() {
        let registry = AgentRegistry::new();
        registry.register("a1", "worker", caps(&["rust"]), None, "m1");
        registry.register("a1", "worker", caps(&["rust", "python"]), None, "m1");
        let agent = registry.get_agent("a1").unwrap();
        assert_eq!(agent.capabilities.len(), 2);
    }

    #[test]
    fn delegate_picks_most_specific_least_loaded_agent() {
        let registry = AgentRegistry::new();
        registry.register("generalist", "worker", caps(&["rust"]), None, "m1");
        registry.register("specialist", "worker", caps(&["rust", "sqlite"]), None, "m1");

        let task = Task {
            task_id: "t1".into(),
            requester_agent_id: None,
            requester_machine_id: "m1".into(),
            required_capabilities: caps(&["rust", "sqlite"]),
            category: "infra".into(),
            description: "fix the index".into(),
            local_only: false,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            created_at: Utc::now(),
            attempt: 0,
            declined_agent_ids: HashSet::new(),
            retry_after: None,
        };
        let offered = registry.delegate(task).unwrap();
        assert_eq!(offered.assigned_agent_id.as_deref(), Some("specialist"));
    }

    #[test]
    fn delegate_with_no_eligible_agent_stays_pending() {
        let registry = AgentRegistry::new();
        registry.register("a1", "worker", caps(&["python"]), None, "m1");
        let task = Task {
            task_id: "t1".into(),
            requester_agent_id: None,
            requester_machine_id: "m1".into(),
            required_capabilities: caps(&["rust"]),
            category: "infra".into(),
            description: "".into(),
            local_only: false,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            created_at: Utc::now(),
            attempt: 0,
            declined_agent_ids: HashSet::new(),
            retry_after: None,
        };
        let result = registry.delegate(task).unwrap();
        assert_eq!(result.status, TaskStatus::Pending);
        assert!(result.assigned_agent_id.is_none());
    }

    #[test]
    fn decline_with_no_other_candidate_backs_off_to_pending() {
        let registry = AgentRegistry::new();
        registry.register("a1", "worker", caps(&["rust"]), None, "m1");
        let task = Task {
            task_id: "t1".into(),
            requester_agent_id: None,
            requester_machine_id: "m1".into(),
            required_capabilities: caps(&["rust"]),
            category: "infra".into(),
            description: "".into(),
            local_only: false,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            created_at: Utc::now(),
            attempt: 0,
            declined_agent_ids: HashSet::new(),
            retry_after: None,
        };
        registry.delegate(task).unwrap();
        let declined = registry.decline("t1", "a1").unwrap();
        assert_eq!(declined.status, TaskStatus::Pending);
        assert_eq!(declined.attempt, 1);
        assert!(declined.retry_after.is_some());
        assert!(declined.declined_agent_ids.contains("a1"));
        assert_eq!(registry.get_agent("a1").unwrap().active_task_count, 0);
    }

    #[test]
    fn decline_reoffers_to_the_next_best_candidate() {
        let registry = AgentRegistry::new();
        registry.register("a1", "worker", caps(&["rust"]), None, "m1");
        registry.register("a2", "worker", caps(&["rust"]), None, "m1");
        let task = Task {
            task_id: "t1".into(),
            requester_agent_id: None,
            requester_machine_id: "m1".into(),
            required_capabilities: caps(&["rust"]),
            category: "infra".into(),
            description: "".into(),
            local_only: false,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            created_at: Utc::now(),
            attempt: 0,
            declined_agent_ids: HashSet::new(),
            retry_after: None,
        };
        let offered = registry.delegate(task).unwrap();
        let first_candidate = offered.assigned_agent_id.clone().unwrap();

        let declined = registry.decline("t1", &first_candidate).unwrap();
        assert_eq!(declined.status, TaskStatus::Offered);
        let second_candidate = declined.assigned_agent_id.clone().unwrap();
        assert_ne!(first_candidate, second_candidate);
        assert_eq!(registry.get_agent(&first_candidate).unwrap().active_task_count, 0);
        assert_eq!(registry.get_agent(&second_candidate).unwrap().active_task_count, 1);
    }

    #[test]
    fn retry_pending_reoffers_once_backoff_has_elapsed() {
        let registry = AgentRegistry::new();
        registry.register("a1", "worker", caps(&["rust"]), None, "m1");
        let task = Task {
            task_id: "t1".into(),
            requester_agent_id: None,
            requester_machine_id: "m1".into(),
            required_capabilities: caps(&["rust"]),
            category: "infra".into(),
            description: "".into(),
            local_only: false,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            created_at: Utc::now(),
            attempt: 0,
            declined_agent_ids: HashSet::new(),
            retry_after: None,
        };
        registry.delegate(task).unwrap();
        let declined = registry.decline("t1", "a1").unwrap();
        assert_eq!(declined.status, TaskStatus::Pending);

        // The agent comes back online with the same capability (e.g. after
        // a transient disconnect) but is still in the task's decline set -
        // retry_pending should leave it untouched before the backoff elapses.
        let not_yet = registry.retry_pending(Utc::now());
        assert!(not_yet.is_empty());

        registry.register("a2", "worker", caps(&["rust"]), None, "m1");
        let reoffered = registry.retry_pending(Utc::now() + Duration::seconds(RETRY_MAX_SECS));
        assert_eq!(reoffered, vec!["t1".to_string()]);
        assert_eq!(registry.get_task("t1").unwrap().status, TaskStatus::Offered);
        assert_eq!(registry.get_task("t1").unwrap().assigned_agent_id.as_deref(), Some("a2"));
    }

    #[test]
    fn refresh_status_transitions_through_idle_to_offline() {
        let mut agent = Agent {
            agent_id: "a1".into(),
            role: "worker".into(),
            capabilities: caps(&[]),
            description: None,
            machine_id: "m1".into(),
            status: AgentStatus::Active,
            last_heartbeat_at: Utc::now() - Duration::seconds(100),
            registered_at: Utc::now(),
            active_task_count: 0,
        };
        agent.refresh_status(Utc::now());
        assert_eq!(agent.status, AgentStatus::Idle);

        agent.last_heartbeat_at = Utc::now() - Duration::seconds(400);
        agent.refresh_status(Utc::now());
        assert_eq!(agent.status, AgentStatus::Offline);
    }
}
