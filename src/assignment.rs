use async_trait::async_trait;
use sqlx::AnyPool;

use crate::db::{self, DbKind};

/// Picks a member of `team_id` for a conversation and records it.
/// Returns the assigned member, or `None` when nobody could be assigned.
#[async_trait]
pub trait RoundRobinAssigner: Send + Sync {
    async fn assign(&self, conversation_id: &str, team_id: &str) -> anyhow::Result<Option<String>>;
}

/// `counter` starts at 1, so the first call picks the first member.
pub fn pick_member(members: &[String], counter: i64) -> Option<&String> {
    if members.is_empty() || counter < 1 {
        return None;
    }
    let idx = ((counter - 1) as u64 % members.len() as u64) as usize;
    members.get(idx)
}

#[derive(Debug, Clone)]
pub struct SqlRoundRobin {
    pool: AnyPool,
    kind: DbKind,
}

impl SqlRoundRobin {
    pub fn new(pool: AnyPool, kind: DbKind) -> Self {
        Self { pool, kind }
    }
}

#[async_trait]
impl RoundRobinAssigner for SqlRoundRobin {
    async fn assign(&self, conversation_id: &str, team_id: &str) -> anyhow::Result<Option<String>> {
        let members = db::active_team_members(&self.pool, self.kind, team_id).await?;
        if members.is_empty() {
            tracing::debug!(team_id = %team_id, "team has no active members");
            return Ok(None);
        }

        let counter = db::next_round_robin_counter(&self.pool, self.kind, team_id).await?;
        let Some(member) = pick_member(&members, counter) else {
            return Ok(None);
        };

        let written =
            db::set_thread_member_if_team(&self.pool, self.kind, conversation_id, team_id, member)
                .await?;
        if !written {
            tracing::info!(
                thread_id = %conversation_id,
                team_id = %team_id,
                "thread moved to another team before assignment"
            );
            return Ok(None);
        }
        Ok(Some(member.clone()))
    }
}
