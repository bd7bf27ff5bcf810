use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetDecision {
    Allowed,
    Denied(String),
}

/// Pre-flight check against the workspace's send budget. Billing owns the
/// ledger; this crate only asks.
#[async_trait]
pub trait BudgetGuard: Send + Sync {
    async fn assert_budget(&self, workspace_id: &str, cost: u64) -> anyhow::Result<BudgetDecision>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedBudget;

#[async_trait]
impl BudgetGuard for UnlimitedBudget {
    async fn assert_budget(&self, _workspace_id: &str, _cost: u64) -> anyhow::Result<BudgetDecision> {
        Ok(BudgetDecision::Allowed)
    }
}
