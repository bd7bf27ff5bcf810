use serde::Serialize;
use serde_json::json;
use sqlx::AnyPool;
use std::collections::HashMap;

use crate::assignment::RoundRobinAssigner;
use crate::audit;
use crate::db::{self, CategoryRecord, DbKind, RoutingRuleRecord, TeamRecord};
use crate::error::HubError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryMatch {
    pub category: CategoryRecord,
    pub rule_id: String,
    pub keyword: String,
}

/// A rule paired with its category, ready for matching.
#[derive(Debug, Clone)]
pub struct PreparedRule {
    pub category: CategoryRecord,
    pub rule: RoutingRuleRecord,
    keywords: Vec<String>,
}

/// Drops rules pointing at missing categories or carrying no usable keyword,
/// then orders by (category key, rule id).
pub fn prepare_rules(
    rules: Vec<RoutingRuleRecord>,
    categories: &[CategoryRecord],
) -> Vec<PreparedRule> {
    let by_id: HashMap<&str, &CategoryRecord> =
        categories.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut prepared: Vec<PreparedRule> = rules
        .into_iter()
        .filter_map(|rule| {
            let category = by_id.get(rule.category_id.as_str())?;
            let keywords: Vec<String> = rule
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                return None;
            }
            Some(PreparedRule {
                category: (*category).clone(),
                rule,
                keywords,
            })
        })
        .collect();

    prepared.sort_by(|a, b| {
        a.category
            .key
            .cmp(&b.category.key)
            .then_with(|| a.rule.id.cmp(&b.rule.id))
    });
    prepared
}

pub fn match_rules(prepared: &[PreparedRule], text: &str) -> Option<CategoryMatch> {
    let haystack = text.to_lowercase();
    prepared.iter().find_map(|p| {
        p.keywords
            .iter()
            .find(|k| haystack.contains(k.as_str()))
            .map(|keyword| CategoryMatch {
                category: p.category.clone(),
                rule_id: p.rule.id.clone(),
                keyword: keyword.clone(),
            })
    })
}

/// Default team first, then by name, then by id.
pub fn select_team(mut teams: Vec<TeamRecord>) -> Option<TeamRecord> {
    teams.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    teams.into_iter().next()
}

pub async fn infer_category(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    text: &str,
) -> Result<Option<CategoryMatch>, HubError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let rules = db::list_routing_rules(pool, kind, workspace_id).await?;
    if rules.is_empty() {
        return Ok(None);
    }
    let categories = db::list_categories(pool, kind, workspace_id).await?;
    let prepared = prepare_rules(rules, &categories);
    Ok(match_rules(&prepared, text))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOutcome {
    pub routed: bool,
    pub reason: Option<&'static str>,
    pub category_id: Option<String>,
    pub previous_team_id: Option<String>,
    pub team_id: Option<String>,
    pub changed: bool,
    pub member_id: Option<String>,
}

impl RouteOutcome {
    fn not_routed(reason: &'static str, category_id: Option<String>) -> Self {
        Self {
            routed: false,
            reason: Some(reason),
            category_id,
            previous_team_id: None,
            team_id: None,
            changed: false,
            member_id: None,
        }
    }
}

pub async fn route_to_team(
    pool: &AnyPool,
    kind: DbKind,
    assigner: &dyn RoundRobinAssigner,
    workspace_id: &str,
    conversation_id: &str,
    category_override: Option<&str>,
) -> Result<RouteOutcome, HubError> {
    let thread = db::get_thread(pool, kind, conversation_id)
        .await?
        .filter(|t| t.workspace_id == workspace_id)
        .ok_or(HubError::NotFound("thread"))?;

    let Some(category_id) = category_override
        .map(String::from)
        .or_else(|| thread.category_id.clone())
    else {
        return Ok(RouteOutcome::not_routed("no_category", None));
    };

    let teams = db::teams_for_category(pool, kind, workspace_id, &category_id).await?;
    let Some(team) = select_team(teams) else {
        return Ok(RouteOutcome::not_routed("no_team_mapping", Some(category_id)));
    };

    let previous_team_id = thread.assigned_team_id.clone();
    let changed = previous_team_id.as_deref() != Some(team.id.as_str());
    if changed {
        db::set_thread_team(pool, kind, conversation_id, &team.id).await?;
    }

    audit::record_event(
        pool,
        kind,
        workspace_id,
        "routing.team_assigned",
        json!({
            "threadId": conversation_id,
            "categoryId": category_id,
            "previousTeamId": previous_team_id,
            "teamId": team.id,
            "changed": changed,
        }),
    )
    .await;

    let mut member_id = if changed {
        None
    } else {
        thread.assigned_member_id.clone()
    };
    if member_id.is_none() {
        match assigner.assign(conversation_id, &team.id).await {
            Ok(assigned) => member_id = assigned,
            Err(err) => tracing::warn!(
                workspace_id = %workspace_id,
                thread_id = %conversation_id,
                team_id = %team.id,
                error = %err,
                "round robin assignment failed"
            ),
        }
    }

    Ok(RouteOutcome {
        routed: true,
        reason: None,
        category_id: Some(category_id),
        previous_team_id,
        team_id: Some(team.id),
        changed,
        member_id,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoRouteOutcome {
    Disabled,
    NoMatch,
    Routed(RouteOutcome),
    Failed,
}

/// Routes a conversation after a new inbound message. Never fails; errors are
/// logged and reported as `Failed`.
pub async fn maybe_auto_route_inbound(
    pool: &AnyPool,
    kind: DbKind,
    assigner: &dyn RoundRobinAssigner,
    auto_route_default: bool,
    workspace_id: &str,
    conversation_id: &str,
    text: Option<&str>,
) -> AutoRouteOutcome {
    match auto_route(
        pool,
        kind,
        assigner,
        auto_route_default,
        workspace_id,
        conversation_id,
        text,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(
                workspace_id = %workspace_id,
                thread_id = %conversation_id,
                error = %err,
                "auto routing failed"
            );
            AutoRouteOutcome::Failed
        }
    }
}

async fn auto_route(
    pool: &AnyPool,
    kind: DbKind,
    assigner: &dyn RoundRobinAssigner,
    auto_route_default: bool,
    workspace_id: &str,
    conversation_id: &str,
    text: Option<&str>,
) -> Result<AutoRouteOutcome, HubError> {
    let enabled = db::get_workspace_settings(pool, kind, workspace_id)
        .await?
        .map(|s| s.auto_routing)
        .unwrap_or(auto_route_default);
    if !enabled {
        return Ok(AutoRouteOutcome::Disabled);
    }

    let thread = db::get_thread(pool, kind, conversation_id)
        .await?
        .ok_or(HubError::NotFound("thread"))?;
    if thread.category_id.is_some() {
        let outcome =
            route_to_team(pool, kind, assigner, workspace_id, conversation_id, None).await?;
        return Ok(AutoRouteOutcome::Routed(outcome));
    }

    let Some(found) = infer_category(pool, kind, workspace_id, text.unwrap_or_default()).await?
    else {
        return Ok(AutoRouteOutcome::NoMatch);
    };

    db::set_thread_category(pool, kind, conversation_id, &found.category.id).await?;
    audit::record_event(
        pool,
        kind,
        workspace_id,
        "routing.category_inferred",
        json!({
            "threadId": conversation_id,
            "categoryId": found.category.id,
            "ruleId": found.rule_id,
            "keyword": found.keyword,
        }),
    )
    .await;

    let outcome = route_to_team(
        pool,
        kind,
        assigner,
        workspace_id,
        conversation_id,
        Some(&found.category.id),
    )
    .await?;
    Ok(AutoRouteOutcome::Routed(outcome))
}
