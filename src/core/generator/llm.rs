use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::layout;
use super::{
    GenerationContext, GenerationError, GenerationTask, Generator, IntentSummary,
    StructuredResult, UseCasePlan,
};
use crate::core::llm::{ChatMessage, LlmProvider, extract_json_block};
use crate::core::patch::EditOperation;
use crate::core::tree::{ConfigTree, NavItem, Page, validate_entities};

const INTENT_PROMPT: &str = "You are an expert system analyst. Extract the app name and a use case \
summary from the user's request. Respond with a JSON object with keys 'app_name' and \
'use_case_summary'. The app name should be short and title-cased. Return only JSON.";

const USE_CASES_PROMPT: &str = "Generate the entities and pages for the application described \
by the use case summary. Respond with a JSON object with an 'entities' array and a 'pages' array. \
Each entity has a lowercase singular 'name', a 'fields' array of {name, type, required, options?} \
where type is one of string, number, boolean, select, date, datetime, text, email, password, file \
(select fields must list 'options'), and an optional 'relationships' array of {field, target}. \
Each page has 'title', 'path' (starting with '/'), 'icon' and 'purpose'. Include a dashboard at \
path '/'. Return only JSON.";

const PAGE_CONFIG_PROMPT: &str = "Create the UI configuration for the given entities and pages. \
Respond with a JSON object with a 'pages' object keyed by page id. Each page has 'title', 'path', \
optional 'subtitle', optional 'parentPage', and a 'zones' array; each zone has an optional \
'title' and a 'components' array. Each component has 'type' (one of MetricCard, DataTable, \
SimpleForm, ExpandableForm, Chart, StatusFlow, TabsComponent, Modal), an optional 'title' and \
'props'. Required props: MetricCard.title, DataTable.resource, SimpleForm/ExpandableForm.resource \
and .fields ([{name}]), Chart.chartType, StatusFlow.resource and .statusField (a select field), \
TabsComponent.tabs, Modal.title. 'resource' must be one of the given entity names and every \
field name must be declared on that entity. Return only JSON.";

const EDIT_PROMPT: &str = "Analyze the edit request against the current application \
configuration and describe exactly one change as a JSON object with keys 'targetType' (page, \
component, props, field or data), 'targetPath', 'operation' (add, remove or update) and \
'payload'. Tree paths look like 'dashboard.zones[0]' or \
'tasks.zones[0].components[1].props.title'; entity paths look like 'task' or 'task.priority'. \
Return only JSON.";

/// Generator backed by an OpenAI-compatible chat model.
pub struct LlmGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
        }
    }

    fn messages(&self, ctx: &GenerationContext<'_>) -> Result<Vec<ChatMessage>, GenerationError> {
        let (system, user) = match ctx.task {
            GenerationTask::AnalyzeIntent => (INTENT_PROMPT, ctx.instruction.to_string()),
            GenerationTask::UseCases => (
                USE_CASES_PROMPT,
                ctx.use_case_summary.unwrap_or(ctx.instruction).to_string(),
            ),
            GenerationTask::PageConfig => (
                PAGE_CONFIG_PROMPT,
                format!(
                    "Entities: {}\nPages: {}",
                    to_json(ctx.entities)?,
                    to_json(ctx.pages)?
                ),
            ),
            GenerationTask::EditIntent => {
                let current = match ctx.current {
                    Some(tree) => to_json(tree)?,
                    None => "{}".to_string(),
                };
                (
                    EDIT_PROMPT,
                    format!("Current config: {}\nEdit request: {}", current, ctx.instruction),
                )
            }
        };

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(ctx.prior_messages.iter().cloned());
        messages.push(ChatMessage::user(user));
        Ok(messages)
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, GenerationError> {
    serde_json::to_string(value).map_err(|e| GenerationError::Malformed(e.to_string()))
}

fn parse_json(raw: &str) -> Result<Value, GenerationError> {
    let block = extract_json_block(raw)
        .ok_or_else(|| GenerationError::Malformed("model reply contains no JSON".to_string()))?;
    serde_json::from_str(block).map_err(|e| GenerationError::Malformed(e.to_string()))
}

fn parse_page_config(value: Value, ctx: &GenerationContext<'_>) -> Result<ConfigTree, GenerationError> {
    let pages = value.get("pages").cloned().unwrap_or(Value::Null);
    let empty = match &pages {
        Value::Object(map) => map.is_empty(),
        _ => true,
    };
    if empty {
        warn!("Model returned no pages, falling back to the default layout");
        return Ok(layout::build_tree(
            ctx.app_name.unwrap_or("My App"),
            ctx.entities,
            ctx.pages,
        ));
    }

    let pages: BTreeMap<String, Page> = serde_json::from_value(pages)
        .map_err(|e| GenerationError::Malformed(format!("pages: {}", e)))?;
    // Navigation and entities come from the earlier steps, not the model.
    let mut tree = layout::build_tree(ctx.app_name.unwrap_or("My App"), ctx.entities, &[]);
    tree.navigation.items = pages
        .iter()
        .filter(|(_, p)| p.parent_page.is_none())
        .map(|(key, p)| NavItem {
            label: p.title.clone(),
            page: key.clone(),
            icon: p.icon.clone(),
        })
        .collect();
    tree.pages = pages;
    Ok(tree)
}

#[async_trait]
impl Generator for LlmGenerator {
    fn name(&self) -> &str {
        "llm"
    }

    async fn generate(&self, ctx: &GenerationContext<'_>) -> Result<StructuredResult, GenerationError> {
        let messages = self.messages(ctx)?;
        debug!("LLM request for {} ({} messages)", ctx.task.as_str(), messages.len());
        let raw = self
            .provider
            .generate(&self.model, &messages)
            .await
            .map_err(|e| GenerationError::Provider(format!("{:#}", e)))?;
        let value = parse_json(&raw)?;

        match ctx.task {
            GenerationTask::AnalyzeIntent => {
                let intent: IntentSummary = serde_json::from_value(value)
                    .map_err(|e| GenerationError::Malformed(format!("intent: {}", e)))?;
                Ok(StructuredResult::Intent(intent))
            }
            GenerationTask::UseCases => {
                let plan: UseCasePlan = serde_json::from_value(value)
                    .map_err(|e| GenerationError::Malformed(format!("use cases: {}", e)))?;
                validate_entities(&plan.entities)
                    .map_err(|report| GenerationError::Malformed(format!("entities: {}", report)))?;
                Ok(StructuredResult::UseCases(plan))
            }
            GenerationTask::PageConfig => parse_page_config(value, ctx).map(StructuredResult::PageConfig),
            GenerationTask::EditIntent => EditOperation::normalize(&value)
                .map(StructuredResult::Edit)
                .map_err(GenerationError::Malformed),
        }
    }
}
