//! Offline generator. Recognises entities from a keyword catalog and edit
//! commands from a handful of phrases, so a full run works without a model.

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{Value, json};

use super::layout::{self, pluralize, task_entity, title_case};
use super::{
    GenerationContext, GenerationError, GenerationTask, Generator, IntentSummary,
    StructuredResult, UseCasePlan,
};
use crate::core::llm::extract_json_block;
use crate::core::patch::{EditOperation, PatchOp, TargetType};
use crate::core::tree::{ComponentType, ConfigTree, Entity, Field, FieldType, Relationship};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "i", "me", "my", "we", "our", "want", "need", "please", "build", "create",
    "make", "generate", "simple", "basic", "small", "app", "application", "for", "with", "to",
    "and", "of", "that", "which", "can", "lets", "let", "us",
];

fn entity(name: &str, fields: Vec<Field>) -> Entity {
    Entity {
        name: name.to_string(),
        fields,
        relationships: vec![],
    }
}

/// Catalog entities and the words that bring them in.
const CATALOG: &[(&str, &[&str])] = &[
    ("task", &["task", "todo", "to-do", "chore"]),
    ("project", &["project"]),
    ("contact", &["contact", "address book"]),
    ("customer", &["customer", "client", "crm"]),
    ("order", &["order", "shop", "store", "sales"]),
    ("product", &["product", "inventory", "catalog"]),
    ("invoice", &["invoice", "billing"]),
    ("event", &["event", "calendar", "meeting"]),
    ("note", &["note", "journal"]),
    ("employee", &["employee", "staff", "hr"]),
    ("ticket", &["ticket", "helpdesk", "support"]),
];

fn catalog_entity(name: &str) -> Entity {
    match name {
        "project" => entity(name, vec![
            Field::new("name", FieldType::String).required(),
            Field::new("status", FieldType::Select).with_options(&["planned", "active", "completed"]),
            Field::new("deadline", FieldType::Date),
        ]),
        "contact" => entity(name, vec![
            Field::new("name", FieldType::String).required(),
            Field::new("email", FieldType::Email),
            Field::new("phone", FieldType::String),
            Field::new("company", FieldType::String),
        ]),
        "customer" => entity(name, vec![
            Field::new("name", FieldType::String).required(),
            Field::new("email", FieldType::Email).required(),
            Field::new("tier", FieldType::Select).with_options(&["free", "pro", "enterprise"]),
        ]),
        "order" => entity(name, vec![
            Field::new("total", FieldType::Number).required(),
            Field::new("status", FieldType::Select)
                .with_options(&["pending", "paid", "shipped", "cancelled"]),
            Field::new("ordered_at", FieldType::Datetime),
        ]),
        "product" => entity(name, vec![
            Field::new("name", FieldType::String).required(),
            Field::new("price", FieldType::Number).required(),
            Field::new("in_stock", FieldType::Boolean),
            Field::new("category", FieldType::Select)
                .with_options(&["hardware", "software", "service"]),
        ]),
        "invoice" => entity(name, vec![
            Field::new("number", FieldType::String).required(),
            Field::new("amount", FieldType::Number).required(),
            Field::new("due_date", FieldType::Date),
            Field::new("status", FieldType::Select).with_options(&["draft", "sent", "paid"]),
        ]),
        "event" => entity(name, vec![
            Field::new("title", FieldType::String).required(),
            Field::new("starts_at", FieldType::Datetime).required(),
            Field::new("location", FieldType::String),
        ]),
        "note" => entity(name, vec![
            Field::new("title", FieldType::String).required(),
            Field::new("body", FieldType::Text),
        ]),
        "employee" => entity(name, vec![
            Field::new("name", FieldType::String).required(),
            Field::new("email", FieldType::Email),
            Field::new("department", FieldType::Select)
                .with_options(&["engineering", "sales", "support", "operations"]),
            Field::new("hired_on", FieldType::Date),
        ]),
        "ticket" => entity(name, vec![
            Field::new("subject", FieldType::String).required(),
            Field::new("priority", FieldType::Select).with_options(&["low", "medium", "high"]),
            Field::new("status", FieldType::Select)
                .with_options(&["open", "in_progress", "closed"]),
            Field::new("description", FieldType::Text),
        ]),
        _ => task_entity(),
    }
}

/// Foreign keys wired up when both ends are present: (owner, field, target).
const LINKS: &[(&str, &str, &str)] = &[
    ("order", "customer_id", "customer"),
    ("invoice", "customer_id", "customer"),
    ("task", "project_id", "project"),
    ("ticket", "assignee_id", "employee"),
];

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

fn mentions(text: &str, keyword: &str) -> bool {
    let lower = text.to_lowercase();
    if keyword.contains(' ') {
        return lower.contains(keyword);
    }
    words(&lower)
        .iter()
        .any(|w| w == keyword || *w == pluralize(keyword))
}

fn catalog_entities(text: &str) -> Vec<Entity> {
    let mut entities: Vec<Entity> = CATALOG
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| mentions(text, k)))
        .map(|(name, _)| catalog_entity(name))
        .collect();
    if entities.is_empty() {
        entities.push(task_entity());
    }

    for (owner, field, target) in LINKS {
        let has_target = entities.iter().any(|e| e.name == *target);
        if has_target && let Some(e) = entities.iter_mut().find(|e| e.name == *owner) {
            e.fields.push(Field::new(field, FieldType::Number));
            e.relationships.push(Relationship {
                field: field.to_string(),
                target: target.to_string(),
            });
        }
    }
    entities
}

fn app_name(instruction: &str) -> String {
    let kept: Vec<String> = words(instruction)
        .into_iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .take(2)
        .collect();
    if kept.is_empty() {
        "My App".to_string()
    } else {
        title_case(&kept.join(" "))
    }
}

/// Entity named by a user word: exact, singular, or plural match.
fn resolve_entity(current: Option<&ConfigTree>, word: &str) -> String {
    let word = word.to_lowercase();
    let Some(tree) = current else {
        return word;
    };
    tree.entities
        .iter()
        .find(|e| {
            let name = e.name.to_lowercase();
            name == word || pluralize(&name) == word
        })
        .map(|e| e.name.clone())
        .unwrap_or(word)
}

/// Page key named by a user word: a key, a title, or an entity plural.
fn resolve_page(current: Option<&ConfigTree>, word: &str) -> String {
    let word = word.to_lowercase();
    let Some(tree) = current else {
        return word;
    };
    if tree.pages.contains_key(&word) {
        return word;
    }
    tree.pages
        .iter()
        .find(|(_, p)| p.title.to_lowercase() == word)
        .map(|(k, _)| k.clone())
        .or_else(|| {
            let plural = pluralize(&word);
            tree.pages.contains_key(&plural).then_some(plural)
        })
        .unwrap_or(word)
}

fn pattern(re: &str) -> Result<Regex, GenerationError> {
    Regex::new(re).map_err(|e| GenerationError::Provider(format!("bad edit pattern: {}", e)))
}

fn cap<'t>(caps: &Captures<'t>, name: &str) -> Option<&'t str> {
    caps.name(name).map(|m| m.as_str())
}

fn parse_edit(instruction: &str, current: Option<&ConfigTree>) -> Result<EditOperation, GenerationError> {
    if let Some(block) = extract_json_block(instruction) {
        let value: Value = serde_json::from_str(block)
            .map_err(|e| GenerationError::Unsupported(format!("edit instruction is not valid JSON: {}", e)))?;
        return EditOperation::normalize(&value).map_err(GenerationError::Unsupported);
    }

    let text = instruction.trim().trim_end_matches(['.', '!']).trim();

    let re = pattern(r"(?i)^add\s+(?:an?\s+)?(?:(?P<kind>\w+)\s+)?field\s+(?P<field>\w+)\s+(?:to|on)\s+(?:the\s+)?(?P<entity>\w+)$")?;
    if let Some(c) = re.captures(text) {
        let entity = resolve_entity(current, cap(&c, "entity").unwrap_or_default());
        let field = cap(&c, "field").unwrap_or_default();
        let kind = cap(&c, "kind").unwrap_or("string").to_lowercase();
        return Ok(EditOperation::new(
            TargetType::Field,
            &entity,
            PatchOp::Add,
            json!({"name": field, "type": kind}),
        ));
    }

    let re = pattern(r"(?i)^(?:remove|delete)\s+(?:the\s+)?field\s+(?P<field>\w+)\s+from\s+(?:the\s+)?(?P<entity>\w+)$")?;
    if let Some(c) = re.captures(text) {
        let entity = resolve_entity(current, cap(&c, "entity").unwrap_or_default());
        let path = format!("{}.{}", entity, cap(&c, "field").unwrap_or_default());
        return Ok(EditOperation::new(TargetType::Field, &path, PatchOp::Remove, Value::Null));
    }

    let re = pattern(r"(?i)^(?:remove|delete)\s+(?:the\s+)?entity\s+(?P<entity>\w+)$")?;
    if let Some(c) = re.captures(text) {
        let entity = resolve_entity(current, cap(&c, "entity").unwrap_or_default());
        return Ok(EditOperation::new(TargetType::Data, &entity, PatchOp::Remove, Value::Null));
    }

    let re = pattern(r"(?i)^regenerate\s+(?:the\s+)?(?:data\s+for\s+)?(?P<entity>\w+)(?:\s+data)?$")?;
    if let Some(c) = re.captures(text) {
        let entity = resolve_entity(current, cap(&c, "entity").unwrap_or_default());
        return Ok(EditOperation::new(
            TargetType::Data,
            &entity,
            PatchOp::Update,
            json!({"regenerate": true}),
        ));
    }

    let re = pattern(r"(?i)^(?:remove|delete)\s+(?:the\s+)?page\s+(?P<page>[\w-]+)$")?;
    if let Some(c) = re.captures(text) {
        let page = resolve_page(current, cap(&c, "page").unwrap_or_default());
        return Ok(EditOperation::new(TargetType::Page, &page, PatchOp::Remove, Value::Null));
    }

    let re = pattern(r"(?i)^add\s+(?:an?\s+)?(?:new\s+)?page\s+(?P<page>[\w-]+)$")?;
    if let Some(c) = re.captures(text) {
        let page = cap(&c, "page").unwrap_or_default().to_lowercase();
        return Ok(EditOperation::new(TargetType::Page, &page, PatchOp::Add, json!({})));
    }

    let re = pattern(r"(?i)^rename\s+(?:the\s+)?page\s+(?P<page>[\w-]+)\s+to\s+(?P<title>.+)$")?;
    if let Some(c) = re.captures(text) {
        let page = resolve_page(current, cap(&c, "page").unwrap_or_default());
        let title = cap(&c, "title").unwrap_or_default().trim().trim_matches('"');
        return Ok(EditOperation::new(
            TargetType::Page,
            &page,
            PatchOp::Update,
            json!({"title": title}),
        ));
    }

    let re = pattern(
        r"(?i)^add\s+(?:an?\s+)?(?:new\s+)?(?P<kind>[\w ]+?)(?:\s+component)?(?:\s+for\s+(?:the\s+)?(?P<resource>\w+))?\s+(?:to|on)\s+(?:the\s+)?(?P<page>[\w-]+)(?:\s+page)?$",
    )?;
    if let Some(c) = re.captures(text) {
        let raw_kind = cap(&c, "kind").unwrap_or_default();
        let kind = ComponentType::parse(raw_kind).ok_or_else(|| {
            GenerationError::Unsupported(format!("unknown component type '{}'", raw_kind))
        })?;
        let page = resolve_page(current, cap(&c, "page").unwrap_or_default());
        let path = format!("{}.zones[0]", page);
        let payload = match cap(&c, "resource") {
            None => Value::from(kind.as_str()),
            Some(word) => {
                let resource = resolve_entity(current, word);
                let mut props = json!({"resource": resource});
                if let Some(entity) = current.and_then(|t| t.entity(&resource)) {
                    let fields: Vec<Value> =
                        entity.data_fields().map(|f| json!({"name": f.name})).collect();
                    match kind {
                        ComponentType::SimpleForm | ComponentType::ExpandableForm => {
                            props["fields"] = Value::Array(fields);
                        }
                        ComponentType::StatusFlow => {
                            if let Some(select) = entity.data_fields().find(|f| f.kind == FieldType::Select) {
                                props["statusField"] = Value::from(select.name.as_str());
                            }
                        }
                        _ => {}
                    }
                }
                json!({"type": kind.as_str(), "props": props})
            }
        };
        return Ok(EditOperation::new(TargetType::Component, &path, PatchOp::Add, payload));
    }

    Err(GenerationError::Unsupported(format!(
        "could not understand edit instruction '{}'",
        instruction.trim()
    )))
}

pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemplateGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, ctx: &GenerationContext<'_>) -> Result<StructuredResult, GenerationError> {
        match ctx.task {
            GenerationTask::AnalyzeIntent => Ok(StructuredResult::Intent(IntentSummary {
                app_name: app_name(ctx.instruction),
                use_case_summary: ctx.instruction.trim().to_string(),
            })),
            GenerationTask::UseCases => {
                let source = ctx.use_case_summary.unwrap_or(ctx.instruction);
                let entities = catalog_entities(source);
                let pages = layout::default_page_specs(&entities);
                Ok(StructuredResult::UseCases(UseCasePlan { entities, pages }))
            }
            GenerationTask::PageConfig => Ok(StructuredResult::PageConfig(layout::build_tree(
                ctx.app_name.unwrap_or("My App"),
                ctx.entities,
                ctx.pages,
            ))),
            GenerationTask::EditIntent => parse_edit(ctx.instruction, ctx.current).map(StructuredResult::Edit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generator::layout::default_tree;

    fn ctx<'a>(task: GenerationTask, instruction: &'a str, current: Option<&'a ConfigTree>) -> GenerationContext<'a> {
        GenerationContext {
            task,
            instruction,
            prior_messages: &[],
            app_name: None,
            use_case_summary: None,
            entities: &[],
            pages: &[],
            current,
        }
    }

    #[tokio::test]
    async fn intent_and_use_cases_for_task_tracker() {
        let g = TemplateGenerator::new();
        let intent = g
            .generate(&ctx(GenerationTask::AnalyzeIntent, "Build me a task tracker with a dashboard", None))
            .await
            .unwrap()
            .into_intent()
            .unwrap();
        assert_eq!(intent.app_name, "Task Tracker");

        let plan = g
            .generate(&ctx(GenerationTask::UseCases, "a task tracker with a dashboard", None))
            .await
            .unwrap()
            .into_use_cases()
            .unwrap();
        assert_eq!(plan.entities, vec![task_entity()]);
        let keys: Vec<String> = plan.pages.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["dashboard", "tasks"]);
    }

    #[test]
    fn catalog_links_related_entities() {
        let entities = catalog_entities("CRM with customers and their orders");
        let order = entities.iter().find(|e| e.name == "order").unwrap();
        assert_eq!(order.foreign_target("customer_id"), Some("customer"));
    }

    #[test]
    fn unmatched_instruction_falls_back_to_tasks() {
        assert_eq!(catalog_entities("something vague"), vec![task_entity()]);
    }

    #[test]
    fn phrase_edits() {
        let tree = default_tree("Tasks", vec![task_entity()]);
        let current = Some(&tree);

        let op = parse_edit("Add a chart to the dashboard", current).unwrap();
        assert_eq!(op.target_type, TargetType::Component);
        assert_eq!(op.target_path, "dashboard.zones[0]");
        assert_eq!(op.payload, json!("Chart"));

        let op = parse_edit("add number field priority to tasks", current).unwrap();
        assert_eq!(op.target_path, "task");
        assert_eq!(op.payload, json!({"name": "priority", "type": "number"}));

        let op = parse_edit("remove field status from task", current).unwrap();
        assert_eq!(op.target_path, "task.status");
        assert_eq!(op.operation, PatchOp::Remove);

        let op = parse_edit("delete entity tasks", current).unwrap();
        assert_eq!((op.target_type, op.target_path.as_str()), (TargetType::Data, "task"));

        let op = parse_edit("add a form for task to the dashboard", current).unwrap();
        assert_eq!(op.payload["props"]["fields"], json!([{"name": "title"}, {"name": "status"}]));

        let op = parse_edit("rename page tasks to \"My Work\"", current).unwrap();
        assert_eq!(op.payload, json!({"title": "My Work"}));
    }

    #[test]
    fn json_instruction_is_normalized() {
        let op = parse_edit(
            r#"{"targetType":"component","targetPath":"dashboard.zones[0]","operation":"add","payload":"Chart"}"#,
            None,
        )
        .unwrap();
        assert_eq!(op.operation, PatchOp::Add);
    }

    #[test]
    fn gibberish_is_unsupported() {
        let err = parse_edit("make it pop", None).unwrap_err();
        assert!(matches!(err, GenerationError::Unsupported(_)));
    }
}
