use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::{ConfigTree, Entity, FieldType, ID_FIELD};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// Every invariant violation found in one pass. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn into_result(self) -> Result<(), ValidationReport> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .issues
            .iter()
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationReport {}

/// Entity-level rules: unique names, unique field names, select options,
/// relationship targets.
pub fn validate_entities(entities: &[Entity]) -> Result<(), ValidationReport> {
    let mut report = ValidationReport::default();
    check_entities(entities, &mut report);
    report.into_result()
}

fn check_entities(entities: &[Entity], report: &mut ValidationReport) {
    let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    let mut seen = HashSet::new();

    for entity in entities {
        let base = format!("entities.{}", entity.name);
        if entity.name.trim().is_empty() {
            report.push("entities", "entity name must not be empty");
        }
        if !seen.insert(entity.name.as_str()) {
            report.push(&base, "duplicate entity name");
        }

        let mut field_names = HashSet::new();
        for field in &entity.fields {
            let fpath = format!("{}.{}", base, field.name);
            if field.name.trim().is_empty() {
                report.push(&base, "field name must not be empty");
            }
            if !field_names.insert(field.name.as_str()) {
                report.push(&fpath, "duplicate field name");
            }
            if field.name == ID_FIELD && field.kind != FieldType::Number && field.kind != FieldType::String {
                report.push(&fpath, "identifier field must be a string or number");
            }
            match (field.kind, &field.options) {
                (FieldType::Select, None) => report.push(&fpath, "select field requires options"),
                (FieldType::Select, Some(opts)) if opts.is_empty() => {
                    report.push(&fpath, "select field requires at least one option")
                }
                (FieldType::Select, Some(opts)) => {
                    let unique: HashSet<&String> = opts.iter().collect();
                    if unique.len() != opts.len() {
                        report.push(&fpath, "select options must be unique");
                    }
                }
                (_, Some(_)) => report.push(&fpath, "options are only allowed on select fields"),
                (_, None) => {}
            }
        }

        for rel in &entity.relationships {
            let rpath = format!("{}.relationships.{}", base, rel.field);
            if entity.field(&rel.field).is_none() {
                report.push(&rpath, "foreign key field is not declared");
            }
            if !names.contains(rel.target.as_str()) {
                report.push(&rpath, format!("unknown target entity '{}'", rel.target));
            }
        }
    }
}

/// Full structural validation of a descriptor.
pub fn validate_tree(tree: &ConfigTree) -> Result<(), ValidationReport> {
    let mut report = ValidationReport::default();
    check_entities(&tree.entities, &mut report);

    let entities: HashMap<&str, &Entity> =
        tree.entities.iter().map(|e| (e.name.as_str(), e)).collect();

    let mut paths: HashMap<&str, &str> = HashMap::new();
    for (key, page) in &tree.pages {
        let base = format!("pages.{}", key);
        if key.trim().is_empty() {
            report.push("pages", "page key must not be empty");
        }
        if !page.path.starts_with('/') {
            report.push(&base, format!("path '{}' must start with '/'", page.path));
        }
        if let Some(other) = paths.insert(page.path.as_str(), key.as_str()) {
            report.push(
                &base,
                format!("path '{}' is already used by page '{}'", page.path, other),
            );
        }
        if let Some(parent) = &page.parent_page
            && !tree.pages.contains_key(parent)
        {
            report.push(&base, format!("parentPage '{}' does not exist", parent));
        }
    }

    for key in tree.pages.keys() {
        if has_parent_cycle(tree, key) {
            report.push(format!("pages.{}", key), "parentPage chain contains a cycle");
        }
    }

    for (i, item) in tree.navigation.items.iter().enumerate() {
        if !tree.pages.contains_key(&item.page) {
            report.push(
                format!("navigation.items[{}]", i),
                format!("references unknown page '{}'", item.page),
            );
        }
    }

    for (page, zi, ci, component) in tree.components() {
        let cpath = format!("pages.{}.zones[{}].components[{}]", page, zi, ci);
        for prop in component.kind.required_props() {
            if component.props.get(*prop).is_none_or(Value::is_null) {
                report.push(
                    &cpath,
                    format!("{} requires prop '{}'", component.kind.as_str(), prop),
                );
            }
        }

        let resource = match component.props.get("resource") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                report.push(&cpath, "props.resource must be a string");
                None
            }
        };

        let entity = match resource {
            Some(name) => match entities.get(name) {
                Some(e) => Some(*e),
                None => {
                    report.push(&cpath, format!("resource '{}' is not a declared entity", name));
                    None
                }
            },
            None => None,
        };

        let field_refs = component.field_refs();
        if !field_refs.is_empty() {
            match entity {
                Some(entity) => {
                    for name in &field_refs {
                        if name != ID_FIELD && entity.field(name).is_none() {
                            report.push(
                                &cpath,
                                format!("field '{}' is not declared on '{}'", name, entity.name),
                            );
                        }
                    }
                }
                None if resource.is_none() => {
                    report.push(&cpath, "props.fields requires props.resource");
                }
                None => {}
            }
        }

        if let (Some(entity), Some(status)) = (
            entity,
            component.props.get("statusField").and_then(Value::as_str),
        ) {
            match entity.field(status) {
                Some(f) if f.kind == FieldType::Select => {}
                Some(_) => report.push(&cpath, format!("statusField '{}' must be a select", status)),
                None => report.push(
                    &cpath,
                    format!("statusField '{}' is not declared on '{}'", status, entity.name),
                ),
            }
        }

        if component.props.get("tabs").is_some_and(|t| !t.is_array()) {
            report.push(&cpath, "props.tabs must be an array");
        }
    }

    report.into_result()
}

fn has_parent_cycle(tree: &ConfigTree, start: &str) -> bool {
    let mut visited = HashSet::new();
    let mut current = start;
    loop {
        if !visited.insert(current) {
            return true;
        }
        match tree
            .pages
            .get(current)
            .and_then(|p| p.parent_page.as_deref())
        {
            Some(parent) if tree.pages.contains_key(parent) => current = parent,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::tree::{
        Component, ComponentType, Field, NavItem, Page, Relationship, Zone,
    };

    fn task_entity() -> Entity {
        Entity {
            name: "task".into(),
            fields: vec![
                Field::new("title", FieldType::String).required(),
                Field::new("status", FieldType::Select).with_options(&["todo", "doing", "done"]),
            ],
            relationships: vec![],
        }
    }

    fn page(path: &str) -> Page {
        Page {
            title: path.trim_start_matches('/').to_string(),
            path: path.to_string(),
            subtitle: None,
            parent_page: None,
            icon: None,
            zones: vec![],
        }
    }

    fn table(resource: &str) -> Component {
        serde_json::from_value(json!({"type": "DataTable", "props": {"resource": resource}})).unwrap()
    }

    fn base_tree() -> ConfigTree {
        let mut tree = ConfigTree {
            entities: vec![task_entity()],
            ..ConfigTree::default()
        };
        let mut tasks = page("/tasks");
        tasks.zones.push(Zone {
            components: vec![table("task")],
            ..Zone::default()
        });
        tree.pages.insert("dashboard".into(), page("/"));
        tree.pages.insert("tasks".into(), tasks);
        tree.navigation.items.push(NavItem {
            label: "Tasks".into(),
            page: "tasks".into(),
            icon: None,
        });
        tree
    }

    #[test]
    fn valid_tree_passes() {
        assert!(validate_tree(&base_tree()).is_ok());
    }

    #[test]
    fn duplicate_paths_are_reported() {
        let mut tree = base_tree();
        tree.pages.insert("other".into(), page("/tasks"));
        let report = validate_tree(&tree).unwrap_err();
        assert!(report.to_string().contains("already used"));
    }

    #[test]
    fn path_must_start_with_slash() {
        let mut tree = base_tree();
        tree.pages.insert("bad".into(), page("bad"));
        let report = validate_tree(&tree).unwrap_err();
        assert_eq!(report.issues[0].path, "pages.bad");
    }

    #[test]
    fn missing_parent_and_cycles_are_reported() {
        let mut tree = base_tree();
        tree.pages.get_mut("tasks").unwrap().parent_page = Some("ghost".into());
        assert!(validate_tree(&tree).unwrap_err().to_string().contains("ghost"));

        let mut tree = base_tree();
        tree.pages.get_mut("tasks").unwrap().parent_page = Some("dashboard".into());
        tree.pages.get_mut("dashboard").unwrap().parent_page = Some("tasks".into());
        let report = validate_tree(&tree).unwrap_err();
        assert!(report.issues.iter().any(|i| i.message.contains("cycle")));
    }

    #[test]
    fn unknown_resource_is_rejected() {
        let mut tree = base_tree();
        tree.pages.get_mut("tasks").unwrap().zones[0]
            .components
            .push(table("invoice"));
        let report = validate_tree(&tree).unwrap_err();
        assert!(report.to_string().contains("'invoice' is not a declared entity"));
    }

    #[test]
    fn undeclared_form_field_is_rejected() {
        let mut tree = base_tree();
        let form: Component = serde_json::from_value(json!({
            "type": "SimpleForm",
            "props": {"resource": "task", "fields": [{"name": "title"}, {"name": "priority"}]}
        }))
        .unwrap();
        tree.pages.get_mut("tasks").unwrap().zones[0].components.push(form);
        let report = validate_tree(&tree).unwrap_err();
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].message.contains("priority"));
    }

    #[test]
    fn required_props_depend_on_type() {
        let mut tree = base_tree();
        tree.pages.get_mut("tasks").unwrap().zones[0]
            .components
            .push(Component::new(ComponentType::Chart, Default::default()));
        let report = validate_tree(&tree).unwrap_err();
        assert!(report.to_string().contains("requires prop 'chartType'"));
    }

    #[test]
    fn nav_items_must_reference_pages() {
        let mut tree = base_tree();
        tree.navigation.items.push(NavItem {
            label: "Ghost".into(),
            page: "ghost".into(),
            icon: None,
        });
        assert!(validate_tree(&tree).is_err());
    }

    #[test]
    fn entity_rules() {
        let mut e = task_entity();
        e.fields.push(Field::new("kind", FieldType::Select));
        e.fields.push(Field::new("title", FieldType::Text));
        e.relationships.push(Relationship {
            field: "owner".into(),
            target: "user".into(),
        });
        let report = validate_entities(&[e]).unwrap_err();
        let text = report.to_string();
        assert!(text.contains("select field requires options"));
        assert!(text.contains("duplicate field name"));
        assert!(text.contains("foreign key field is not declared"));
        assert!(text.contains("unknown target entity 'user'"));
    }

    #[test]
    fn status_flow_needs_select_field() {
        let mut tree = base_tree();
        let flow: Component = serde_json::from_value(json!({
            "type": "StatusFlow",
            "props": {"resource": "task", "statusField": "title"}
        }))
        .unwrap();
        tree.pages.get_mut("tasks").unwrap().zones[0].components.push(flow);
        assert!(validate_tree(&tree).unwrap_err().to_string().contains("must be a select"));
    }
}
