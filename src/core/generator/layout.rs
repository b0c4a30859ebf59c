//! Default page layout: a dashboard of metrics and a chart, and one page
//! per entity with a table, an entry form and, when the entity has a
//! `status` select, a status flow.

use serde_json::{Map, Value, json};

use super::PageSpec;
use crate::core::tree::{
    Component, ComponentType, ConfigTree, Entity, Field, FieldType, NavItem, Page, Zone,
};

pub const DASHBOARD_KEY: &str = "dashboard";

pub fn pluralize(name: &str) -> String {
    let lower = name.to_lowercase();
    if let Some(stem) = lower.strip_suffix('y')
        && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        return format!("{}ies", stem);
    }
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        return format!("{}es", lower);
    }
    format!("{}s", lower)
}

pub fn title_case(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The catalog's task entity.
pub fn task_entity() -> Entity {
    Entity {
        name: "task".into(),
        fields: vec![
            Field::new("title", FieldType::String).required(),
            Field::new("status", FieldType::Select).with_options(&["todo", "doing", "done"]),
        ],
        relationships: vec![],
    }
}

/// Dashboard plus one list page per entity.
pub fn default_page_specs(entities: &[Entity]) -> Vec<PageSpec> {
    let mut pages = vec![PageSpec {
        key: Some(DASHBOARD_KEY.to_string()),
        title: "Dashboard".to_string(),
        path: "/".to_string(),
        icon: Some("home".to_string()),
        purpose: Some("Main dashboard".to_string()),
        parent_page: None,
    }];
    for entity in entities {
        let plural = pluralize(&entity.name);
        pages.push(PageSpec {
            key: Some(plural.clone()),
            title: title_case(&plural),
            path: format!("/{}", plural),
            icon: Some("list".to_string()),
            purpose: Some(format!("{} management", title_case(&entity.name))),
            parent_page: None,
        });
    }
    pages
}

fn is_dashboard(spec: &PageSpec) -> bool {
    spec.key() == DASHBOARD_KEY || spec.path.trim() == "/"
}

/// The entity a page is about: its key is the entity's name or plural, or
/// its title or purpose mentions it.
fn entity_for<'a>(spec: &PageSpec, entities: &'a [Entity]) -> Option<&'a Entity> {
    let key = spec.key();
    entities
        .iter()
        .find(|e| key == e.name.to_lowercase() || key == pluralize(&e.name))
        .or_else(|| {
            let title = spec.title.to_lowercase();
            let purpose = spec.purpose.as_deref().unwrap_or_default().to_lowercase();
            entities.iter().find(|e| {
                let name = e.name.to_lowercase();
                title.contains(&name) || purpose.contains(&name)
            })
        })
}

fn component(kind: ComponentType, title: &str, props: Value) -> Component {
    let props = match props {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Component {
        kind,
        title: Some(title.to_string()),
        props,
    }
}

fn dashboard_zones(entities: &[Entity]) -> Vec<Zone> {
    let mut components: Vec<Component> = entities
        .iter()
        .map(|e| {
            let label = format!("Total {}", title_case(&pluralize(&e.name)));
            component(
                ComponentType::MetricCard,
                &label,
                json!({"title": label, "resource": e.name, "aggregate": "count"}),
            )
        })
        .collect();
    if components.is_empty() {
        components.push(component(
            ComponentType::MetricCard,
            "Welcome",
            json!({"title": "Welcome", "value": 0}),
        ));
    }
    let mut chart = json!({"chartType": "bar", "title": "Activity Overview"});
    if let Some(first) = entities.first() {
        chart["resource"] = Value::from(first.name.as_str());
    }
    components.push(component(ComponentType::Chart, "Activity Overview", chart));

    vec![Zone {
        title: Some("Overview".to_string()),
        subtitle: None,
        components,
    }]
}

fn entity_zones(entity: &Entity) -> Vec<Zone> {
    let label = title_case(&entity.name);
    let columns: Vec<&str> = entity.data_fields().take(4).map(|f| f.name.as_str()).collect();
    let form_fields: Vec<Value> = entity
        .data_fields()
        .map(|f| {
            json!({
                "name": f.name,
                "label": title_case(&f.name),
                "type": f.kind.as_str(),
                "required": f.required,
            })
        })
        .collect();

    let mut main = vec![component(
        ComponentType::DataTable,
        &format!("{} List", label),
        json!({"resource": entity.name, "columns": columns, "pageSize": 10}),
    )];
    if entity
        .field("status")
        .is_some_and(|f| f.kind == FieldType::Select)
    {
        main.push(component(
            ComponentType::StatusFlow,
            &format!("{} Status", label),
            json!({"resource": entity.name, "statusField": "status"}),
        ));
    }

    vec![
        Zone {
            title: Some(title_case(&pluralize(&entity.name))),
            subtitle: None,
            components: main,
        },
        Zone {
            title: Some(format!("New {}", label)),
            subtitle: None,
            components: vec![component(
                ComponentType::SimpleForm,
                &format!("Add {}", label),
                json!({"resource": entity.name, "fields": form_fields, "submitText": format!("Add {}", label)}),
            )],
        },
    ]
}

/// Lay out `pages` over `entities` and assemble the full descriptor.
pub fn build_tree(app_name: &str, entities: &[Entity], pages: &[PageSpec]) -> ConfigTree {
    let mut tree = ConfigTree {
        entities: entities.to_vec(),
        ..ConfigTree::default()
    };
    tree.navigation.title = app_name.to_string();

    for spec in pages {
        let key = spec.key();
        if key.is_empty() || tree.pages.contains_key(&key) {
            continue;
        }
        let zones = if is_dashboard(spec) {
            dashboard_zones(entities)
        } else {
            entity_for(spec, entities).map(entity_zones).unwrap_or_default()
        };
        let path = if spec.path.starts_with('/') {
            spec.path.clone()
        } else {
            format!("/{}", spec.path.trim())
        };
        if spec.parent_page.is_none() {
            tree.navigation.items.push(NavItem {
                label: spec.title.clone(),
                page: key.clone(),
                icon: spec.icon.clone(),
            });
        }
        tree.pages.insert(
            key,
            Page {
                title: spec.title.clone(),
                path,
                subtitle: spec.purpose.clone(),
                parent_page: spec.parent_page.clone(),
                icon: spec.icon.clone(),
                zones,
            },
        );
    }
    tree
}

/// Default pages for `entities`, laid out.
pub fn default_tree(app_name: &str, entities: Vec<Entity>) -> ConfigTree {
    let pages = default_page_specs(&entities);
    build_tree(app_name, &entities, &pages)
}
