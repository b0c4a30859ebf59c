//! Application descriptor: navigation, pages, zones, components and the
//! entities that back them.
//!
//! A `ConfigTree` is a plain value. Nothing in this module mutates a tree in
//! place on behalf of a caller; the patch engine clones, edits the clone and
//! re-validates it before anything is persisted.

mod validate;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use validate::{ValidationIssue, ValidationReport, validate_entities, validate_tree};

/// Identifier field every mock record carries. Never declared on an entity.
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigTree {
    #[serde(default)]
    pub navigation: Navigation,
    #[serde(default)]
    pub pages: BTreeMap<String, Page>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl ConfigTree {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn entity_mut(&mut self, name: &str) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.name == name)
    }

    /// Iterate every component with its page key, zone index and position.
    pub fn components(&self) -> impl Iterator<Item = (&str, usize, usize, &Component)> {
        self.pages.iter().flat_map(|(key, page)| {
            page.zones.iter().enumerate().flat_map(move |(zi, zone)| {
                zone.components
                    .iter()
                    .enumerate()
                    .map(move |(ci, c)| (key.as_str(), zi, ci, c))
            })
        })
    }

    pub fn component_count(&self) -> usize {
        self.pages
            .values()
            .flat_map(|p| p.zones.iter())
            .map(|z| z.components.len())
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Navigation {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<NavItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavItem {
    pub label: String,
    /// Page key this item links to.
    pub page: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub title: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub props: Map<String, Value>,
}

impl Component {
    pub fn new(kind: ComponentType, props: Map<String, Value>) -> Self {
        Self {
            kind,
            title: None,
            props,
        }
    }

    /// A component of `kind` carrying placeholder values for every required
    /// prop that does not need a resource.
    pub fn with_defaults(kind: ComponentType) -> Self {
        let mut props = Map::new();
        match kind {
            ComponentType::MetricCard => {
                props.insert("title".into(), Value::from("Metric"));
                props.insert("value".into(), Value::from(0));
            }
            ComponentType::Chart => {
                props.insert("chartType".into(), Value::from("bar"));
                props.insert("title".into(), Value::from("Chart"));
            }
            ComponentType::TabsComponent => {
                props.insert("tabs".into(), Value::Array(Vec::new()));
            }
            ComponentType::Modal => {
                props.insert("title".into(), Value::from("Details"));
            }
            ComponentType::DataTable
            | ComponentType::SimpleForm
            | ComponentType::ExpandableForm
            | ComponentType::StatusFlow => {}
        }
        Self::new(kind, props)
    }

    pub fn resource(&self) -> Option<&str> {
        self.props.get("resource").and_then(Value::as_str)
    }

    /// Names listed under `props.fields`, accepting `{name: ..}` objects or bare strings.
    pub fn field_refs(&self) -> Vec<String> {
        let Some(Value::Array(items)) = self.props.get("fields") else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(String::from),
                _ => None,
            })
            .collect()
    }
}

/// The fixed component catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    MetricCard,
    #[serde(alias = "Table")]
    DataTable,
    #[serde(alias = "Form")]
    SimpleForm,
    ExpandableForm,
    Chart,
    StatusFlow,
    #[serde(alias = "Tabs")]
    TabsComponent,
    Modal,
}

impl ComponentType {
    pub const ALL: [ComponentType; 8] = [
        ComponentType::MetricCard,
        ComponentType::DataTable,
        ComponentType::SimpleForm,
        ComponentType::ExpandableForm,
        ComponentType::Chart,
        ComponentType::StatusFlow,
        ComponentType::TabsComponent,
        ComponentType::Modal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentType::MetricCard => "MetricCard",
            ComponentType::DataTable => "DataTable",
            ComponentType::SimpleForm => "SimpleForm",
            ComponentType::ExpandableForm => "ExpandableForm",
            ComponentType::Chart => "Chart",
            ComponentType::StatusFlow => "StatusFlow",
            ComponentType::TabsComponent => "TabsComponent",
            ComponentType::Modal => "Modal",
        }
    }

    /// Case-insensitive lookup that also accepts the short aliases.
    pub fn parse(value: &str) -> Option<Self> {
        let lower = value.trim().to_lowercase().replace([' ', '_', '-'], "");
        match lower.as_str() {
            "metriccard" | "metric" => Some(ComponentType::MetricCard),
            "datatable" | "table" => Some(ComponentType::DataTable),
            "simpleform" | "form" => Some(ComponentType::SimpleForm),
            "expandableform" => Some(ComponentType::ExpandableForm),
            "chart" => Some(ComponentType::Chart),
            "statusflow" => Some(ComponentType::StatusFlow),
            "tabscomponent" | "tabs" => Some(ComponentType::TabsComponent),
            "modal" => Some(ComponentType::Modal),
            _ => None,
        }
    }

    /// Props that must be present for a component of this type.
    pub fn required_props(self) -> &'static [&'static str] {
        match self {
            ComponentType::MetricCard => &["title"],
            ComponentType::DataTable => &["resource"],
            ComponentType::SimpleForm | ComponentType::ExpandableForm => &["resource", "fields"],
            ComponentType::Chart => &["chartType"],
            ComponentType::StatusFlow => &["resource", "statusField"],
            ComponentType::TabsComponent => &["tabs"],
            ComponentType::Modal => &["title"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

impl Entity {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared fields excluding the identifier.
    pub fn data_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.name != ID_FIELD)
    }

    /// Target entity when `field` is a foreign key.
    pub fn foreign_target(&self, field: &str) -> Option<&str> {
        self.relationships
            .iter()
            .find(|r| r.field == field)
            .map(|r| r.target.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl Field {
    pub fn new(name: &str, kind: FieldType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            options: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|o| o.to_string()).collect());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[serde(alias = "String", alias = "str")]
    String,
    #[serde(alias = "Number", alias = "integer", alias = "float", alias = "int")]
    Number,
    #[serde(alias = "Boolean", alias = "bool")]
    Boolean,
    #[serde(alias = "Select", alias = "enum")]
    Select,
    #[serde(alias = "Date")]
    Date,
    #[serde(alias = "Datetime", alias = "DateTime", alias = "timestamp")]
    Datetime,
    #[serde(alias = "Text", alias = "textarea")]
    Text,
    #[serde(alias = "Email")]
    Email,
    #[serde(alias = "Password")]
    Password,
    #[serde(alias = "File")]
    File,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Select => "select",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Password => "password",
            FieldType::File => "file",
        }
    }
}

/// Foreign key: `field` on the owning entity holds an id of `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub field: String,
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_serializes_type_tag_and_props() {
        let mut props = Map::new();
        props.insert("resource".into(), Value::from("task"));
        let c = Component::new(ComponentType::DataTable, props);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "DataTable");
        assert_eq!(json["props"]["resource"], "task");
        assert!(json.get("title").is_none());
    }

    #[test]
    fn component_type_accepts_aliases() {
        let c: Component = serde_json::from_str(r#"{"type":"Form","props":{}}"#).unwrap();
        assert_eq!(c.kind, ComponentType::SimpleForm);
        assert_eq!(ComponentType::parse("data table"), Some(ComponentType::DataTable));
        assert_eq!(ComponentType::parse("Gauge"), None);
    }

    #[test]
    fn unknown_component_type_is_rejected() {
        let res = serde_json::from_str::<Component>(r#"{"type":"Carousel","props":{}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn field_type_aliases_deserialize() {
        let f: Field = serde_json::from_str(r#"{"name":"status","type":"enum","options":["a"]}"#)
            .unwrap();
        assert_eq!(f.kind, FieldType::Select);
        assert!(!f.required);
    }

    #[test]
    fn field_refs_reads_objects_and_strings() {
        let c: Component = serde_json::from_str(
            r#"{"type":"SimpleForm","props":{"resource":"task","fields":[{"name":"title"},"status",3]}}"#,
        )
        .unwrap();
        assert_eq!(c.field_refs(), vec!["title".to_string(), "status".to_string()]);
    }

    #[test]
    fn page_uses_camel_case_parent_page() {
        let p: Page = serde_json::from_str(
            r#"{"title":"Detail","path":"/d","parentPage":"home","zones":[]}"#,
        )
        .unwrap();
        assert_eq!(p.parent_page.as_deref(), Some("home"));
        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["parentPage"], "home");
    }

    #[test]
    fn components_iterator_walks_every_zone() {
        let mut tree = ConfigTree::default();
        tree.pages.insert(
            "home".into(),
            Page {
                title: "Home".into(),
                path: "/".into(),
                subtitle: None,
                parent_page: None,
                icon: None,
                zones: vec![
                    Zone {
                        components: vec![Component::with_defaults(ComponentType::Chart)],
                        ..Zone::default()
                    },
                    Zone {
                        components: vec![
                            Component::with_defaults(ComponentType::Modal),
                            Component::with_defaults(ComponentType::MetricCard),
                        ],
                        ..Zone::default()
                    },
                ],
            },
        );
        let seen: Vec<_> = tree.components().map(|(p, z, c, _)| (p, z, c)).collect();
        assert_eq!(seen, vec![("home", 0, 0), ("home", 1, 0), ("home", 1, 1)]);
        assert_eq!(tree.component_count(), 3);
    }
}
