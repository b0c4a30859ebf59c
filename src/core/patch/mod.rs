//! Patch engine: applies one `EditOperation` to a descriptor and returns a
//! new, validated candidate. The input tree is never touched; a rejected
//! operation leaves the caller holding exactly what it passed in.

mod operation;
mod path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::tree::{
    Component, ComponentType, ConfigTree, Entity, Field, FieldType, ID_FIELD, NavItem, Page,
    Relationship, ValidationReport, Zone, validate_tree,
};

pub use operation::{EditOperation, PatchOp, TargetType};
pub use path::{EntityAddress, TreeAddress};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PatchError {
    #[error("invalid target path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate {0}")]
    Duplicate(String),
    #[error("dangling reference: {0}")]
    DanglingReference(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("patched tree is invalid: {0}")]
    Invalid(ValidationReport),
}

/// What the pipeline has to do to the mock data after a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataImpact {
    /// Entity definitions differ between the source and the candidate.
    pub schema_changed: bool,
    /// Resources whose records must be regenerated wholesale.
    pub regenerate: Vec<String>,
}

impl DataImpact {
    pub fn is_none(&self) -> bool {
        !self.schema_changed && self.regenerate.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSummary {
    pub target_type: TargetType,
    pub operation: PatchOp,
    pub target_path: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub tree: ConfigTree,
    pub summary: PatchSummary,
    pub data_impact: DataImpact,
}

/// Apply `op` to a copy of `source`, validate the copy and hand it back.
pub fn apply(source: &ConfigTree, op: &EditOperation) -> Result<PatchOutcome, PatchError> {
    let mut candidate = source.clone();
    let mut regenerate = Vec::new();

    let description = match op.target_type {
        TargetType::Page => apply_page(&mut candidate, op)?,
        TargetType::Component => apply_component(&mut candidate, op)?,
        TargetType::Props => apply_props(&mut candidate, op)?,
        TargetType::Field => apply_field(&mut candidate, op)?,
        TargetType::Data => apply_data(&mut candidate, op, &mut regenerate)?,
    };

    validate_tree(&candidate).map_err(PatchError::Invalid)?;

    let data_impact = DataImpact {
        schema_changed: candidate.entities != source.entities,
        regenerate,
    };

    Ok(PatchOutcome {
        tree: candidate,
        summary: PatchSummary {
            target_type: op.target_type,
            operation: op.operation,
            target_path: op.target_path.clone(),
            description,
        },
        data_impact,
    })
}

fn title_case(key: &str) -> String {
    key.split(['-', '_', ' '])
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

fn payload_object(op: &EditOperation) -> Result<Map<String, Value>, PatchError> {
    match &op.payload {
        Value::Object(obj) => Ok(obj.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(PatchError::TypeMismatch(format!(
            "{} {} expects an object payload, got {}",
            op.operation.as_str(),
            op.target_type.as_str(),
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shallow-merge `patch` over the serialized form of `current`, then read it back.
fn merge_into<T>(current: &T, patch: Map<String, Value>, what: &str) -> Result<T, PatchError>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let mut value = serde_json::to_value(current)
        .map_err(|e| PatchError::TypeMismatch(format!("{}: {}", what, e)))?;
    if let Value::Object(obj) = &mut value {
        for (k, v) in patch {
            obj.insert(k, v);
        }
    }
    serde_json::from_value(value).map_err(|e| PatchError::TypeMismatch(format!("{}: {}", what, e)))
}

fn page_mut<'a>(tree: &'a mut ConfigTree, key: &str) -> Result<&'a mut Page, PatchError> {
    tree.pages
        .get_mut(key)
        .ok_or_else(|| PatchError::NotFound(format!("page '{}'", key)))
}

fn zone_mut<'a>(tree: &'a mut ConfigTree, key: &str, zone: usize) -> Result<&'a mut Zone, PatchError> {
    page_mut(tree, key)?
        .zones
        .get_mut(zone)
        .ok_or_else(|| PatchError::NotFound(format!("{}.zones[{}]", key, zone)))
}

fn component_mut<'a>(
    tree: &'a mut ConfigTree,
    key: &str,
    zone: usize,
    index: usize,
) -> Result<&'a mut Component, PatchError> {
    zone_mut(tree, key, zone)?
        .components
        .get_mut(index)
        .ok_or_else(|| {
            PatchError::NotFound(format!("{}.zones[{}].components[{}]", key, zone, index))
        })
}

fn apply_page(tree: &mut ConfigTree, op: &EditOperation) -> Result<String, PatchError> {
    let addr = TreeAddress::parse(&op.target_path)?;
    match (&addr, op.operation) {
        (TreeAddress::Page(key), PatchOp::Add) => {
            if tree.pages.contains_key(key) {
                return Err(PatchError::Duplicate(format!("page key '{}'", key)));
            }
            let mut obj = payload_object(op)?;
            obj.entry("title").or_insert_with(|| Value::from(title_case(key)));
            obj.entry("path").or_insert_with(|| Value::from(format!("/{}", key)));
            let page: Page = serde_json::from_value(Value::Object(obj))
                .map_err(|e| PatchError::TypeMismatch(format!("page payload: {}", e)))?;
            if let Some((other, _)) = tree.pages.iter().find(|(_, p)| p.path == page.path) {
                return Err(PatchError::Duplicate(format!(
                    "page path '{}' (used by '{}')",
                    page.path, other
                )));
            }
            if page.parent_page.is_none() {
                tree.navigation.items.push(NavItem {
                    label: page.title.clone(),
                    page: key.clone(),
                    icon: page.icon.clone(),
                });
            }
            tree.pages.insert(key.clone(), page);
            Ok(format!("added page '{}'", key))
        }
        (TreeAddress::Page(key), PatchOp::Remove) => {
            if !tree.pages.contains_key(key) {
                return Err(PatchError::NotFound(format!("page '{}'", key)));
            }
            if let Some((child, _)) = tree
                .pages
                .iter()
                .find(|(_, p)| p.parent_page.as_deref() == Some(key.as_str()))
            {
                return Err(PatchError::DanglingReference(format!(
                    "page '{}' is the parentPage of '{}'",
                    key, child
                )));
            }
            tree.pages.remove(key);
            tree.navigation.items.retain(|item| &item.page != key);
            Ok(format!("removed page '{}'", key))
        }
        (TreeAddress::Page(key), PatchOp::Update) => {
            let patch = payload_object(op)?;
            let page = page_mut(tree, key)?;
            let old_title = page.title.clone();
            let updated: Page = merge_into(&*page, patch, "page payload")?;
            let new_title = updated.title.clone();
            *page = updated;
            if new_title != old_title {
                for item in tree
                    .navigation
                    .items
                    .iter_mut()
                    .filter(|i| &i.page == key && i.label == old_title)
                {
                    item.label = new_title.clone();
                }
            }
            Ok(format!("updated page '{}'", key))
        }
        (TreeAddress::Zone(key, index), PatchOp::Add) => {
            let zone: Zone = serde_json::from_value(Value::Object(payload_object(op)?))
                .map_err(|e| PatchError::TypeMismatch(format!("zone payload: {}", e)))?;
            let page = page_mut(tree, key)?;
            if *index > page.zones.len() {
                return Err(PatchError::NotFound(format!("{}.zones[{}]", key, index)));
            }
            page.zones.insert(*index, zone);
            Ok(format!("added zone {}", addr))
        }
        (TreeAddress::Zone(key, index), PatchOp::Remove) => {
            let page = page_mut(tree, key)?;
            if *index >= page.zones.len() {
                return Err(PatchError::NotFound(addr.to_string()));
            }
            page.zones.remove(*index);
            Ok(format!("removed zone {}", addr))
        }
        (TreeAddress::Zone(key, index), PatchOp::Update) => {
            let mut patch = payload_object(op)?;
            // Components are edited through their own target type.
            patch.remove("components");
            let zone = zone_mut(tree, key, *index)?;
            *zone = merge_into(&*zone, patch, "zone payload")?;
            Ok(format!("updated zone {}", addr))
        }
        _ => Err(PatchError::Unsupported(format!(
            "page {} expects a page or zone path, got '{}'",
            op.operation.as_str(),
            op.target_path
        ))),
    }
}

fn component_from_payload(payload: &Value) -> Result<Component, PatchError> {
    match payload {
        Value::String(name) => ComponentType::parse(name)
            .map(Component::with_defaults)
            .ok_or_else(|| PatchError::TypeMismatch(format!("unknown component type '{}'", name))),
        Value::Object(obj) => {
            let kind = obj
                .get("type")
                .and_then(Value::as_str)
                .and_then(ComponentType::parse)
                .ok_or_else(|| {
                    PatchError::TypeMismatch("component payload needs a known 'type'".to_string())
                })?;
            let mut component = Component::with_defaults(kind);
            if let Some(title) = obj.get("title") {
                component.title = Some(
                    title
                        .as_str()
                        .ok_or_else(|| PatchError::TypeMismatch("component title must be a string".into()))?
                        .to_string(),
                );
            }
            match obj.get("props") {
                None | Some(Value::Null) => {}
                Some(Value::Object(props)) => {
                    for (k, v) in props {
                        component.props.insert(k.clone(), v.clone());
                    }
                }
                Some(other) => {
                    return Err(PatchError::TypeMismatch(format!(
                        "component props must be an object, got {}",
                        json_kind(other)
                    )));
                }
            }
            Ok(component)
        }
        other => Err(PatchError::TypeMismatch(format!(
            "component payload must be a type name or object, got {}",
            json_kind(other)
        ))),
    }
}

fn apply_component(tree: &mut ConfigTree, op: &EditOperation) -> Result<String, PatchError> {
    let addr = TreeAddress::parse(&op.target_path)?;
    match (&addr, op.operation) {
        (TreeAddress::Page(key), PatchOp::Add) => {
            let component = component_from_payload(&op.payload)?;
            let kind = component.kind;
            let page = page_mut(tree, key)?;
            if page.zones.is_empty() {
                page.zones.push(Zone::default());
            }
            let last = page.zones.len() - 1;
            page.zones[last].components.push(component);
            Ok(format!("added {} to {}.zones[{}]", kind.as_str(), key, last))
        }
        (TreeAddress::Zone(key, zone), PatchOp::Add) => {
            let component = component_from_payload(&op.payload)?;
            let kind = component.kind;
            zone_mut(tree, key, *zone)?.components.push(component);
            Ok(format!("added {} to {}", kind.as_str(), addr))
        }
        (TreeAddress::Component(key, zone, index), PatchOp::Add) => {
            let component = component_from_payload(&op.payload)?;
            let kind = component.kind;
            let target = zone_mut(tree, key, *zone)?;
            if *index > target.components.len() {
                return Err(PatchError::NotFound(addr.to_string()));
            }
            target.components.insert(*index, component);
            Ok(format!("inserted {} at {}", kind.as_str(), addr))
        }
        (TreeAddress::Component(key, zone, index), PatchOp::Remove) => {
            let target = zone_mut(tree, key, *zone)?;
            if *index >= target.components.len() {
                return Err(PatchError::NotFound(addr.to_string()));
            }
            let removed = target.components.remove(*index);
            Ok(format!("removed {} at {}", removed.kind.as_str(), addr))
        }
        (TreeAddress::Component(key, zone, index), PatchOp::Update) => {
            let component = component_mut(tree, key, *zone, *index)?;
            if op.payload.get("type").is_some() {
                *component = component_from_payload(&op.payload)?;
                return Ok(format!("replaced component at {}", addr));
            }
            let patch = payload_object(op)?;
            for (k, v) in patch {
                match (k.as_str(), v) {
                    ("title", Value::String(title)) => component.title = Some(title),
                    ("title", Value::Null) => component.title = None,
                    ("props", Value::Object(props)) => {
                        for (pk, pv) in props {
                            component.props.insert(pk, pv);
                        }
                    }
                    (other, value) => {
                        return Err(PatchError::TypeMismatch(format!(
                            "cannot set component '{}' to {}",
                            other,
                            json_kind(&value)
                        )));
                    }
                }
            }
            Ok(format!("updated component at {}", addr))
        }
        _ => Err(PatchError::Unsupported(format!(
            "component {} cannot target '{}'",
            op.operation.as_str(),
            op.target_path
        ))),
    }
}

/// JSON kind a well-known prop must have; `None` for free-form props.
fn expected_prop_kind(key: &str) -> Option<&'static str> {
    match key {
        "resource" | "chartType" | "statusField" | "title" | "subtitle" => Some("string"),
        "fields" | "tabs" | "columns" | "actions" => Some("array"),
        _ => None,
    }
}

fn check_prop_kind(key: &str, value: &Value, existing: Option<&Value>) -> Result<(), PatchError> {
    let expected = expected_prop_kind(key)
        .or_else(|| existing.filter(|v| !v.is_null()).map(json_kind));
    match expected {
        Some(kind) if !value.is_null() && json_kind(value) != kind => Err(PatchError::TypeMismatch(
            format!("prop '{}' must be {}, got {}", key, kind, json_kind(value)),
        )),
        _ => Ok(()),
    }
}

fn apply_props(tree: &mut ConfigTree, op: &EditOperation) -> Result<String, PatchError> {
    let addr = TreeAddress::parse(&op.target_path)?;
    match &addr {
        TreeAddress::Prop(key, zone, index, prop) => {
            let component = component_mut(tree, key, *zone, *index)?;
            match op.operation {
                PatchOp::Add => {
                    if component.props.contains_key(prop) {
                        return Err(PatchError::Duplicate(format!("prop '{}' at {}", prop, addr)));
                    }
                    check_prop_kind(prop, &op.payload, None)?;
                    component.props.insert(prop.clone(), op.payload.clone());
                    Ok(format!("added prop {}", addr))
                }
                PatchOp::Remove => {
                    if component.props.remove(prop).is_none() {
                        return Err(PatchError::NotFound(addr.to_string()));
                    }
                    Ok(format!("removed prop {}", addr))
                }
                PatchOp::Update => {
                    let existing = component
                        .props
                        .get(prop)
                        .ok_or_else(|| PatchError::NotFound(addr.to_string()))?;
                    check_prop_kind(prop, &op.payload, Some(existing))?;
                    component.props.insert(prop.clone(), op.payload.clone());
                    Ok(format!("updated prop {}", addr))
                }
            }
        }
        TreeAddress::Component(key, zone, index) if op.operation == PatchOp::Update => {
            let patch = payload_object(op)?;
            let component = component_mut(tree, key, *zone, *index)?;
            for (k, v) in patch {
                check_prop_kind(&k, &v, component.props.get(&k))?;
                component.props.insert(k, v);
            }
            Ok(format!("updated props of {}", addr))
        }
        _ => Err(PatchError::Unsupported(format!(
            "props {} needs a prop path, got '{}'",
            op.operation.as_str(),
            op.target_path
        ))),
    }
}

/// Components that mention `field` of `entity` by name.
fn field_users(tree: &ConfigTree, entity: &str, field: &str) -> Option<String> {
    tree.components()
        .find(|(_, _, _, c)| {
            c.resource() == Some(entity)
                && (c.field_refs().iter().any(|f| f == field)
                    || c.props.get("statusField").and_then(Value::as_str) == Some(field))
        })
        .map(|(page, z, i, _)| format!("{}.zones[{}].components[{}]", page, z, i))
}

fn field_from_payload(payload: &Value, name: Option<&str>) -> Result<(Field, Option<String>), PatchError> {
    let mut obj = match payload {
        Value::Object(obj) => obj.clone(),
        Value::String(kind) => {
            let mut obj = Map::new();
            obj.insert("type".into(), Value::from(kind.as_str()));
            obj
        }
        other => {
            return Err(PatchError::TypeMismatch(format!(
                "field payload must be an object, got {}",
                json_kind(other)
            )));
        }
    };
    if let Some(name) = name {
        match obj.get("name").and_then(Value::as_str) {
            Some(given) if given != name => {
                return Err(PatchError::TypeMismatch(format!(
                    "field name '{}' does not match target '{}'",
                    given, name
                )));
            }
            _ => {
                obj.insert("name".into(), Value::from(name));
            }
        }
    }
    let references = obj
        .remove("references")
        .and_then(|v| v.as_str().map(String::from));
    obj.entry("type").or_insert_with(|| Value::from("string"));
    let field: Field = serde_json::from_value(Value::Object(obj))
        .map_err(|e| PatchError::TypeMismatch(format!("field payload: {}", e)))?;
    Ok((field, references))
}

fn apply_field(tree: &mut ConfigTree, op: &EditOperation) -> Result<String, PatchError> {
    let addr = EntityAddress::parse(&op.target_path)?;
    let entity_name = addr.entity().to_string();
    if tree.entity(&entity_name).is_none() {
        return Err(PatchError::NotFound(format!("entity '{}'", entity_name)));
    }

    match (&addr, op.operation) {
        (_, PatchOp::Add) => {
            let name = match &addr {
                EntityAddress::Field(_, f) => Some(f.as_str()),
                EntityAddress::Entity(_) => None,
            };
            let (field, references) = field_from_payload(&op.payload, name)?;
            if field.name == ID_FIELD {
                return Err(PatchError::Duplicate(format!(
                    "field '{}' on '{}' (identifier)",
                    ID_FIELD, entity_name
                )));
            }
            let Some(entity) = tree.entity_mut(&entity_name) else {
                return Err(PatchError::NotFound(format!("entity '{}'", entity_name)));
            };
            if entity.field(&field.name).is_some() {
                return Err(PatchError::Duplicate(format!(
                    "field '{}' on '{}'",
                    field.name, entity_name
                )));
            }
            let field_name = field.name.clone();
            entity.fields.push(field);
            if let Some(target) = references {
                entity.relationships.push(Relationship {
                    field: field_name.clone(),
                    target,
                });
            }
            Ok(format!("added field '{}' to '{}'", field_name, entity_name))
        }
        (EntityAddress::Field(_, field), PatchOp::Remove) => {
            if tree.entity(&entity_name).and_then(|e| e.field(field)).is_none() {
                return Err(PatchError::NotFound(addr.to_string()));
            }
            if let Some(user) = field_users(tree, &entity_name, field) {
                return Err(PatchError::DanglingReference(format!(
                    "field '{}' is used by {}",
                    addr, user
                )));
            }
            if let Some(entity) = tree.entity_mut(&entity_name) {
                entity.fields.retain(|f| &f.name != field);
                entity.relationships.retain(|r| &r.field != field);
            }
            Ok(format!("removed field '{}'", addr))
        }
        (EntityAddress::Field(_, field), PatchOp::Update) => {
            let mut patch = payload_object(op)?;
            let references = patch.remove("references");
            if let Some(Value::String(new_name)) = patch.get("name")
                && new_name != field
                && let Some(user) = field_users(tree, &entity_name, field)
            {
                return Err(PatchError::DanglingReference(format!(
                    "renaming '{}' would orphan {}",
                    addr, user
                )));
            }
            let Some(entity) = tree.entity_mut(&entity_name) else {
                return Err(PatchError::NotFound(format!("entity '{}'", entity_name)));
            };
            let Some(position) = entity.fields.iter().position(|f| &f.name == field) else {
                return Err(PatchError::NotFound(addr.to_string()));
            };
            let sets_options = patch.contains_key("options");
            let mut updated: Field = merge_into(&entity.fields[position], patch, "field payload")?;
            // A select turned into another type sheds its options.
            if updated.kind != FieldType::Select && !sets_options {
                updated.options = None;
            }
            let new_name = updated.name.clone();
            entity.fields[position] = updated;
            for rel in entity.relationships.iter_mut().filter(|r| &r.field == field) {
                rel.field = new_name.clone();
            }
            match references {
                Some(Value::String(target)) => {
                    entity.relationships.retain(|r| r.field != new_name);
                    entity.relationships.push(Relationship {
                        field: new_name.clone(),
                        target,
                    });
                }
                Some(Value::Null) => entity.relationships.retain(|r| r.field != new_name),
                _ => {}
            }
            Ok(format!("updated field '{}'", addr))
        }
        _ => Err(PatchError::Unsupported(format!(
            "field {} needs an entity.field path, got '{}'",
            op.operation.as_str(),
            op.target_path
        ))),
    }
}

fn apply_data(
    tree: &mut ConfigTree,
    op: &EditOperation,
    regenerate: &mut Vec<String>,
) -> Result<String, PatchError> {
    let addr = EntityAddress::parse(&op.target_path)?;
    let EntityAddress::Entity(name) = &addr else {
        return Err(PatchError::Unsupported(format!(
            "data {} targets an entity, use a field operation for '{}'",
            op.operation.as_str(),
            op.target_path
        )));
    };

    match op.operation {
        PatchOp::Add => {
            if tree.entity(name).is_some() {
                return Err(PatchError::Duplicate(format!("entity '{}'", name)));
            }
            let mut obj = payload_object(op)?;
            match obj.get("name").and_then(Value::as_str) {
                Some(given) if given != name => {
                    return Err(PatchError::TypeMismatch(format!(
                        "entity name '{}' does not match target '{}'",
                        given, name
                    )));
                }
                _ => {
                    obj.insert("name".into(), Value::from(name.as_str()));
                }
            }
            let entity: Entity = serde_json::from_value(Value::Object(obj))
                .map_err(|e| PatchError::TypeMismatch(format!("entity payload: {}", e)))?;
            tree.entities.push(entity);
            Ok(format!("added entity '{}'", name))
        }
        PatchOp::Remove => {
            if tree.entity(name).is_none() {
                return Err(PatchError::NotFound(format!("entity '{}'", name)));
            }
            if let Some((page, z, i, c)) = tree
                .components()
                .find(|(_, _, _, c)| c.resource() == Some(name.as_str()))
            {
                return Err(PatchError::DanglingReference(format!(
                    "entity '{}' is the resource of {} at {}.zones[{}].components[{}]",
                    name,
                    c.kind.as_str(),
                    page,
                    z,
                    i
                )));
            }
            if let Some(owner) = tree
                .entities
                .iter()
                .find(|e| e.name != *name && e.relationships.iter().any(|r| &r.target == name))
            {
                return Err(PatchError::DanglingReference(format!(
                    "entity '{}' is referenced by a relationship on '{}'",
                    name, owner.name
                )));
            }
            tree.entities.retain(|e| &e.name != name);
            Ok(format!("removed entity '{}'", name))
        }
        PatchOp::Update => {
            let mut patch = payload_object(op)?;
            let wants_regen = matches!(patch.remove("regenerate"), Some(Value::Bool(true)));
            if let Some(Value::String(new_name)) = patch.get("name")
                && new_name != name
            {
                return Err(PatchError::Unsupported(format!(
                    "renaming entity '{}' to '{}'",
                    name, new_name
                )));
            }
            let Some(entity) = tree.entity_mut(name) else {
                return Err(PatchError::NotFound(format!("entity '{}'", name)));
            };
            *entity = merge_into(&*entity, patch, "entity payload")?;
            if wants_regen {
                regenerate.push(name.clone());
            }
            Ok(format!("updated entity '{}'", name))
        }
    }
}
