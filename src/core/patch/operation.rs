use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Page,
    Component,
    Props,
    Field,
    Data,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::Page => "page",
            TargetType::Component => "component",
            TargetType::Props => "props",
            TargetType::Field => "field",
            TargetType::Data => "data",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "page" | "pages" | "zone" | "zones" => Some(TargetType::Page),
            "component" | "components" => Some(TargetType::Component),
            "props" | "prop" | "property" | "properties" => Some(TargetType::Props),
            "field" | "fields" => Some(TargetType::Field),
            "data" | "entity" | "entities" | "resource" => Some(TargetType::Data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Add,
    Remove,
    Update,
}

impl PatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Remove => "remove",
            PatchOp::Update => "update",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "add" | "create" | "insert" | "append" => Some(PatchOp::Add),
            "remove" | "delete" | "drop" => Some(PatchOp::Remove),
            "update" | "modify" | "change" | "edit" | "replace" | "set" => Some(PatchOp::Update),
            _ => None,
        }
    }
}

/// One structured change to a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOperation {
    pub target_type: TargetType,
    pub target_path: String,
    pub operation: PatchOp,
    #[serde(default)]
    pub payload: Value,
}

impl EditOperation {
    pub fn new(target_type: TargetType, target_path: &str, operation: PatchOp, payload: Value) -> Self {
        Self {
            target_type,
            target_path: target_path.to_string(),
            operation,
            payload,
        }
    }

    /// Normalize a loosely-shaped edit description into a closed operation.
    ///
    /// Accepts the canonical camelCase form, snake_case keys, and the
    /// `edit_target` / `target_page` / `target_component` /
    /// `modification_details` shape. Compound operations such as
    /// `add_field` or `remove_entity` pin both the target type and the op.
    pub fn normalize(value: &Value) -> Result<Self, String> {
        let Value::Object(obj) = value else {
            return Err("edit operation must be a JSON object".to_string());
        };

        let raw_op = first_str(obj, &["operation", "op", "action"])
            .ok_or_else(|| "edit operation is missing 'operation'".to_string())?;
        let (compound_target, operation) = parse_compound_op(raw_op)
            .ok_or_else(|| format!("unknown operation '{}'", raw_op))?;

        let target_type = match first_str(obj, &["targetType", "target_type", "edit_target", "target"]) {
            Some(raw) => TargetType::parse(raw)
                .or(compound_target)
                .ok_or_else(|| format!("unknown target type '{}'", raw))?,
            None => compound_target.ok_or_else(|| "edit operation is missing 'targetType'".to_string())?,
        };

        let target_path = match first_str(obj, &["targetPath", "target_path", "path"]) {
            Some(p) if !p.trim().is_empty() => p.trim().to_string(),
            _ => derive_path(obj, target_type)
                .ok_or_else(|| "edit operation is missing 'targetPath'".to_string())?,
        };

        let payload = obj
            .get("payload")
            .or_else(|| obj.get("value"))
            .cloned()
            .or_else(|| {
                obj.get("modification_details").map(|details| match details {
                    Value::Object(d) => d.get("payload").cloned().unwrap_or(details.clone()),
                    other => other.clone(),
                })
            })
            .unwrap_or(Value::Null);

        Ok(Self {
            target_type,
            target_path,
            operation,
            payload,
        })
    }

    /// Whether this operation can change an entity schema.
    pub fn touches_schema(&self) -> bool {
        matches!(self.target_type, TargetType::Field | TargetType::Data)
    }
}

fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_str))
}

fn parse_compound_op(raw: &str) -> Option<(Option<TargetType>, PatchOp)> {
    if let Some(op) = PatchOp::parse(raw) {
        return Some((None, op));
    }
    let lower = raw.trim().to_lowercase();
    let (verb, noun) = lower.split_once('_')?;
    match (verb, noun) {
        ("modify", "field_type") => Some((Some(TargetType::Field), PatchOp::Update)),
        _ => {
            let op = PatchOp::parse(verb)?;
            let target = TargetType::parse(noun)?;
            Some((Some(target), op))
        }
    }
}

fn slug(value: &str) -> String {
    let trimmed = value.trim().trim_matches('/');
    trimmed
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn derive_path(obj: &Map<String, Value>, target_type: TargetType) -> Option<String> {
    match target_type {
        TargetType::Field | TargetType::Data => {
            let entity = first_str(obj, &["entity", "target_entity", "resource"])?;
            match first_str(obj, &["field", "target_field"]) {
                Some(field) if target_type == TargetType::Field => Some(format!("{}.{}", entity, field)),
                _ => Some(entity.to_string()),
            }
        }
        _ => {
            let page = slug(first_str(obj, &["target_page", "page"])?);
            if page.is_empty() {
                return None;
            }
            let zone = obj.get("target_zone").and_then(Value::as_u64);
            let component = obj.get("target_component").and_then(Value::as_u64);
            let mut path = page;
            match (zone, component) {
                (Some(z), Some(c)) => path.push_str(&format!(".zones[{}].components[{}]", z, c)),
                (Some(z), None) => path.push_str(&format!(".zones[{}]", z)),
                (None, Some(c)) => path.push_str(&format!(".zones[0].components[{}]", c)),
                (None, None) if target_type == TargetType::Component => path.push_str(".zones[0]"),
                (None, None) => {}
            }
            Some(path)
        }
    }
}
