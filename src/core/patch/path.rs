//! Target path parsing.
//!
//! Tree targets: `page[.zones[i][.components[j][.props.key]]]`, where the
//! `zones`, `components` and `props` keywords are optional and bare indices
//! (`dashboard.0.1`) are accepted. Entity targets: `[entities.]entity[.fields.]field`.

use std::fmt;

use super::PatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn invalid(path: &str, reason: &str) -> PatchError {
    PatchError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn tokenize(path: &str) -> Result<Vec<Segment>, PatchError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(invalid(path, "path is empty"));
    }

    let mut segments = Vec::new();
    for part in trimmed.split('.') {
        if part.is_empty() {
            return Err(invalid(path, "empty segment"));
        }
        let (name, mut rest) = match part.find('[') {
            Some(pos) => part.split_at(pos),
            None => (part, ""),
        };
        if !name.is_empty() {
            match name.parse::<usize>() {
                Ok(i) => segments.push(Segment::Index(i)),
                Err(_) => segments.push(Segment::Key(name.to_string())),
            }
        }
        while !rest.is_empty() {
            let Some(inner) = rest.strip_prefix('[') else {
                return Err(invalid(path, "unexpected text after index"));
            };
            let Some(end) = inner.find(']') else {
                return Err(invalid(path, "unclosed '['"));
            };
            let index = inner[..end]
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(path, "index must be a non-negative integer"))?;
            segments.push(Segment::Index(index));
            rest = &inner[end + 1..];
        }
    }
    Ok(segments)
}

fn is_keyword(seg: Option<&Segment>, keyword: &str) -> bool {
    matches!(seg, Some(Segment::Key(k)) if k == keyword)
}

/// Resolved address of a page-tree element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeAddress {
    Page(String),
    Zone(String, usize),
    Component(String, usize, usize),
    Prop(String, usize, usize, String),
}

impl TreeAddress {
    pub fn parse(path: &str) -> Result<Self, PatchError> {
        let segments = tokenize(path)?;
        let mut iter = segments.iter().peekable();

        if is_keyword(iter.peek().copied(), "pages") && segments.len() > 1 {
            iter.next();
        }
        let page = match iter.next() {
            Some(Segment::Key(k)) => k.clone(),
            _ => return Err(invalid(path, "must start with a page key")),
        };

        if is_keyword(iter.peek().copied(), "zones") {
            iter.next();
        }
        let zone = match iter.next() {
            None => return Ok(TreeAddress::Page(page)),
            Some(Segment::Index(z)) => *z,
            Some(Segment::Key(_)) => return Err(invalid(path, "expected a zone index")),
        };

        if is_keyword(iter.peek().copied(), "components") {
            iter.next();
        }
        let component = match iter.next() {
            None => return Ok(TreeAddress::Zone(page, zone)),
            Some(Segment::Index(c)) => *c,
            Some(Segment::Key(_)) => return Err(invalid(path, "expected a component index")),
        };

        if is_keyword(iter.peek().copied(), "props") {
            iter.next();
        }
        let prop = match iter.next() {
            None => return Ok(TreeAddress::Component(page, zone, component)),
            Some(Segment::Key(k)) => k.clone(),
            Some(Segment::Index(_)) => return Err(invalid(path, "expected a prop name")),
        };

        if iter.next().is_some() {
            return Err(invalid(path, "trailing segments after prop name"));
        }
        Ok(TreeAddress::Prop(page, zone, component, prop))
    }

    pub fn page(&self) -> &str {
        match self {
            TreeAddress::Page(p)
            | TreeAddress::Zone(p, _)
            | TreeAddress::Component(p, _, _)
            | TreeAddress::Prop(p, _, _, _) => p,
        }
    }
}

impl fmt::Display for TreeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeAddress::Page(p) => write!(f, "{}", p),
            TreeAddress::Zone(p, z) => write!(f, "{}.zones[{}]", p, z),
            TreeAddress::Component(p, z, c) => write!(f, "{}.zones[{}].components[{}]", p, z, c),
            TreeAddress::Prop(p, z, c, k) => {
                write!(f, "{}.zones[{}].components[{}].props.{}", p, z, c, k)
            }
        }
    }
}

/// Resolved address of an entity or one of its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityAddress {
    Entity(String),
    Field(String, String),
}

impl EntityAddress {
    pub fn parse(path: &str) -> Result<Self, PatchError> {
        let segments = tokenize(path)?;
        let mut iter = segments.iter().peekable();

        if is_keyword(iter.peek().copied(), "entities") && segments.len() > 1 {
            iter.next();
        }
        let entity = match iter.next() {
            Some(Segment::Key(k)) => k.clone(),
            _ => return Err(invalid(path, "must start with an entity name")),
        };

        if is_keyword(iter.peek().copied(), "fields") {
            iter.next();
        }
        let field = match iter.next() {
            None => return Ok(EntityAddress::Entity(entity)),
            Some(Segment::Key(k)) => k.clone(),
            Some(Segment::Index(_)) => return Err(invalid(path, "expected a field name")),
        };

        if iter.next().is_some() {
            return Err(invalid(path, "trailing segments after field name"));
        }
        Ok(EntityAddress::Field(entity, field))
    }

    pub fn entity(&self) -> &str {
        match self {
            EntityAddress::Entity(e) | EntityAddress::Field(e, _) => e,
        }
    }
}

impl fmt::Display for EntityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityAddress::Entity(e) => write!(f, "{}", e),
            EntityAddress::Field(e, field) => write!(f, "{}.{}", e, field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_tree_depth() {
        assert_eq!(
            TreeAddress::parse("dashboard").unwrap(),
            TreeAddress::Page("dashboard".into())
        );
        assert_eq!(
            TreeAddress::parse("dashboard.zones[0]").unwrap(),
            TreeAddress::Zone("dashboard".into(), 0)
        );
        assert_eq!(
            TreeAddress::parse("tasks.zones[1].components[2]").unwrap(),
            TreeAddress::Component("tasks".into(), 1, 2)
        );
        assert_eq!(
            TreeAddress::parse("tasks.zones[0].components[0].props.resource").unwrap(),
            TreeAddress::Prop("tasks".into(), 0, 0, "resource".into())
        );
    }

    #[test]
    fn keywords_are_optional() {
        assert_eq!(
            TreeAddress::parse("pages.tasks[0][1].title").unwrap(),
            TreeAddress::Prop("tasks".into(), 0, 1, "title".into())
        );
        assert_eq!(
            TreeAddress::parse("tasks.0.1").unwrap(),
            TreeAddress::Component("tasks".into(), 0, 1)
        );
    }

    #[test]
    fn display_is_canonical() {
        let addr = TreeAddress::parse("tasks.0.1.props.fields").unwrap();
        assert_eq!(addr.to_string(), "tasks.zones[0].components[1].props.fields");
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for bad in ["", "tasks..zones", "tasks.zones[x]", "tasks.zones[0", "0", "tasks.zones.title"] {
            assert!(
                matches!(TreeAddress::parse(bad), Err(PatchError::InvalidPath { .. })),
                "{bad} should be rejected"
            );
        }
        assert!(TreeAddress::parse("tasks.zones[0].components[0].props.a.b").is_err());
    }

    #[test]
    fn parses_entity_targets() {
        assert_eq!(
            EntityAddress::parse("task").unwrap(),
            EntityAddress::Entity("task".into())
        );
        assert_eq!(
            EntityAddress::parse("entities.task.fields.priority").unwrap(),
            EntityAddress::Field("task".into(), "priority".into())
        );
        assert_eq!(
            EntityAddress::parse("task.priority").unwrap(),
            EntityAddress::Field("task".into(), "priority".into())
        );
        assert!(EntityAddress::parse("task.priority.extra").is_err());
    }
}
