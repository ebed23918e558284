//! Nested association specifications (`:author`, `[:author, {comments: :user}]`)

use serde_json::Value;

use crate::error::{ModelError, ModelResult};

/// What to preload, as given by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadSpec {
    Name(String),
    List(Vec<PreloadSpec>),
    /// Association name followed by what to preload on its targets
    Nested(Vec<(String, PreloadSpec)>),
}

impl PreloadSpec {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn nested(name: impl Into<String>, children: impl Into<PreloadSpec>) -> Self {
        Self::Nested(vec![(name.into(), children.into())])
    }

    /// Parse `"a"`, `["a", "b"]` or `{"a": <spec>}` (arbitrarily nested)
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        match value {
            Value::String(name) if !name.is_empty() => Ok(Self::Name(name.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<ModelResult<Vec<_>>>()
                .map(Self::List),
            Value::Object(entries) => entries
                .iter()
                .map(|(name, children)| -> ModelResult<(String, PreloadSpec)> {
                    Ok((name.clone(), Self::from_json(children)?))
                })
                .collect::<ModelResult<Vec<_>>>()
                .map(Self::Nested),
            other => Err(ModelError::Configuration(format!(
                "Invalid preload specification: {}",
                other
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Name(_) => false,
            Self::List(items) => items.iter().all(Self::is_empty),
            Self::Nested(entries) => entries.is_empty(),
        }
    }

    /// Flatten into a tree with one node per distinct association name
    pub fn normalize(&self) -> Vec<PreloadNode> {
        let mut nodes = Vec::new();
        self.collect_into(&mut nodes);
        nodes
    }

    fn collect_into(&self, nodes: &mut Vec<PreloadNode>) {
        match self {
            Self::Name(name) => {
                node_for(nodes, name);
            }
            Self::List(items) => {
                for item in items {
                    item.collect_into(nodes);
                }
            }
            Self::Nested(entries) => {
                for (name, children) in entries {
                    let node = node_for(nodes, name);
                    children.collect_into(&mut node.children);
                }
            }
        }
    }
}

fn node_for<'a>(nodes: &'a mut Vec<PreloadNode>, name: &str) -> &'a mut PreloadNode {
    let index = match nodes.iter().position(|node| node.name == name) {
        Some(index) => index,
        None => {
            nodes.push(PreloadNode::new(name));
            nodes.len() - 1
        }
    };
    &mut nodes[index]
}

impl From<&str> for PreloadSpec {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for PreloadSpec {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl<T: Into<PreloadSpec>> From<Vec<T>> for PreloadSpec {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// One association of a normalized preload tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadNode {
    pub name: String,
    pub children: Vec<PreloadNode>,
}

impl PreloadNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Number of levels in this subtree, counting the node itself
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(PreloadNode::depth).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_shapes() {
        assert_eq!(PreloadSpec::from_json(&json!("author")).unwrap(), PreloadSpec::from("author"));

        let spec = PreloadSpec::from_json(&json!(["author", {"comments": ["user", "likes"]}])).unwrap();
        let nodes = spec.normalize();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "author");
        assert_eq!(nodes[1].name, "comments");
        assert_eq!(nodes[1].children.len(), 2);
        assert_eq!(nodes[1].depth(), 2);

        assert!(PreloadSpec::from_json(&json!(42)).is_err());
        assert!(PreloadSpec::from_json(&json!("")).is_err());
        assert!(PreloadSpec::from_json(&json!([[], {}])).unwrap().is_empty());
    }

    #[test]
    fn test_normalize_merges_duplicates() {
        let spec = PreloadSpec::List(vec![
            PreloadSpec::nested("comments", "user"),
            PreloadSpec::from("comments"),
            PreloadSpec::nested("comments", PreloadSpec::nested("likes", "liker")),
        ]);
        let nodes = spec.normalize();
        assert_eq!(nodes.len(), 1);
        let children: Vec<&str> = nodes[0].children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(children, vec!["user", "likes"]);
        assert_eq!(nodes[0].depth(), 3);
    }
}
