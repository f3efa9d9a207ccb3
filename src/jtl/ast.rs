//! Arena-backed syntax tree for JTL expressions.
//!
//! Nodes live in a flat vector and refer to each other by index, so parent
//! links never form owning cycles. Evaluation rewrites the tree in place;
//! nodes cut out of the tree are marked dead rather than removed.

use super::functions;
use super::lexer::{contains_meta, remove_escapes, Lexer, TokenKind};
use crate::context::EvalError;
use serde_json::Value as JsonValue;

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Agg,
    Path,
    Function,
    Param,
    Text,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Function name or path text.
    pub name: String,
    pub value: JsonValue,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub level: usize,
    pub dead: bool,
}

impl Node {
    fn new(kind: NodeKind, name: impl Into<String>, value: JsonValue) -> Self {
        Self {
            kind,
            name: name.into(),
            value,
            parent: None,
            children: Vec::new(),
            level: 0,
            dead: false,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, NodeKind::Param | NodeKind::Text)
    }
}

#[derive(Debug, Clone)]
pub struct Ast {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
}

impl Ast {
    fn empty() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Agg, "", JsonValue::Null)],
            root: 0,
        }
    }

    /// Parses an expression, re-parsing parameters that embed `{{ … }}`
    /// until none remain opaque.
    pub fn parse(expression: &str) -> Result<Self, EvalError> {
        let mut ast = Self::parse_flat(expression)?;
        ast.explode_params()?;
        ast.recompute_levels();
        Ok(ast)
    }

    fn parse_flat(expression: &str) -> Result<Self, EvalError> {
        let mut ast = Self::empty();
        let root = ast.root;
        let mut call: Option<NodeId> = None;

        for token in Lexer::new(expression) {
            match token.kind {
                TokenKind::Text => {
                    let text = remove_escapes(&token.value);
                    ast.add_child(root, Node::new(NodeKind::Text, "", JsonValue::String(text)));
                }
                TokenKind::Path | TokenKind::Dot => {
                    ast.add_child(root, Node::new(NodeKind::Path, token.value, JsonValue::Null));
                }
                TokenKind::Function => {
                    if functions::lookup(&token.value).is_none() {
                        return Err(EvalError::syntax(format!(
                            "unknown function `{}` at position {}",
                            token.value, token.pos
                        )));
                    }
                    let id = ast.add_child(
                        root,
                        Node::new(NodeKind::Function, token.value, JsonValue::Null),
                    );
                    call = Some(id);
                }
                TokenKind::Param => {
                    let Some(function) = call else {
                        return Err(EvalError::syntax(format!(
                            "parameter outside of a function call at position {}",
                            token.pos
                        )));
                    };
                    ast.add_child(
                        function,
                        Node::new(NodeKind::Param, "", JsonValue::String(token.value)),
                    );
                }
                TokenKind::RightBracket => {
                    if let Some(function) = call.take() {
                        ast.check_arity(function)?;
                    }
                }
                TokenKind::LeftMeta | TokenKind::RightMeta | TokenKind::LeftBracket => {}
                TokenKind::Error => {
                    return Err(EvalError::syntax(format!(
                        "{} in `{}` at position {}",
                        token.value, expression, token.pos
                    )));
                }
                TokenKind::Eof => break,
            }
        }

        Ok(ast)
    }

    fn check_arity(&self, function: NodeId) -> Result<(), EvalError> {
        let node = &self.nodes[function];
        let Some(spec) = functions::lookup(&node.name) else {
            return Err(EvalError::syntax(format!("unknown function `{}`", node.name)));
        };
        let count = node.children.len();
        if count < spec.min_params || count > spec.max_params {
            return Err(EvalError::syntax(format!(
                "function `{}` takes {} parameters, got {count}",
                spec.name,
                spec.arity_label()
            )));
        }
        Ok(())
    }

    /// Replaces every parameter embedding an expression with the parsed
    /// sub-tree; plain parameters lose their escape markers.
    fn explode_params(&mut self) -> Result<(), EvalError> {
        let params: Vec<NodeId> = (0..self.nodes.len())
            .filter(|id| self.nodes[*id].kind == NodeKind::Param)
            .collect();

        for id in params {
            let raw = match &self.nodes[id].value {
                JsonValue::String(text) => text.clone(),
                _ => continue,
            };
            if !contains_meta(&raw) {
                self.nodes[id].value = JsonValue::String(remove_escapes(&raw));
                continue;
            }

            let nested = Ast::parse(&raw)?;
            self.graft(id, nested);
        }
        Ok(())
    }

    /// Turns `target` into a copy of `other`'s root aggregate.
    fn graft(&mut self, target: NodeId, other: Ast) {
        let offset = self.nodes.len();
        let mut remap = vec![0; other.nodes.len()];
        for (old_id, slot) in remap.iter_mut().enumerate() {
            *slot = if old_id == other.root {
                target
            } else {
                offset + old_id - usize::from(old_id > other.root)
            };
        }

        let root_children: Vec<NodeId> = other.nodes[other.root]
            .children
            .iter()
            .map(|child| remap[*child])
            .collect();

        for (old_id, mut node) in other.nodes.into_iter().enumerate() {
            if old_id == other.root {
                continue;
            }
            node.parent = node.parent.map(|parent| remap[parent]);
            node.children = node.children.iter().map(|child| remap[*child]).collect();
            self.nodes.push(node);
        }

        let slot = &mut self.nodes[target];
        slot.kind = NodeKind::Agg;
        slot.value = JsonValue::Null;
        slot.children = root_children;
    }

    pub(crate) fn add_child(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        let id = self.nodes.len();
        node.parent = Some(parent);
        node.level = self.nodes[parent].level + 1;
        self.nodes.push(node);
        self.nodes[parent].children.push(id);
        id
    }

    pub(crate) fn recompute_levels(&mut self) {
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, level)) = stack.pop() {
            self.nodes[id].level = level;
            for child in &self.nodes[id].children {
                stack.push((*child, level + 1));
            }
        }
    }

    pub fn root(&self) -> &Node {
        &self.nodes[self.root]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Live nodes in post-order below (and including) `start`.
    pub(crate) fn post_order(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(start, false)];
        while let Some((id, visited)) = stack.pop() {
            if visited {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for child in self.nodes[id].children.iter().rev() {
                stack.push((*child, false));
            }
        }
        order
    }

    /// Renders the tree back into expression form, mostly for diagnostics.
    pub fn render(&self) -> String {
        self.render_node(self.root)
    }

    fn render_node(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        match node.kind {
            NodeKind::Agg => node
                .children
                .iter()
                .map(|child| self.render_node(*child))
                .collect(),
            NodeKind::Path => format!("{{{{{}}}}}", node.name),
            NodeKind::Text | NodeKind::Param => crate::jdoc::to_text(&node.value),
            NodeKind::Function => {
                let params: Vec<String> = node
                    .children
                    .iter()
                    .map(|child| format!("'{}'", self.render_node(*child)))
                    .collect();
                format!("{{{{{}({})}}}}", node.name, params.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_params_explode_into_aggregates() {
        let ast = Ast::parse("{{ifte('{{equals('{{/a}}','1')}}','yes','no')}}").expect("parse");
        let root = ast.root();
        assert_eq!(root.children.len(), 1);
        let ifte = ast.node(root.children[0]);
        assert_eq!(ifte.kind, NodeKind::Function);
        assert_eq!(ifte.name, "ifte");
        let condition = ast.node(ifte.children[0]);
        assert_eq!(condition.kind, NodeKind::Agg);
        let equals = ast.node(condition.children[0]);
        assert_eq!(equals.name, "equals");
        assert_eq!(ast.node(equals.children[0]).kind, NodeKind::Agg);
        assert_eq!(ast.node(ifte.children[1]).value, JsonValue::String("yes".into()));
    }

    #[test]
    fn arity_is_checked_at_parse_time() {
        assert!(matches!(
            Ast::parse("{{not('a','b')}}"),
            Err(EvalError::Syntax { .. })
        ));
        assert!(Ast::parse("{{uuid()}}").is_ok());
    }

    #[test]
    fn unknown_functions_are_rejected() {
        assert!(Ast::parse("{{nosuch('x')}}").is_err());
    }

    #[test]
    fn render_reproduces_structure() {
        let ast = Ast::parse("a{{/b}}{{upper('c')}}").expect("parse");
        assert_eq!(ast.render(), "a{{/b}}{{upper('c')}}");
    }

    #[test]
    fn levels_follow_nesting() {
        let ast = Ast::parse("{{upper('{{/a}}')}}").expect("parse");
        let upper = ast.root().children[0];
        let agg = ast.node(upper).children[0];
        let path = ast.node(agg).children[0];
        assert_eq!(ast.node(path).level, 3);
    }
}
