//! Two-phase tree rewriting.
//!
//! Phase one settles every `ifte`/`alt`/`case` node, deepest first, by
//! collapsing only the sub-trees needed to pick a branch. Phase two repeatedly
//! collapses leaves bottom-up until the root holds a single value.

use super::ast::{Ast, NodeId, NodeKind};
use super::functions;
use crate::context::{EvalError, EventContext};
use crate::jdoc::{path, to_text, JDoc};
use serde_json::Value as JsonValue;

impl Ast {
    pub fn evaluate(&mut self, doc: &JDoc, ctx: &EventContext) -> JsonValue {
        self.resolve_conditionals(doc, ctx);
        self.collapse_to_value(self.root, doc, ctx)
    }

    fn resolve_conditionals(&mut self, doc: &JDoc, ctx: &EventContext) {
        loop {
            self.recompute_levels();
            let target = self
                .post_order(self.root)
                .into_iter()
                .filter(|id| {
                    let node = &self.nodes[*id];
                    node.kind == NodeKind::Function && functions::is_conditional(&node.name)
                })
                .max_by_key(|id| self.nodes[*id].level);

            let Some(target) = target else {
                break;
            };
            let chosen = self.choose_branch(target, doc, ctx);
            self.replace_with_subtree(target, chosen);
        }
    }

    fn choose_branch(&mut self, id: NodeId, doc: &JDoc, ctx: &EventContext) -> Option<NodeId> {
        let children = self.nodes[id].children.clone();
        let name = self.nodes[id].name.clone();

        match name.as_str() {
            "ifte" => {
                let condition = self.collapse_to_value(*children.first()?, doc, ctx);
                if is_truthy(&condition) {
                    children.get(1).copied()
                } else {
                    children.get(2).copied()
                }
            }
            "alt" => {
                for child in children {
                    let value = self.collapse_to_value(child, doc, ctx);
                    if !is_blank(&value) {
                        return Some(child);
                    }
                }
                None
            }
            "case" => {
                if children.len() % 3 == 2 {
                    ctx.record_error(EvalError::syntax(
                        "case expects key, value, result triples and an optional default",
                    ));
                }
                for triple in children.chunks_exact(3) {
                    let key = self.collapse_to_value(triple[0], doc, ctx);
                    let value = self.collapse_to_value(triple[1], doc, ctx);
                    if crate::jdoc::pattern::scalar_equal(&key, &value) {
                        return Some(triple[2]);
                    }
                }
                if children.len() % 3 == 1 {
                    children.last().copied()
                } else {
                    None
                }
            }
            other => {
                ctx.record_error(EvalError::runtime(format!(
                    "`{other}` is not a conditional"
                )));
                None
            }
        }
    }

    /// Collapses the sub-tree at `start` until it is a single scalar node.
    fn collapse_to_value(&mut self, start: NodeId, doc: &JDoc, ctx: &EventContext) -> JsonValue {
        while !self.nodes[start].dead && !self.nodes[start].is_scalar() {
            if !self.collapse_pass(start, doc, ctx) {
                break;
            }
        }
        let node = &self.nodes[start];
        if node.is_scalar() && !node.dead {
            node.value.clone()
        } else {
            JsonValue::Null
        }
    }

    fn collapse_pass(&mut self, start: NodeId, doc: &JDoc, ctx: &EventContext) -> bool {
        let mut changed = false;
        for id in self.post_order(start) {
            if self.nodes[id].dead {
                continue;
            }
            let kind = self.nodes[id].kind;
            match kind {
                NodeKind::Path => {
                    let value = evaluate_path(&self.nodes[id].name, doc, ctx);
                    let kind = self.scalar_kind_under(self.nodes[id].parent);
                    let node = &mut self.nodes[id];
                    node.value = value;
                    node.kind = kind;
                    changed = true;
                }
                NodeKind::Function => {
                    let children = &self.nodes[id].children;
                    if children
                        .iter()
                        .all(|child| self.nodes[*child].kind == NodeKind::Param)
                    {
                        let args: Vec<JsonValue> = children
                            .iter()
                            .map(|child| self.nodes[*child].value.clone())
                            .collect();
                        let value = functions::call(&self.nodes[id].name, ctx, doc, &args);
                        self.replace_with_value(id, value);
                        changed = true;
                    }
                }
                NodeKind::Agg => {
                    let children = &self.nodes[id].children;
                    if children.is_empty() {
                        self.replace_with_value(id, JsonValue::String(String::new()));
                        changed = true;
                    } else if children.len() == 1 && self.nodes[children[0]].is_scalar() {
                        let value = self.nodes[children[0]].value.clone();
                        self.replace_with_value(id, value);
                        changed = true;
                    } else if children
                        .iter()
                        .all(|child| self.nodes[*child].is_scalar())
                    {
                        let text: String = children
                            .iter()
                            .map(|child| to_text(&self.nodes[*child].value))
                            .collect();
                        self.replace_with_value(id, JsonValue::String(text));
                        changed = true;
                    }
                }
                NodeKind::Param | NodeKind::Text => {}
            }
        }
        changed
    }

    fn scalar_kind_under(&self, parent: Option<NodeId>) -> NodeKind {
        match parent.map(|parent| self.nodes[parent].kind) {
            Some(NodeKind::Function) => NodeKind::Param,
            _ => NodeKind::Text,
        }
    }

    fn replace_with_value(&mut self, id: NodeId, value: JsonValue) {
        let children = std::mem::take(&mut self.nodes[id].children);
        for child in children {
            self.kill(child);
        }
        let kind = self.scalar_kind_under(self.nodes[id].parent);
        let node = &mut self.nodes[id];
        node.kind = kind;
        node.value = value;
    }

    /// Puts `chosen` (a child of `id`) where `id` was; with no branch an
    /// empty text takes its place.
    fn replace_with_subtree(&mut self, id: NodeId, chosen: Option<NodeId>) {
        let Some(chosen) = chosen else {
            self.replace_with_value(id, JsonValue::String(String::new()));
            return;
        };
        let Some(parent) = self.nodes[id].parent else {
            self.replace_with_value(id, JsonValue::String(String::new()));
            return;
        };

        self.nodes[id].children.retain(|child| *child != chosen);
        self.kill(id);

        if let Some(slot) = self.nodes[parent]
            .children
            .iter_mut()
            .find(|child| **child == id)
        {
            *slot = chosen;
        }
        self.nodes[chosen].parent = Some(parent);
        if self.nodes[chosen].is_scalar() {
            self.nodes[chosen].kind = self.scalar_kind_under(Some(parent));
        }
    }

    fn kill(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            self.nodes[current].dead = true;
            stack.extend(std::mem::take(&mut self.nodes[current].children));
        }
    }
}

fn evaluate_path(raw: &str, doc: &JDoc, ctx: &EventContext) -> JsonValue {
    if !path::is_plain_path(raw) {
        if let Err(err) = path::parse_path(raw) {
            ctx.record_error(EvalError::syntax(err.to_string()));
            return JsonValue::Null;
        }
    }
    doc.value(raw).cloned().unwrap_or(JsonValue::Null)
}

/// Truthiness used by conditionals and the boolean functions.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(flag) => *flag,
        JsonValue::String(text) => text.trim().eq_ignore_ascii_case("true"),
        JsonValue::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

pub fn is_blank(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(text) => text.trim().is_empty(),
        _ => false,
    }
}
