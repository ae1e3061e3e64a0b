//! Plan diagnostics: a pure traversal rendering the physical plan as a
//! labeled DAG, with text and Graphviz dot renderers behind it.

use crate::physical_plan::{Expr, ExprKind, Node, NodeKind, TvfArg};
use std::fmt::Write as _;

/// A vertex of the plan DAG: a label, scalar fields and named child edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub label: String,
    pub fields: Vec<(String, String)>,
    pub children: Vec<(String, GraphNode)>,
}

impl GraphNode {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fields: vec![],
            children: vec![],
        }
    }

    fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    fn add_child(&mut self, edge: impl Into<String>, child: GraphNode) {
        self.children.push((edge.into(), child));
    }

    /// Indented multiline rendering for terminal output.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        self.fmt_text(0, None, &mut out);
        out
    }

    fn fmt_text(&self, indent: usize, edge: Option<&str>, out: &mut String) {
        let pad = "  ".repeat(indent);
        match edge {
            Some(edge) => {
                let _ = writeln!(out, "{pad}{edge}: {}", self.label);
            }
            None => {
                let _ = writeln!(out, "{pad}{}", self.label);
            }
        }
        for (name, value) in &self.fields {
            let _ = writeln!(out, "{pad}  [{name}={value}]");
        }
        for (edge, child) in &self.children {
            child.fmt_text(indent + 1, Some(edge), out);
        }
    }

    /// Graphviz dot rendering. Vertex numbering is a deterministic DFS, so
    /// identical DAGs render identical documents.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph plan {\n  rankdir = BT;\n");
        let mut counter = 0usize;
        self.fmt_dot(&mut counter, &mut out);
        out.push_str("}\n");
        out
    }

    fn fmt_dot(&self, counter: &mut usize, out: &mut String) -> usize {
        let id = *counter;
        *counter += 1;
        let mut label = escape_dot(&self.label);
        for (name, value) in &self.fields {
            let _ = write!(label, "\\n{}: {}", escape_dot(name), escape_dot(value));
        }
        let _ = writeln!(out, "  n{id} [label=\"{label}\", shape=box];");
        for (edge, child) in &self.children {
            let child_id = child.fmt_dot(counter, out);
            let _ = writeln!(out, "  n{child_id} -> n{id} [label=\"{}\"];", escape_dot(edge));
        }
        id
    }
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// How much schema detail the DAG carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDetail {
    /// Operator structure only.
    Omit,
    /// Attach each node's output schema as a field.
    Include,
}

/// Describe a physical node as a DAG vertex. Pure: identical inputs produce
/// structurally identical DAGs.
pub fn describe_node(node: &Node, detail: SchemaDetail) -> GraphNode {
    let mut out = match &node.kind {
        NodeKind::Datasource(d) => {
            let mut out = GraphNode::new(d.name.clone());
            if !d.predicates.is_empty() {
                for (i, p) in d.predicates.iter().enumerate() {
                    out.add_child(format!("predicate_{i}"), describe_expr(p));
                }
            }
            out
        }
        NodeKind::Distinct(d) => {
            let mut out = GraphNode::new("distinct");
            out.add_child("source", describe_node(&d.source, detail));
            out
        }
        NodeKind::Filter(f) => {
            let mut out = GraphNode::new("filter");
            out.add_child("predicate", describe_expr(&f.predicate));
            out.add_child("source", describe_node(&f.source, detail));
            out
        }
        NodeKind::GroupBy(g) => {
            let mut out = GraphNode::new("group by");
            for (name, expr) in g.aggregates.iter().zip(&g.aggregate_expressions) {
                out.add_child(name.clone(), describe_expr(expr));
            }
            let mut key = GraphNode::new("key");
            for (i, k) in g.key.iter().enumerate() {
                key.add_child(format!("arg_{i}"), describe_expr(k));
            }
            out.add_child("key", key);
            out.add_child("source", describe_node(&g.source, detail));
            out
        }
        NodeKind::StreamJoin(j) => {
            let mut out = GraphNode::new("join");
            out.add_child("left", describe_node(&j.left, detail));
            out.add_child("right", describe_node(&j.right, detail));
            out.add_child("left_key", describe_key(&j.left_key));
            out.add_child("right_key", describe_key(&j.right_key));
            out
        }
        NodeKind::LookupJoin(j) => {
            let mut out = GraphNode::new("lookup join");
            out.add_child("source", describe_node(&j.source, detail));
            out.add_child("joined", describe_node(&j.joined, detail));
            out
        }
        NodeKind::Map(m) => {
            let mut out = GraphNode::new("map");
            for (field, expr) in node.schema.fields.iter().zip(&m.expressions) {
                out.add_child(field.name.clone(), describe_expr(expr));
            }
            out.add_child("source", describe_node(&m.source, detail));
            out
        }
        NodeKind::OrderBy(o) => {
            let mut out = GraphNode::new("sort");
            for (key, multiplier) in o.key.iter().zip(&o.direction_multipliers) {
                let edge = if *multiplier >= 0 { "asc" } else { "desc" };
                out.add_child(edge, describe_expr(key));
            }
            out.add_child("source", describe_node(&o.source, detail));
            out
        }
        NodeKind::Limit(l) => {
            let mut out = GraphNode::new("limit");
            out.add_field("limit", l.limit.to_string());
            out.add_child("source", describe_node(&l.source, detail));
            out
        }
        NodeKind::Requalifier(r) => {
            let mut out = GraphNode::new("requalifier");
            out.add_field("new qualifier", r.qualifier.clone());
            out.add_child("source", describe_node(&r.source, detail));
            out
        }
        NodeKind::TableValuedFunction(tvf) => {
            let mut out = GraphNode::new(tvf.name.clone());
            for (name, arg) in &tvf.arguments {
                match arg {
                    TvfArg::Expression(e) => out.add_child(name.clone(), describe_expr(e)),
                    TvfArg::Table(t) => out.add_child(name.clone(), describe_node(t, detail)),
                    TvfArg::Descriptor(d) => {
                        let mut descriptor = GraphNode::new("descriptor");
                        descriptor.add_field("value", d.clone());
                        out.add_child(name.clone(), descriptor);
                    }
                }
            }
            out
        }
        NodeKind::Unnest(u) => {
            let mut out = GraphNode::new("unnest");
            out.add_field("field", u.field.clone());
            out.add_child("source", describe_node(&u.source, detail));
            out
        }
    };
    if detail == SchemaDetail::Include {
        out.add_field("schema", node.schema.to_string());
    }
    out
}

fn describe_key(key: &[Expr]) -> GraphNode {
    let mut out = GraphNode::new("tuple");
    for (i, k) in key.iter().enumerate() {
        out.add_child(format!("arg_{i}"), describe_expr(k));
    }
    out
}

/// Describe a physical expression as a DAG vertex.
pub fn describe_expr(expr: &Expr) -> GraphNode {
    match &expr.kind {
        ExprKind::Variable { name, is_outer } => {
            let mut out = GraphNode::new("variable");
            out.add_field("name", name.clone());
            out.add_field("is_outer", is_outer.to_string());
            out
        }
        ExprKind::Constant(value) => {
            let mut out = GraphNode::new("constant");
            out.add_field("value", value.to_string());
            out
        }
        ExprKind::FunctionCall { name, arguments } => {
            let mut out = GraphNode::new("function");
            out.add_field("name", name.clone());
            for (i, arg) in arguments.iter().enumerate() {
                out.add_child(format!("arg_{i}"), describe_expr(arg));
            }
            out
        }
        ExprKind::And(args) => describe_variadic("and", args),
        ExprKind::Or(args) => describe_variadic("or", args),
        ExprKind::Coalesce(args) => describe_variadic("coalesce", args),
        ExprKind::Tuple(args) => describe_variadic("tuple", args),
        ExprKind::TypeAssertion(inner) => {
            let mut out = GraphNode::new("type assertion");
            out.add_field("type", expr.typ.to_string());
            out.add_child("value", describe_expr(inner));
            out
        }
        ExprKind::Query(node) => {
            let mut out = GraphNode::new("subquery");
            out.add_child("source", describe_node(node, SchemaDetail::Omit));
            out
        }
    }
}

fn describe_variadic(label: &str, args: &[Expr]) -> GraphNode {
    let mut out = GraphNode::new(label);
    for (i, arg) in args.iter().enumerate() {
        out.add_child(format!("arg_{i}"), describe_expr(arg));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical_plan as physical;
    use rill_common::{Schema, SchemaField, Type, Value};

    fn scan() -> Node {
        Node {
            schema: Schema::batch(vec![SchemaField::new("t.v", Type::Int)]),
            kind: NodeKind::Datasource(physical::Datasource {
                name: "t".into(),
                alias: "t".into(),
                predicates: vec![],
            }),
        }
    }

    fn filter_plan() -> Node {
        let src = scan();
        Node {
            schema: src.schema.clone(),
            kind: NodeKind::Filter(physical::Filter {
                source: Box::new(src),
                predicate: Expr {
                    typ: Type::Boolean,
                    kind: ExprKind::FunctionCall {
                        name: "=".into(),
                        arguments: vec![
                            Expr::variable("t.v", Type::Int),
                            Expr::constant(Value::Int(3)),
                        ],
                    },
                },
            }),
        }
    }

    #[test]
    fn describe_is_pure() {
        let plan = filter_plan();
        let a = describe_node(&plan, SchemaDetail::Omit);
        let b = describe_node(&plan, SchemaDetail::Omit);
        assert_eq!(a, b);
        assert_eq!(a.to_dot(), b.to_dot());
    }

    #[test]
    fn filter_vertex_has_predicate_and_source_edges() {
        let dag = describe_node(&filter_plan(), SchemaDetail::Omit);
        assert_eq!(dag.label, "filter");
        let edges: Vec<&str> = dag.children.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(edges, vec!["predicate", "source"]);
        assert_eq!(dag.children[1].1.label, "t");
    }

    #[test]
    fn schema_detail_attaches_schema_field() {
        let dag = describe_node(&filter_plan(), SchemaDetail::Include);
        assert!(dag
            .fields
            .iter()
            .any(|(name, value)| name == "schema" && value.contains("t.v: Int")));
    }

    #[test]
    fn text_rendering_is_indented() {
        let text = describe_node(&filter_plan(), SchemaDetail::Omit).to_text();
        assert!(text.starts_with("filter\n"), "{text}");
        assert!(text.contains("  predicate: function"), "{text}");
        assert!(text.contains("[name==]"), "{text}");
    }

    #[test]
    fn dot_rendering_is_wellformed() {
        let dot = describe_node(&filter_plan(), SchemaDetail::Omit).to_dot();
        assert!(dot.starts_with("digraph plan {"), "{dot}");
        assert!(dot.contains("label=\"filter\""), "{dot}");
        assert!(dot.contains("->"), "{dot}");
        assert!(dot.ends_with("}\n"), "{dot}");
    }
}
