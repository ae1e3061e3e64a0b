use crate::physical_plan::{Expr, ExprKind, Node, NodeKind};
use rill_common::{Result, Type, Value};

/// Physical-plan rewrite pipeline.
///
/// The executor accepts any well-typed plan; every pass here is semantics
/// preserving and optional (`--optimize=false` skips the whole pipeline).
#[derive(Debug, Default)]
pub struct Optimizer;

impl Optimizer {
    pub fn new() -> Self {
        Self
    }

    pub fn optimize(&self, plan: Node) -> Result<Node> {
        // 1) constant folding over boolean connectives and assertions
        let plan = rewrite_exprs(plan, &fold_constants);

        // 2) adjacent filter merge
        let plan = rewrite_nodes(plan, &merge_filters);

        // 3) predicate pushdown into datasource scans
        let plan = rewrite_nodes(plan, &push_predicates);

        Ok(plan)
    }
}

// -----------------------------
// Rewrite plumbing
// -----------------------------

fn rewrite_nodes(node: Node, rule: &impl Fn(Node) -> Node) -> Node {
    let Node { schema, kind } = node;
    let kind = match kind {
        NodeKind::Datasource(d) => NodeKind::Datasource(d),
        NodeKind::Filter(mut x) => {
            x.source = Box::new(rewrite_nodes(*x.source, rule));
            NodeKind::Filter(x)
        }
        NodeKind::Map(mut x) => {
            x.source = Box::new(rewrite_nodes(*x.source, rule));
            NodeKind::Map(x)
        }
        NodeKind::Distinct(mut x) => {
            x.source = Box::new(rewrite_nodes(*x.source, rule));
            NodeKind::Distinct(x)
        }
        NodeKind::GroupBy(mut x) => {
            x.source = Box::new(rewrite_nodes(*x.source, rule));
            NodeKind::GroupBy(x)
        }
        NodeKind::StreamJoin(mut x) => {
            x.left = Box::new(rewrite_nodes(*x.left, rule));
            x.right = Box::new(rewrite_nodes(*x.right, rule));
            NodeKind::StreamJoin(x)
        }
        NodeKind::LookupJoin(mut x) => {
            x.source = Box::new(rewrite_nodes(*x.source, rule));
            x.joined = Box::new(rewrite_nodes(*x.joined, rule));
            NodeKind::LookupJoin(x)
        }
        NodeKind::OrderBy(mut x) => {
            x.source = Box::new(rewrite_nodes(*x.source, rule));
            NodeKind::OrderBy(x)
        }
        NodeKind::Limit(mut x) => {
            x.source = Box::new(rewrite_nodes(*x.source, rule));
            NodeKind::Limit(x)
        }
        NodeKind::Requalifier(mut x) => {
            x.source = Box::new(rewrite_nodes(*x.source, rule));
            NodeKind::Requalifier(x)
        }
        NodeKind::Unnest(mut x) => {
            x.source = Box::new(rewrite_nodes(*x.source, rule));
            NodeKind::Unnest(x)
        }
        NodeKind::TableValuedFunction(mut x) => {
            for (_, arg) in &mut x.arguments {
                if let crate::physical_plan::TvfArg::Table(t) = arg {
                    let rewritten = rewrite_nodes(std::mem::replace(
                        t.as_mut(),
                        placeholder_node(),
                    ), rule);
                    **t = rewritten;
                }
            }
            NodeKind::TableValuedFunction(x)
        }
    };
    rule(Node { schema, kind })
}

fn placeholder_node() -> Node {
    Node {
        schema: rill_common::Schema::batch(vec![]),
        kind: NodeKind::Datasource(crate::physical_plan::Datasource {
            name: String::new(),
            alias: String::new(),
            predicates: vec![],
        }),
    }
}

fn rewrite_exprs(node: Node, rule: &impl Fn(Expr) -> Expr) -> Node {
    rewrite_nodes(node, &|node| {
        let Node { schema, kind } = node;
        let kind = match kind {
            NodeKind::Filter(mut x) => {
                x.predicate = rewrite_expr_tree(x.predicate, rule);
                NodeKind::Filter(x)
            }
            NodeKind::Map(mut x) => {
                x.expressions = x
                    .expressions
                    .into_iter()
                    .map(|e| rewrite_expr_tree(e, rule))
                    .collect();
                NodeKind::Map(x)
            }
            NodeKind::GroupBy(mut x) => {
                x.key = x.key.into_iter().map(|e| rewrite_expr_tree(e, rule)).collect();
                x.aggregate_expressions = x
                    .aggregate_expressions
                    .into_iter()
                    .map(|e| rewrite_expr_tree(e, rule))
                    .collect();
                NodeKind::GroupBy(x)
            }
            NodeKind::StreamJoin(mut x) => {
                x.left_key = x
                    .left_key
                    .into_iter()
                    .map(|e| rewrite_expr_tree(e, rule))
                    .collect();
                x.right_key = x
                    .right_key
                    .into_iter()
                    .map(|e| rewrite_expr_tree(e, rule))
                    .collect();
                NodeKind::StreamJoin(x)
            }
            NodeKind::OrderBy(mut x) => {
                x.key = x.key.into_iter().map(|e| rewrite_expr_tree(e, rule)).collect();
                NodeKind::OrderBy(x)
            }
            other => other,
        };
        Node { schema, kind }
    })
}

fn rewrite_expr_tree(expr: Expr, rule: &impl Fn(Expr) -> Expr) -> Expr {
    let Expr { typ, kind } = expr;
    let kind = match kind {
        ExprKind::FunctionCall { name, arguments } => ExprKind::FunctionCall {
            name,
            arguments: arguments
                .into_iter()
                .map(|a| rewrite_expr_tree(a, rule))
                .collect(),
        },
        ExprKind::And(args) => {
            ExprKind::And(args.into_iter().map(|a| rewrite_expr_tree(a, rule)).collect())
        }
        ExprKind::Or(args) => {
            ExprKind::Or(args.into_iter().map(|a| rewrite_expr_tree(a, rule)).collect())
        }
        ExprKind::Coalesce(args) => ExprKind::Coalesce(
            args.into_iter().map(|a| rewrite_expr_tree(a, rule)).collect(),
        ),
        ExprKind::Tuple(args) => {
            ExprKind::Tuple(args.into_iter().map(|a| rewrite_expr_tree(a, rule)).collect())
        }
        ExprKind::TypeAssertion(inner) => {
            ExprKind::TypeAssertion(Box::new(rewrite_expr_tree(*inner, rule)))
        }
        leaf @ (ExprKind::Variable { .. } | ExprKind::Constant(_) | ExprKind::Query(_)) => leaf,
    };
    rule(Expr { typ, kind })
}

// -----------------------------
// 1) Constant folding
// -----------------------------

fn fold_constants(expr: Expr) -> Expr {
    match expr.kind {
        ExprKind::And(args) => {
            if args
                .iter()
                .any(|a| matches!(&a.kind, ExprKind::Constant(Value::Boolean(false))))
            {
                return Expr::constant(Value::Boolean(false));
            }
            let kept: Vec<Expr> = args
                .into_iter()
                .filter(|a| !matches!(&a.kind, ExprKind::Constant(Value::Boolean(true))))
                .collect();
            match kept.len() {
                0 => Expr::constant(Value::Boolean(true)),
                1 => kept.into_iter().next().expect("len checked"),
                _ => Expr {
                    typ: expr.typ,
                    kind: ExprKind::And(kept),
                },
            }
        }
        ExprKind::Or(args) => {
            if args
                .iter()
                .any(|a| matches!(&a.kind, ExprKind::Constant(Value::Boolean(true))))
            {
                return Expr::constant(Value::Boolean(true));
            }
            let kept: Vec<Expr> = args
                .into_iter()
                .filter(|a| !matches!(&a.kind, ExprKind::Constant(Value::Boolean(false))))
                .collect();
            match kept.len() {
                0 => Expr::constant(Value::Boolean(false)),
                1 => kept.into_iter().next().expect("len checked"),
                _ => Expr {
                    typ: expr.typ,
                    kind: ExprKind::Or(kept),
                },
            }
        }
        ExprKind::Coalesce(args) => {
            // A leading non-null constant decides the result.
            let decided = matches!(
                args.first().map(|a| &a.kind),
                Some(ExprKind::Constant(v)) if !v.is_null()
            );
            if decided {
                args.into_iter().next().expect("non-empty")
            } else {
                Expr {
                    typ: expr.typ,
                    kind: ExprKind::Coalesce(args),
                }
            }
        }
        ExprKind::TypeAssertion(inner) => {
            let passes = matches!(&inner.kind, ExprKind::Constant(v) if expr.typ.contains(v));
            if passes {
                *inner
            } else {
                Expr {
                    typ: expr.typ,
                    kind: ExprKind::TypeAssertion(inner),
                }
            }
        }
        kind => Expr {
            typ: expr.typ,
            kind,
        },
    }
}

// -----------------------------
// 2) Filter merge
// -----------------------------

fn merge_filters(node: Node) -> Node {
    let Node { schema, kind } = node;
    match kind {
        NodeKind::Filter(outer) => match outer.source.kind {
            NodeKind::Filter(inner) => {
                let predicate = Expr {
                    typ: and_type(&outer.predicate, &inner.predicate),
                    kind: ExprKind::And(vec![inner.predicate, outer.predicate]),
                };
                Node {
                    schema,
                    kind: NodeKind::Filter(crate::physical_plan::Filter {
                        source: inner.source,
                        predicate,
                    }),
                }
            }
            source_kind => Node {
                schema,
                kind: NodeKind::Filter(crate::physical_plan::Filter {
                    source: Box::new(Node {
                        schema: outer.source.schema,
                        kind: source_kind,
                    }),
                    predicate: outer.predicate,
                }),
            },
        },
        kind => Node { schema, kind },
    }
}

fn and_type(a: &Expr, b: &Expr) -> Type {
    if a.typ.is_nullable() || b.typ.is_nullable() {
        Type::optional(Type::Boolean)
    } else {
        Type::Boolean
    }
}

// -----------------------------
// 3) Predicate pushdown
// -----------------------------

fn push_predicates(node: Node) -> Node {
    let Node { schema, kind } = node;
    match kind {
        NodeKind::Filter(filter) => match filter.source.kind {
            NodeKind::Datasource(mut d) if !references_outer(&filter.predicate) => {
                d.predicates.push(filter.predicate);
                // The filter collapses into the scan; schemas are identical.
                Node {
                    schema,
                    kind: NodeKind::Datasource(d),
                }
            }
            source_kind => Node {
                schema,
                kind: NodeKind::Filter(crate::physical_plan::Filter {
                    source: Box::new(Node {
                        schema: filter.source.schema,
                        kind: source_kind,
                    }),
                    predicate: filter.predicate,
                }),
            },
        },
        kind => Node { schema, kind },
    }
}

fn references_outer(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Variable { is_outer, .. } => *is_outer,
        ExprKind::Constant(_) => false,
        ExprKind::FunctionCall { arguments, .. } => arguments.iter().any(references_outer),
        ExprKind::And(args) | ExprKind::Or(args) | ExprKind::Coalesce(args)
        | ExprKind::Tuple(args) => args.iter().any(references_outer),
        ExprKind::TypeAssertion(inner) => references_outer(inner),
        // Conservative: a subplan may reference anything.
        ExprKind::Query(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical_plan as physical;
    use rill_common::{Schema, SchemaField};

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

    fn filter(source: Node, predicate: Expr) -> Node {
        Node {
            schema: source.schema.clone(),
            kind: NodeKind::Filter(physical::Filter {
                source: Box::new(source),
                predicate,
            }),
        }
    }

    fn pred(name: &str) -> Expr {
        Expr {
            typ: Type::Boolean,
            kind: ExprKind::FunctionCall {
                name: name.into(),
                arguments: vec![Expr::variable("t.v", Type::Int), Expr::constant(Value::Int(0))],
            },
        }
    }

    #[test]
    fn and_with_false_folds_to_false() {
        let expr = Expr {
            typ: Type::Boolean,
            kind: ExprKind::And(vec![pred("="), Expr::constant(Value::Boolean(false))]),
        };
        let plan = filter(scan(), expr);
        let out = Optimizer::new().optimize(plan).expect("optimize");
        // The folded constant predicate then gets pushed into the scan.
        let NodeKind::Datasource(d) = &out.kind else {
            panic!("expected pushed-down scan, got {:?}", out.kind)
        };
        assert_eq!(
            d.predicates,
            vec![Expr::constant(Value::Boolean(false))]
        );
    }

    #[test]
    fn adjacent_filters_merge_then_push_down() {
        let plan = filter(filter(scan(), pred("=")), pred(">"));
        let out = Optimizer::new().optimize(plan).expect("optimize");
        let NodeKind::Datasource(d) = &out.kind else {
            panic!("expected scan, got {:?}", out.kind)
        };
        assert_eq!(d.predicates.len(), 1);
        let ExprKind::And(args) = &d.predicates[0].kind else {
            panic!("expected merged conjunction")
        };
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn optimizer_preserves_schema() {
        let plan = filter(scan(), pred("="));
        let schema = plan.schema.clone();
        let out = Optimizer::new().optimize(plan).expect("optimize");
        assert_eq!(out.schema, schema);
    }
}
