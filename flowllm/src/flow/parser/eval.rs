//! Tree walker: builds the composed op tree from parsed statements using
//! registry-resolved constructors.

use std::collections::HashMap;

use super::ast::{BinOp, Expr, Stmt};
use super::ParseError;
use crate::op::{Combinator, Op, OpArgs, ParallelOp, SequentialOp};
use crate::registry::Registry;

pub fn evaluate(
    statements: Vec<(usize, Stmt)>,
    registry: &Registry,
) -> Result<Box<dyn Op>, ParseError> {
    if statements.is_empty() {
        return Err(ParseError::EmptyExpression);
    }
    let mut env: HashMap<String, Box<dyn Op>> = HashMap::new();
    let last_index = statements.len() - 1;

    for (index, (line, stmt)) in statements.into_iter().enumerate() {
        let is_last = index == last_index;
        match stmt {
            Stmt::Assign { var, expr } => {
                if is_last {
                    return Err(ParseError::NotAnExpression { line });
                }
                let op = eval_expr(expr, &mut env, registry)?;
                env.insert(var, op);
            }
            Stmt::AttrAssign { var, child, expr } => {
                if is_last {
                    return Err(ParseError::NotAnExpression { line });
                }
                let child_op = eval_expr(expr, &mut env, registry)?;
                let parent = env
                    .get_mut(&var)
                    .ok_or_else(|| ParseError::UnknownVariable(var.clone()))?;
                parent.add_child(&child, child_op)?;
            }
            Stmt::Expr(expr) => {
                if !is_last {
                    return Err(ParseError::Syntax {
                        line,
                        message: "only the last line may be a bare expression".to_string(),
                    });
                }
                return eval_expr(expr, &mut env, registry);
            }
        }
    }
    // The last statement was an assignment and was rejected above.
    unreachable!("loop returns on the last statement")
}

fn eval_expr(
    expr: Expr,
    env: &mut HashMap<String, Box<dyn Op>>,
    registry: &Registry,
) -> Result<Box<dyn Op>, ParseError> {
    match expr {
        Expr::Literal(_) => Err(ParseError::NotAnOp),
        Expr::Var(name) => {
            let op = env
                .get(&name)
                .ok_or_else(|| ParseError::UnknownVariable(name.clone()))?;
            // Every use gets a deep copy; shared sub-ops must not alias.
            Ok(op.copy_op())
        }
        Expr::Call { name, args } => {
            if !registry.has_op(&name) {
                return Err(ParseError::UnknownOp(name));
            }
            let kwargs: OpArgs = args.into_iter().collect();
            registry
                .build_op(&name, kwargs)
                .map_err(|err| ParseError::Constructor {
                    name: name.clone(),
                    message: err.to_string(),
                })
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs_op = eval_expr(*lhs, env, registry)?;
            let rhs_op = eval_expr(*rhs, env, registry)?;
            combine(op, lhs_op, rhs_op)
        }
    }
}

fn combine(
    op: BinOp,
    mut lhs: Box<dyn Op>,
    rhs: Box<dyn Op>,
) -> Result<Box<dyn Op>, ParseError> {
    match op {
        BinOp::Seq => {
            // Left-associative chains flatten into one node; parenthesized
            // sub-chains keep their own node.
            let mut children = if lhs.combinator() == Combinator::Sequential {
                lhs.take_children()
            } else {
                vec![lhs]
            };
            children.push(rhs);
            Ok(Box::new(SequentialOp::new(children)?))
        }
        BinOp::Par => {
            let mut children = if lhs.combinator() == Combinator::Parallel {
                lhs.take_children()
            } else {
                vec![lhs]
            };
            children.push(rhs);
            Ok(Box::new(ParallelOp::new(children)?))
        }
        BinOp::Child => {
            let name = rhs.name().to_string();
            lhs.add_child(&name, rhs)?;
            Ok(lhs)
        }
    }
}
