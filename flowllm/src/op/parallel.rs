//! Parallel combinator (`A | B`): children run concurrently on the shared
//! context, each as a deep copy. The aggregated output is a list in declared
//! child order. A sibling failure cancels the group (scoped child token);
//! with `raise_on_failure=false` the node keeps completed results and
//! substitutes failed children's default outputs.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::Context;
use crate::error::FlowError;
use crate::op::{runtime, Combinator, CompositionError, Op, OpArgs, OpBase};
use crate::scheduler::TaskGroup;

pub struct ParallelOp {
    base: OpBase,
    children: Vec<Box<dyn Op>>,
}

impl ParallelOp {
    /// Builds a parallel node. Children must agree on `async_mode`;
    /// an empty child list is rejected.
    pub fn new(children: Vec<Box<dyn Op>>) -> Result<Self, CompositionError> {
        let first_mode = match children.first() {
            Some(first) => first.async_mode(),
            None => return Err(CompositionError::Empty("Parallel")),
        };
        if children.iter().any(|c| c.async_mode() != first_mode) {
            return Err(CompositionError::MixedAsyncMode {
                combinator: "Parallel",
            });
        }
        Ok(Self {
            base: OpBase::bare("Parallel").with_async_mode(first_mode),
            children,
        })
    }

    pub fn with_raise_on_failure(mut self, raise_on_failure: bool) -> Self {
        self.base = self.base.with_raise_on_failure(raise_on_failure);
        self
    }

    pub fn children(&self) -> &[Box<dyn Op>] {
        &self.children
    }
}

#[async_trait]
impl Op for ParallelOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    fn combinator(&self) -> Combinator {
        Combinator::Parallel
    }

    async fn async_execute(&self, ctx: &Context, _inputs: &OpArgs) -> Result<Value, FlowError> {
        let mut group = TaskGroup::new(ctx.cancellation());
        for child in &self.children {
            // Shared sub-ops must not share mutable state across concurrent
            // executions: every task runs a deep copy.
            let copy = child.copy_op();
            let child_ctx = ctx.clone();
            group.submit(async move { runtime::invoke(copy.as_ref(), &child_ctx, OpArgs::new()).await });
        }

        // raise_on_failure=true: the first error cancels the siblings and
        // propagates out of join once they settle.
        let results = group.join(None, !self.raise_on_failure()).await?;

        let mut aggregated = Vec::with_capacity(results.len());
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(value) => aggregated.push(value),
                Err(err) => {
                    tracing::warn!(
                        child = %self.children[index].name(),
                        error = %err,
                        "parallel child failed; substituting default output"
                    );
                    aggregated.push(self.children[index].default_output());
                }
            }
        }
        Ok(Value::Array(aggregated))
    }

    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
            children: self.children.iter().map(|c| c.copy_op()).collect(),
        })
    }

    fn take_children(&mut self) -> Vec<Box<dyn Op>> {
        std::mem::take(&mut self.children)
    }

    fn to_expr(&self) -> String {
        self.children
            .iter()
            .map(|child| match child.combinator() {
                // `>>` binds looser than `|`; a Sequential child needs parens.
                Combinator::Sequential => format!("({})", child.to_expr()),
                Combinator::Parallel => format!("({})", child.to_expr()),
                Combinator::Leaf => child.to_expr(),
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
