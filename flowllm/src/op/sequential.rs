//! Sequential combinator (`A >> B`): children run in declared order on the
//! shared context; the first failure stops the chain; the last child's
//! output is the node's output.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::Context;
use crate::error::FlowError;
use crate::op::{runtime, Combinator, CompositionError, Op, OpArgs, OpBase};

pub struct SequentialOp {
    base: OpBase,
    children: Vec<Box<dyn Op>>,
}

impl SequentialOp {
    /// Builds a sequential node. Children must agree on `async_mode`;
    /// an empty child list is rejected.
    pub fn new(children: Vec<Box<dyn Op>>) -> Result<Self, CompositionError> {
        let first_mode = match children.first() {
            Some(first) => first.async_mode(),
            None => return Err(CompositionError::Empty("Sequential")),
        };
        if children.iter().any(|c| c.async_mode() != first_mode) {
            return Err(CompositionError::MixedAsyncMode {
                combinator: "Sequential",
            });
        }
        Ok(Self {
            base: OpBase::bare("Sequential").with_async_mode(first_mode),
            children,
        })
    }

    pub fn children(&self) -> &[Box<dyn Op>] {
        &self.children
    }
}

#[async_trait]
impl Op for SequentialOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    fn combinator(&self) -> Combinator {
        Combinator::Sequential
    }

    async fn async_execute(&self, ctx: &Context, _inputs: &OpArgs) -> Result<Value, FlowError> {
        let mut last = Value::Null;
        for child in &self.children {
            last = runtime::invoke(child.as_ref(), ctx, OpArgs::new()).await?;
        }
        Ok(last)
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
                // A nested Sequential only survives explicit parentheses.
                Combinator::Sequential => format!("({})", child.to_expr()),
                _ => child.to_expr(),
            })
            .collect::<Vec<_>>()
            .join(" >> ")
    }
}
