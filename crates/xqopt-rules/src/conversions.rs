//! Redundant-conversion removal for `treat`, `promote`, `fn:data`, and
//! `fn:boolean`.
//!
//! A wrapper is dropped when the static type of its operand is already a
//! subtype of what the wrapper would produce. Promotion is never dropped for
//! double, float, or string, where it is not the identity even when the
//! declared types agree.

use xqopt_core::error::Result;
use xqopt_core::expr::{Expr, FunctionCall, FunctionId};
use xqopt_core::graph::OperatorGraph;
use xqopt_core::id::SlotId;
use xqopt_core::types::{ItemType, SequenceType};

use crate::rule::{Rewrite, RewriteContext, Rule};
use crate::toolbox::{rewrite_node_calls, type_argument};

pub struct RemoveRedundantConversion {
    name: &'static str,
    function: FunctionId,
}

impl RemoveRedundantConversion {
    pub fn treat() -> Self {
        Self {
            name: "remove-redundant-treat",
            function: FunctionId::Treat,
        }
    }

    pub fn promote() -> Self {
        Self {
            name: "remove-redundant-promote",
            function: FunctionId::Promote,
        }
    }

    pub fn data() -> Self {
        Self {
            name: "remove-redundant-data",
            function: FunctionId::Data,
        }
    }

    pub fn boolean() -> Self {
        Self {
            name: "remove-redundant-boolean",
            function: FunctionId::Boolean,
        }
    }

    fn target_type(
        &self,
        call: &FunctionCall,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<SequenceType>> {
        match self.function {
            FunctionId::Treat | FunctionId::Promote => type_argument(cx.types, call),
            FunctionId::Data => Ok(Some(SequenceType::star(ItemType::AnyAtomic))),
            FunctionId::Boolean => Ok(Some(SequenceType::one(ItemType::Boolean))),
            _ => Ok(None),
        }
    }

    fn unwrap(
        &self,
        graph: &OperatorGraph,
        call: &FunctionCall,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Expr>> {
        if call.function != self.function {
            return Ok(None);
        }
        let Some(operand) = call.args.first() else {
            return Ok(None);
        };
        let Some(target) = self.target_type(call, cx)? else {
            return Ok(None);
        };
        let Some(actual) = cx.static_type(graph, operand)? else {
            return Ok(None);
        };
        if self.function == FunctionId::Promote
            && [target.item, actual.item]
                .iter()
                .any(|t| matches!(t, ItemType::Double | ItemType::Float | ItemType::String))
        {
            return Ok(None);
        }
        if cx.types.is_subtype(&actual, &target) {
            Ok(Some(operand.clone()))
        } else {
            Ok(None)
        }
    }
}

impl Rule for RemoveRedundantConversion {
    fn name(&self) -> &'static str {
        self.name
    }

    fn rewrite_post(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        let spec = rewrite_node_calls(graph, node, cx, &mut |call, cx| {
            self.unwrap(graph, call, cx)
        })?;
        Ok(spec.map(|s| Rewrite::replace(slot, s)))
    }
}
