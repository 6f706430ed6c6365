//! Guard conditions merged into every poll filter.
//!
//! A condition pairs an `expression` with a `statement` and renders as
//! `(NOT expression) OR statement`: the statement only has to hold for rows where the
//! expression holds. The negation is built by flipping the expression's operator, which
//! keeps the clause index-friendly instead of wrapping it in `NOT (...)`.

use serde::{Deserialize, Serialize};

use super::{Clause, Operator, Predicate};
use crate::error::{NotifierError, Result};

/// Logical negation of a comparison operator
///
/// Only the six ordering operators have a negation here; anything else is a usage error.
pub fn negate_operator(operator: Operator) -> Result<Operator> {
    let negated = match operator {
        Operator::Eq => Operator::Ne,
        Operator::Ne => Operator::Eq,
        Operator::Lt => Operator::Gte,
        Operator::Gte => Operator::Lt,
        Operator::Lte => Operator::Gt,
        Operator::Gt => Operator::Lte,
        other => {
            return Err(NotifierError::invalid_argument(format!(
                "operator '{other}' has no negation; use one of =, <>, <, <=, >, >="
            )))
        }
    };
    Ok(negated)
}

/// `(NOT expression) OR statement`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    expression: Predicate,
    statement: Predicate,
    negated_expression: Predicate,
}

impl Condition {
    /// Fails when the expression's operator cannot be negated
    pub fn new(expression: Predicate, statement: Predicate) -> Result<Self> {
        let negated_expression = Predicate {
            operator: negate_operator(expression.operator)?,
            ..expression.clone()
        };
        Ok(Self {
            expression,
            statement,
            negated_expression,
        })
    }

    pub fn expression(&self) -> &Predicate {
        &self.expression
    }

    pub fn statement(&self) -> &Predicate {
        &self.statement
    }

    pub fn to_clause(&self) -> Clause {
        Clause::AnyOf(vec![
            Clause::Compare(self.negated_expression.clone()),
            Clause::Compare(self.statement.clone()),
        ])
    }
}

impl From<&Condition> for Clause {
    fn from(condition: &Condition) -> Self {
        condition.to_clause()
    }
}
