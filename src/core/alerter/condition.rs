// src/core/alerter/condition.rs

//! The alert condition grammar: `scope.field OP value`, exactly three
//! whitespace-separated tokens, parsed once at rule-compile time.

use crate::core::errors::AgentError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Host,
    Container,
    Log,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Host => "host",
            Scope::Container => "container",
            Scope::Log => "log",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Operator {
    fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Ge),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Le),
            "==" => Some(Operator::Eq),
            "!=" => Some(Operator::Ne),
            _ => None,
        }
    }

    fn is_equality_only(self) -> bool {
        matches!(self, Operator::Eq | Operator::Ne)
    }

    fn apply_numeric(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }

    fn apply_string(self, lhs: &str, rhs: &str) -> bool {
        match self {
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
}

/// Whether a field's value is numeric or string-typed, and which operators
/// it may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Numeric,
    Str,
}

fn field_kind(scope: Scope, field: &str) -> Option<FieldKind> {
    match (scope, field) {
        (Scope::Host, "cpu_percent" | "memory_percent" | "disk_percent" | "swap_percent" | "load1" | "load5" | "load15") => {
            Some(FieldKind::Numeric)
        }
        (Scope::Container, "cpu_percent" | "memory_percent" | "restart_count" | "exit_code") => Some(FieldKind::Numeric),
        (Scope::Container, "state" | "health") => Some(FieldKind::Str),
        (Scope::Log, "count") => Some(FieldKind::Numeric),
        _ => None,
    }
}

/// A fully parsed and validated alert condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub scope: Scope,
    pub field: String,
    pub op: Operator,
    pub value: Literal,
    source: String,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Condition {
    /// Parses `scope.field OP value`. Rejects unknown scopes/fields, bad
    /// operators, and operator/type mismatches (e.g. `>` on a string field).
    pub fn parse(input: &str) -> Result<Self, AgentError> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        if tokens.len() != 3 {
            return Err(AgentError::InvalidCondition(format!(
                "expected exactly 3 tokens \"scope.field OP value\", got {}: {input:?}",
                tokens.len()
            )));
        }
        let (scope_field, op_str, value_str) = (tokens[0], tokens[1], tokens[2]);

        let (scope_str, field) = scope_field
            .split_once('.')
            .ok_or_else(|| AgentError::InvalidCondition(format!("missing 'scope.field' in {scope_field:?}")))?;
        let scope = match scope_str {
            "host" => Scope::Host,
            "container" => Scope::Container,
            "log" => Scope::Log,
            other => return Err(AgentError::InvalidCondition(format!("unknown scope {other:?}"))),
        };

        let kind = field_kind(scope, field)
            .ok_or_else(|| AgentError::InvalidCondition(format!("unknown field {field:?} for scope {scope}")))?;

        let op = Operator::parse(op_str)
            .ok_or_else(|| AgentError::InvalidCondition(format!("unknown operator {op_str:?}")))?;

        let value = match kind {
            FieldKind::Numeric => {
                let n: f64 = value_str
                    .parse()
                    .map_err(|_| AgentError::InvalidCondition(format!("expected numeric literal, got {value_str:?}")))?;
                Literal::Number(n)
            }
            FieldKind::Str => {
                if !op.is_equality_only() {
                    return Err(AgentError::InvalidCondition(format!(
                        "string field {field:?} only supports == and !=, got {op_str:?}"
                    )));
                }
                let quoted = value_str
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .ok_or_else(|| AgentError::InvalidCondition(format!("expected single-quoted string, got {value_str:?}")))?;
                Literal::Str(quoted.to_string())
            }
        };

        Ok(Condition {
            scope,
            field: field.to_string(),
            op,
            value,
            source: input.to_string(),
        })
    }

    pub fn is_log(&self) -> bool {
        self.scope == Scope::Log
    }

    /// Evaluates against a numeric field value.
    pub fn eval_numeric(&self, actual: f64) -> bool {
        match &self.value {
            Literal::Number(expected) => self.op.apply_numeric(actual, *expected),
            Literal::Str(_) => false,
        }
    }

    /// Evaluates against a string field value.
    pub fn eval_string(&self, actual: &str) -> bool {
        match &self.value {
            Literal::Str(expected) => self.op.apply_string(actual, expected),
            Literal::Number(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_condition() {
        let c = Condition::parse("container.cpu_percent > 80").unwrap();
        assert_eq!(c.scope, Scope::Container);
        assert_eq!(c.field, "cpu_percent");
        assert!(c.eval_numeric(95.0));
        assert!(!c.eval_numeric(10.0));
    }

    #[test]
    fn parses_string_condition() {
        let c = Condition::parse("container.state == 'exited'").unwrap();
        assert!(c.eval_string("exited"));
        assert!(!c.eval_string("running"));
    }

    #[test]
    fn rejects_string_ordering_operator() {
        assert!(Condition::parse("container.state > 'exited'").is_err());
    }

    #[test]
    fn rejects_unknown_field() {
        assert!(Condition::parse("host.nonexistent > 1").is_err());
    }

    #[test]
    fn rejects_wrong_token_count() {
        assert!(Condition::parse("host.cpu_percent>80").is_err());
    }
}
