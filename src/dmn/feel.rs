//! FEEL Fragment Parser
//!
//! Recognizes the decision-table cell subset: quoted literals, unary
//! comparisons, `[a..b]` ranges, `[a, b, c]` lists and the `-` wildcard.
//! One fragment per cell; anything outside the subset is rejected so a
//! malformed table fails at compile time rather than silently never
//! matching.

use crate::model::Operator;
use crate::value::Value;

/// A parsed cell: either the always-true wildcard or an operator/constant
/// pair ready to compile.
#[derive(Debug, Clone, PartialEq)]
pub enum FeelTerm {
    /// `-`: matches everything, contributes no constraint
    Wildcard,
    /// A concrete comparison
    Predicate {
        /// Comparison operator
        operator: Operator,
        /// Parsed constant
        constant: Value,
    },
}

/// Parse one FEEL cell fragment.
///
/// Returns `None` when the fragment is not in the supported subset.
pub fn parse(fragment: &str) -> Option<FeelTerm> {
    let cell = fragment.trim();

    if cell.is_empty() || cell == "-" {
        return Some(FeelTerm::Wildcard);
    }

    // "literal" → equality against the unquoted string
    if let Some(literal) = unquote(cell) {
        return Some(FeelTerm::Predicate {
            operator: Operator::Equal,
            constant: Value::Str(literal.to_string()),
        });
    }

    // Unary comparisons: > N, >= N, < N, <= N
    for (prefix, operator) in [
        (">=", Operator::GreaterThanOrEqual),
        ("<=", Operator::LessThanOrEqual),
        (">", Operator::GreaterThan),
        ("<", Operator::LessThan),
    ] {
        if let Some(rest) = cell.strip_prefix(prefix) {
            let bound = parse_number(rest.trim())?;
            return Some(FeelTerm::Predicate {
                operator,
                constant: bound,
            });
        }
    }

    // [a..b] range or [a, b, c] list
    if let Some(inner) = cell.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if let Some((lo, hi)) = inner.split_once("..") {
            let lo = parse_number(lo.trim())?;
            let hi = parse_number(hi.trim())?;
            return Some(FeelTerm::Predicate {
                operator: Operator::Range,
                constant: Value::List(vec![lo, hi]),
            });
        }
        let items: Option<Vec<Value>> = inner
            .split(',')
            .map(|item| parse_scalar(item.trim()))
            .collect();
        return Some(FeelTerm::Predicate {
            operator: Operator::In,
            constant: Value::List(items?),
        });
    }

    // Bare number → numeric equality
    if let Some(number) = parse_number(cell) {
        return Some(FeelTerm::Predicate {
            operator: Operator::Equal,
            constant: number,
        });
    }

    None
}

/// Strip matching double quotes, if present.
pub fn unquote(cell: &str) -> Option<&str> {
    cell.strip_prefix('"').and_then(|s| s.strip_suffix('"'))
}

/// Output literals keep their quoted form optional: `"wood"` and `wood`
/// both enrich as the string `wood`.
pub fn output_literal(cell: &str) -> String {
    let cell = cell.trim();
    unquote(cell).unwrap_or(cell).to_string()
}

fn parse_number(s: &str) -> Option<Value> {
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Int(i));
    }
    s.parse::<f64>().ok().map(Value::Float)
}

fn parse_scalar(s: &str) -> Option<Value> {
    if let Some(literal) = unquote(s) {
        return Some(Value::Str(literal.to_string()));
    }
    parse_number(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard() {
        assert_eq!(parse("-"), Some(FeelTerm::Wildcard));
        assert_eq!(parse("  "), Some(FeelTerm::Wildcard));
    }

    #[test]
    fn test_quoted_literal() {
        assert_eq!(
            parse("\"giap\""),
            Some(FeelTerm::Predicate {
                operator: Operator::Equal,
                constant: Value::from("giap")
            })
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(
            parse(">= 18"),
            Some(FeelTerm::Predicate {
                operator: Operator::GreaterThanOrEqual,
                constant: Value::Int(18)
            })
        );
        assert_eq!(
            parse("< 2.5"),
            Some(FeelTerm::Predicate {
                operator: Operator::LessThan,
                constant: Value::Float(2.5)
            })
        );
    }

    #[test]
    fn test_range_and_list() {
        assert_eq!(
            parse("[18..65]"),
            Some(FeelTerm::Predicate {
                operator: Operator::Range,
                constant: Value::List(vec![Value::Int(18), Value::Int(65)])
            })
        );
        assert_eq!(
            parse("[\"a\", \"b\", 3]"),
            Some(FeelTerm::Predicate {
                operator: Operator::In,
                constant: Value::List(vec![Value::from("a"), Value::from("b"), Value::Int(3)])
            })
        );
    }

    #[test]
    fn test_bare_number_equality() {
        assert_eq!(
            parse("42"),
            Some(FeelTerm::Predicate {
                operator: Operator::Equal,
                constant: Value::Int(42)
            })
        );
    }

    #[test]
    fn test_unsupported_fragments() {
        assert_eq!(parse("not(\"x\")"), None);
        assert_eq!(parse("> abc"), None);
        assert_eq!(parse("[1..x]"), None);
    }

    #[test]
    fn test_output_literal_unquoting() {
        assert_eq!(output_literal("\"wood\""), "wood");
        assert_eq!(output_literal("wood"), "wood");
        assert_eq!(output_literal(" Y "), "Y");
    }
}
