//! Plain-text formula scanning
//!
//! `X = 4` defines `X` with value `4`; identifiers on the right-hand side, or
//! anywhere in an expression without a definition, are uses. Comparison
//! operators (`==`, `<=`, `>=`, `!=`) are not definitions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z][A-Za-z0-9_]*").expect("identifier pattern is valid")
});

/// Names that never count as symbols
const RESERVED: &[&str] = &[
    "sin", "cos", "tan", "cot", "sec", "csc", "asin", "acos", "atan", "sinh", "cosh", "tanh",
    "exp", "log", "ln", "sqrt", "abs", "floor", "ceil", "min", "max", "pi",
];

/// A symbol defined by a formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Symbol name
    pub name: String,
    /// Right-hand side text, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Symbols a formula defines and uses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormulaSymbols {
    /// Defined symbol, if the formula is a definition
    pub definition: Option<Definition>,
    /// Used symbols in order of first appearance
    pub uses: Vec<String>,
}

impl FormulaSymbols {
    /// Scan formula `text`
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let (definition, expression) = match split_definition(text) {
            Some((name, rhs)) => {
                let value = Some(rhs.to_string()).filter(|v| !v.is_empty());
                (Some(Definition { name, value }), rhs)
            }
            None => (None, text),
        };

        let mut uses: Vec<String> = Vec::new();
        for found in IDENTIFIER.find_iter(expression) {
            let name = found.as_str();
            if is_reserved(name) || uses.iter().any(|u| u == name) {
                continue;
            }
            uses.push(name.to_string());
        }
        Self { definition, uses }
    }

    /// Check if the formula neither defines nor uses anything
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definition.is_none() && self.uses.is_empty()
    }
}

fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

/// `(name, rhs)` when `text` is `identifier = rhs`
fn split_definition(text: &str) -> Option<(String, &str)> {
    let bytes = text.as_bytes();
    let at = bytes.iter().enumerate().position(|(i, &b)| {
        b == b'='
            && !matches!(i.checked_sub(1).map(|p| bytes[p]), Some(b'<' | b'>' | b'!' | b'='))
            && bytes.get(i + 1) != Some(&b'=')
    })?;

    let lhs = text[..at].trim();
    let whole = IDENTIFIER.find(lhs)?;
    if whole.start() != 0 || whole.end() != lhs.len() || is_reserved(lhs) {
        return None;
    }
    Some((lhs.to_string(), text[at + 1..].trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn uses(text: &str) -> Vec<String> {
        FormulaSymbols::parse(text).uses
    }

    #[test]
    fn definition_with_constant() {
        let symbols = FormulaSymbols::parse("X = 4");
        assert_eq!(
            symbols.definition,
            Some(Definition {
                name: "X".to_string(),
                value: Some("4".to_string()),
            })
        );
        assert!(symbols.uses.is_empty());
    }

    #[test]
    fn definition_uses_right_hand_side() {
        let symbols = FormulaSymbols::parse("Y = X^2 + sin(theta)");
        assert_eq!(symbols.definition.map(|d| d.name), Some("Y".to_string()));
        assert_eq!(symbols.uses, vec!["X", "theta"]);
    }

    #[test]
    fn expression_uses_every_identifier_once() {
        assert_eq!(uses("X + Y * X"), vec!["X", "Y"]);
        assert_eq!(uses("2x + 3"), vec!["x"]);
    }

    #[test]
    fn comparisons_are_not_definitions() {
        for text in ["X == 4", "X <= 4", "X >= Y", "X != 4"] {
            let symbols = FormulaSymbols::parse(text);
            assert!(symbols.definition.is_none(), "{text}");
            assert!(symbols.uses.contains(&"X".to_string()), "{text}");
        }
    }

    #[test]
    fn compound_left_side_is_not_a_definition() {
        let symbols = FormulaSymbols::parse("X + 1 = Y");
        assert!(symbols.definition.is_none());
        assert_eq!(symbols.uses, vec!["X", "Y"]);
        assert!(FormulaSymbols::parse("sqrt = 2").definition.is_none());
    }

    #[test]
    fn self_reference_is_a_use() {
        let symbols = FormulaSymbols::parse("X = X + 1");
        assert_eq!(symbols.definition.map(|d| d.name), Some("X".to_string()));
        assert_eq!(symbols.uses, vec!["X"]);
    }

    #[test]
    fn empty_and_numeric_formulas() {
        assert!(FormulaSymbols::parse("").is_empty());
        assert!(FormulaSymbols::parse("1 + 2").is_empty());
        let bare = FormulaSymbols::parse("X =");
        assert_eq!(bare.definition.and_then(|d| d.value), None);
    }
}
