//! Filter-formula builder
//!
//! Builds the `filterByFormula` expressions the store client sends on
//! searches. Literals are always quoted and escaped here so order data
//! containing quote characters cannot break out of the expression.

use std::fmt;

/// A composed filter expression ready to be sent as `filterByFormula`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula(String);

impl Formula {
    /// `{field} = 'value'` with the literal escaped.
    pub fn eq(field: &str, value: &str) -> Self {
        Formula(format!(
            "{{{}}} = '{}'",
            escape_field(field),
            escape_literal(value)
        ))
    }

    /// `AND(a, b)` conjunction of two predicates.
    pub fn and(self, other: Formula) -> Self {
        Formula(format!("AND({}, {})", self.0, other.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Escape a string literal for use inside single quotes.
fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Field names live inside `{}`; a closing brace would terminate the
/// reference early, so braces are stripped.
fn escape_field(field: &str) -> String {
    field.chars().filter(|c| *c != '{' && *c != '}').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_equality() {
        let formula = Formula::eq("Order ID", "100");
        assert_eq!(formula.as_str(), "{Order ID} = '100'");
    }

    #[test]
    fn conjunction() {
        let formula = Formula::eq("Order ID", "100").and(Formula::eq("Product", "Mug"));
        assert_eq!(
            formula.as_str(),
            "AND({Order ID} = '100', {Product} = 'Mug')"
        );
    }

    #[test]
    fn escapes_single_quotes_in_literals() {
        let formula = Formula::eq("Name", "O'Brien");
        assert_eq!(formula.as_str(), "{Name} = 'O\\'Brien'");
    }

    #[test]
    fn escapes_backslashes_before_quotes() {
        let formula = Formula::eq("Name", r"back\slash'");
        assert_eq!(formula.as_str(), "{Name} = 'back\\\\slash\\''");
    }

    #[test]
    fn injection_shaped_literal_stays_inert() {
        // A crafted product name must not terminate the quoted literal.
        let formula = Formula::eq("Product", "x') = '1', TRUE(), ('");
        assert_eq!(
            formula.as_str(),
            "{Product} = 'x\\') = \\'1\\', TRUE(), (\\''"
        );
    }

    #[test]
    fn braces_stripped_from_field_names() {
        let formula = Formula::eq("Ord}er", "1");
        assert_eq!(formula.as_str(), "{Order} = '1'");
    }
}
