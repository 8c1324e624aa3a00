//! MathNB Symbol Analysis
//!
//! Derives symbol structure from the ordered notebook:
//! - [`SymbolExtractor`]: formula text to SYMBOL-DEFINITION / SYMBOL-USE children
//! - [`DependencyAnalyzer`]: dependency, duplicate-definition and equivalence
//!   relationships, maintained incrementally
//! - [`recompute_all`]: the same relationships derived from scratch
//!
//! Both analyzers are registered on one observer by [`symbol_observer`].
//!
//! # Example
//!
//! ```rust
//! use mathnb_symbol::FormulaSymbols;
//!
//! let symbols = FormulaSymbols::parse("Y = X^2");
//! assert_eq!(symbols.definition.unwrap().name, "Y");
//! assert_eq!(symbols.uses, vec!["X"]);
//! ```

#![warn(unreachable_pub)]

mod dependency;
mod extract;
mod formula;

pub use dependency::{current_links, recompute_all, reconcile, DependencyAnalyzer, DerivedLink, LinkKey};
pub use extract::{formula_pattern, SymbolExtractor};
pub use formula::{Definition, FormulaSymbols};

use mathnb_rules::Observer;

/// Name of the symbol observer; `source` of the nodes it derives
pub const SYMBOL_OBSERVER: &str = "SYMBOLS";

/// Observer running symbol extraction, then dependency analysis
#[must_use]
pub fn symbol_observer() -> Observer {
    Observer::new(SYMBOL_OBSERVER)
        .with_analyzer(SymbolExtractor)
        .with_analyzer(DependencyAnalyzer)
}
