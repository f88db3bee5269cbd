//! Resource name sanitization
//!
//! Two kinds of names come out of here:
//! - **runtime names** ([`build_runtime_name`]) become cloud resource names and
//!   may embed late-bound values; the sanitizer is expressed with the same
//!   string functions the execution engine evaluates, so it works on values
//!   nobody knows yet.
//! - **graph-node ids** ([`build_graph_node_id`]) must be concrete while the
//!   graph is assembled; a late-bound part is an [`Error::UnresolvedValue`].

use crate::expr::Expr;
use crate::{Error, Result};

/// Token substituted for `*` in names
pub const WILDCARD_TOKEN: &str = "wildcard";

/// Name used when the input sanitizes to nothing
pub const FALLBACK_NAME: &str = "resource";

const DISALLOWED_CHARS: &str = "/[^A-Za-z0-9-]/";
const DASH_RUNS: &str = "/-{2,}/";

/// Sanitize a concrete string
///
/// `*` becomes `wildcard`, anything outside `[A-Za-z0-9-]` becomes `-`, runs
/// of `-` collapse, leading and trailing `-` are trimmed. Empty results fall
/// back to `resource`.
pub fn sanitize(raw: &str) -> String {
    match sanitize_expr(&Expr::lit(raw)) {
        Expr::Literal(s) => s,
        // literal input always folds; kept total for the type checker
        deferred => deferred.to_template(),
    }
}

/// Sanitize a possibly late-bound value
pub fn sanitize_expr(raw: &Expr) -> Expr {
    let named = Expr::replace(raw.clone(), "*", WILDCARD_TOKEN);
    let named = Expr::replace(named, DISALLOWED_CHARS, "-");
    let named = Expr::replace(named, DASH_RUNS, "-");
    let named = Expr::trim(named, "-");
    Expr::coalesce(vec![named, Expr::lit(FALLBACK_NAME)])
}

/// Build a runtime resource name from ordered parts joined with `-`
pub fn build_runtime_name(parts: &[Expr]) -> Expr {
    Expr::join("-", parts.iter().map(sanitize_expr).collect())
}

/// Build a graph-node id; every part must be known now
pub fn build_graph_node_id(parts: &[Expr], suffix: Option<&str>) -> Result<String> {
    let mut segments = Vec::with_capacity(parts.len() + 1);
    for part in parts {
        let value = part
            .as_literal()
            .ok_or_else(|| Error::unresolved("graph node id", part.to_template()))?;
        segments.push(sanitize(value));
    }
    if let Some(suffix) = suffix {
        segments.push(sanitize(suffix));
    }
    Ok(segments.join("-"))
}

/// Graph-node id from string parts, which are always concrete
pub fn node_id(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| sanitize(p))
        .collect::<Vec<_>>()
        .join("-")
}
