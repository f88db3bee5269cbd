//! Late-bound values
//!
//! Most values in the graph are known while it is being assembled (config
//! strings, derived names). Some are only known once the execution engine has
//! applied a node: the cluster endpoint, the OIDC issuer, the caller's account
//! id. [`Expr`] carries both kinds through the same APIs.
//!
//! Constructors fold constants: combining literals yields a literal, so an
//! expression stays [`Expr::Literal`] for as long as nothing late-bound is
//! involved. The string transforms (`replace`, `trim`, `coalesce`) use the
//! same code for folding and for [`Expr::evaluate`], which is what makes
//! naming commute with late binding.
//!
//! Deferred expressions render to `${...}` templates when embedded in JSON
//! documents, using the function names the execution engine understands
//! (`join`, `replace`, `trim`, `coalesce`, `base64decode`).

use std::collections::BTreeSet;
use std::fmt;

use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Reference to an attribute of another graph node
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttrRef {
    /// Graph-node id of the referenced node
    pub node: String,
    /// Attribute path on that node (e.g. "identity_oidc_issuer")
    pub attribute: String,
}

impl AttrRef {
    /// Dotted `node.attribute` form used in templates and state files
    pub fn key(&self) -> String {
        format!("{}.{}", self.node, self.attribute)
    }
}

/// A value that is either known now or resolved by the execution engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    /// Known at graph-construction time
    Literal(String),
    /// Resolved at apply time
    Deferred(Deferred),
}

/// A late-bound expression
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deferred {
    /// Attribute of another node
    Ref(AttrRef),
    /// Concatenation with a separator
    Join {
        /// Separator placed between parts
        separator: String,
        /// Parts to join
        parts: Vec<Expr>,
    },
    /// Replace every occurrence of `search`; `/.../` searches are regexes
    Replace {
        /// Input value
        input: Box<Expr>,
        /// Substring, or regex wrapped in slashes
        search: String,
        /// Replacement text
        replacement: String,
    },
    /// Strip any characters in `cutset` from both ends
    Trim {
        /// Input value
        input: Box<Expr>,
        /// Characters to strip
        cutset: String,
    },
    /// First non-empty value
    Coalesce(Vec<Expr>),
    /// Standard base64 decoding
    Base64Decode(Box<Expr>),
}

impl Expr {
    /// A literal value
    pub fn lit(value: impl Into<String>) -> Self {
        Expr::Literal(value.into())
    }

    /// A reference to `node.attribute`
    pub fn reference(node: impl Into<String>, attribute: impl Into<String>) -> Self {
        Expr::Deferred(Deferred::Ref(AttrRef {
            node: node.into(),
            attribute: attribute.into(),
        }))
    }

    /// Join parts with a separator
    pub fn join(separator: &str, parts: Vec<Expr>) -> Self {
        if let Some(literals) = all_literals(&parts) {
            return Expr::Literal(literals.join(separator));
        }
        Expr::Deferred(Deferred::Join {
            separator: separator.to_string(),
            parts,
        })
    }

    /// Concatenate parts without separator
    pub fn concat(parts: Vec<Expr>) -> Self {
        Self::join("", parts)
    }

    /// Replace every match of `search` with `replacement`
    pub fn replace(input: Expr, search: &str, replacement: &str) -> Self {
        match input {
            Expr::Literal(s) => Expr::Literal(apply_replace(&s, search, replacement)),
            other => Expr::Deferred(Deferred::Replace {
                input: Box::new(other),
                search: search.to_string(),
                replacement: replacement.to_string(),
            }),
        }
    }

    /// Strip `cutset` characters from both ends
    pub fn trim(input: Expr, cutset: &str) -> Self {
        match input {
            Expr::Literal(s) => Expr::Literal(apply_trim(&s, cutset)),
            other => Expr::Deferred(Deferred::Trim {
                input: Box::new(other),
                cutset: cutset.to_string(),
            }),
        }
    }

    /// First non-empty of `parts`
    ///
    /// Folds as long as the leading parts are literals: an empty literal is
    /// skipped, a non-empty one wins.
    pub fn coalesce(parts: Vec<Expr>) -> Self {
        let mut remaining = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Expr::Literal(s) if remaining.is_empty() && s.is_empty() => continue,
                Expr::Literal(s) if remaining.is_empty() => return Expr::Literal(s),
                other => remaining.push(other),
            }
        }
        match remaining.len() {
            0 => Expr::Literal(String::new()),
            _ => Expr::Deferred(Deferred::Coalesce(remaining)),
        }
    }

    /// Base64-decode the input
    pub fn base64_decode(input: Expr) -> Self {
        if let Expr::Literal(ref s) = input {
            if let Some(decoded) = apply_base64_decode(s) {
                return Expr::Literal(decoded);
            }
        }
        Expr::Deferred(Deferred::Base64Decode(Box::new(input)))
    }

    /// The value if it is known at construction time
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(s) => Some(s),
            Expr::Deferred(_) => None,
        }
    }

    /// True when no part of the value is late-bound
    pub fn is_resolved(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    /// Render for embedding in a JSON document
    ///
    /// Literals render as themselves, deferred expressions as `${...}`.
    pub fn to_template(&self) -> String {
        match self {
            Expr::Literal(s) => s.clone(),
            Expr::Deferred(_) => format!("${{{}}}", self.expression()),
        }
    }

    /// Inner expression syntax (without the `${}` wrapper)
    fn expression(&self) -> String {
        match self {
            Expr::Literal(s) => quote(s),
            Expr::Deferred(d) => match d {
                Deferred::Ref(r) => r.key(),
                Deferred::Join { separator, parts } => format!(
                    "join({}, [{}])",
                    quote(separator),
                    render_list(parts)
                ),
                Deferred::Replace {
                    input,
                    search,
                    replacement,
                } => format!(
                    "replace({}, {}, {})",
                    input.expression(),
                    quote(search),
                    quote(replacement)
                ),
                Deferred::Trim { input, cutset } => {
                    format!("trim({}, {})", input.expression(), quote(cutset))
                }
                Deferred::Coalesce(parts) => format!("coalesce({})", render_list(parts)),
                Deferred::Base64Decode(input) => format!("base64decode({})", input.expression()),
            },
        }
    }

    /// Every node attribute this value reads
    pub fn references(&self) -> BTreeSet<&AttrRef> {
        let mut refs = BTreeSet::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut BTreeSet<&'a AttrRef>) {
        let Expr::Deferred(d) = self else {
            return;
        };
        match d {
            Deferred::Ref(r) => {
                out.insert(r);
            }
            Deferred::Join { parts, .. } | Deferred::Coalesce(parts) => {
                for part in parts {
                    part.collect_references(out);
                }
            }
            Deferred::Replace { input, .. }
            | Deferred::Trim { input, .. }
            | Deferred::Base64Decode(input) => input.collect_references(out),
        }
    }

    /// Evaluate with a resolver for node attributes
    ///
    /// Returns `None` if any referenced attribute cannot be resolved.
    pub fn evaluate(&self, resolve: &dyn Fn(&AttrRef) -> Option<String>) -> Option<String> {
        match self {
            Expr::Literal(s) => Some(s.clone()),
            Expr::Deferred(d) => match d {
                Deferred::Ref(r) => resolve(r),
                Deferred::Join { separator, parts } => parts
                    .iter()
                    .map(|p| p.evaluate(resolve))
                    .collect::<Option<Vec<_>>>()
                    .map(|v| v.join(separator)),
                Deferred::Replace {
                    input,
                    search,
                    replacement,
                } => input
                    .evaluate(resolve)
                    .map(|s| apply_replace(&s, search, replacement)),
                Deferred::Trim { input, cutset } => {
                    input.evaluate(resolve).map(|s| apply_trim(&s, cutset))
                }
                Deferred::Coalesce(parts) => {
                    for part in parts {
                        let value = part.evaluate(resolve)?;
                        if !value.is_empty() {
                            return Some(value);
                        }
                    }
                    Some(String::new())
                }
                Deferred::Base64Decode(input) => {
                    input.evaluate(resolve).and_then(|s| apply_base64_decode(&s))
                }
            },
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_template())
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(s.to_string())
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(s)
    }
}

impl From<&Expr> for serde_json::Value {
    fn from(e: &Expr) -> Self {
        serde_json::Value::String(e.to_template())
    }
}

fn all_literals(parts: &[Expr]) -> Option<Vec<&str>> {
    parts.iter().map(Expr::as_literal).collect()
}

fn render_list(parts: &[Expr]) -> String {
    parts
        .iter()
        .map(Expr::expression)
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn apply_replace(input: &str, search: &str, replacement: &str) -> String {
    if search.len() >= 2 && search.starts_with('/') && search.ends_with('/') {
        if let Ok(re) = Regex::new(&search[1..search.len() - 1]) {
            return re.replace_all(input, replacement).into_owned();
        }
    }
    input.replace(search, replacement)
}

fn apply_trim(input: &str, cutset: &str) -> String {
    input.trim_matches(|c| cutset.contains(c)).to_string()
}

fn apply_base64_decode(input: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(input).ok()?;
    String::from_utf8(bytes).ok()
}
