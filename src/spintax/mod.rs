//! Spintax template expansion.
//!
//! A template may contain variation groups of the form `{opt1|opt2|...}`.
//! Expansion replaces every group with one of its options, chosen uniformly
//! at random and independently per group. Text outside groups is copied
//! through byte for byte.
//!
//! Malformed input is never an error:
//! - an unterminated `{` or a stray `}` is literal text
//! - `{}` has no options and is literal text
//! - nested groups are resolved inside-out, so `{a|{b|c}}` yields one of
//!   `a`, `b` or `c`
//!
//! # Example
//!
//! ```ignore
//! let mut rng = StdRng::seed_from_u64(7);
//! let text = spintax::expand_with("Hello {friend|buddy|pal}!", &mut rng);
//! ```

use lazy_static::lazy_static;
use rand::Rng;
use regex::{Captures, Regex};
use serde::Serialize;

lazy_static! {
    /// Innermost variation group: braces around a non-empty, brace-free body.
    static ref GROUP: Regex = Regex::new(r"\{([^{}]+)\}").unwrap();
}

/// Stand-in for an already counted group when computing combinations.
const RESOLVED_MARKER: &str = "\u{0}";

/// Expand a template using the thread-local random source.
///
/// Every call is randomized independently; nothing is cached between calls.
pub fn expand(template: &str) -> String {
    expand_with(template, &mut rand::rng())
}

/// Expand a template using the supplied random source.
pub fn expand_with<R: Rng>(template: &str, rng: &mut R) -> String {
    if !GROUP.is_match(template) {
        return template.to_string();
    }

    let mut current = template.to_string();
    // Each pass removes at least one brace pair, so this terminates.
    while GROUP.is_match(&current) {
        current = GROUP
            .replace_all(&current, |caps: &Captures| {
                let options: Vec<&str> = caps[1].split('|').collect();
                options[rng.random_range(0..options.len())].to_string()
            })
            .into_owned();
    }
    current
}

/// Produce `count` independent expansions of the same template.
pub fn preview<R: Rng>(template: &str, count: usize, rng: &mut R) -> Vec<String> {
    (0..count).map(|_| expand_with(template, rng)).collect()
}

/// Shape of a template as seen by the expander
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateStats {
    /// Number of variation groups, nested ones included
    pub groups: usize,
    /// Upper bound on the number of distinct expansions (saturating)
    pub combinations: u64,
}

/// Count the variation groups of a template and the variants they allow.
pub fn analyze(template: &str) -> TemplateStats {
    let mut groups = 0usize;
    let mut combinations = 1u64;
    let mut current = template.to_string();

    while GROUP.is_match(&current) {
        current = GROUP
            .replace_all(&current, |caps: &Captures| {
                groups += 1;
                let options = caps[1].split('|').count() as u64;
                combinations = combinations.saturating_mul(options);
                RESOLVED_MARKER
            })
            .into_owned();
    }

    TemplateStats {
        groups,
        combinations,
    }
}
