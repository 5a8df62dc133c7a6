//! Label selector parsing and matching
//!
//! Parses Kubernetes label selector strings into `kube::core::Selector` so
//! listers and list/watch sources can filter cached objects.
//!
//! Supported syntax:
//! - Equality: `key=value` or `key==value`
//! - Inequality: `key!=value`
//! - Set-based: `key in (value1,value2)` or `key notin (value1,value2)`
//! - Existence: `key` or `!key`
//! - Requirements joined by commas are ANDed: `key1=value1,key2 in (v2,v3)`

use crate::{Error, Result};
use kube::core::{Expression, Selector, SelectorExt};
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};

/// Split on commas that are not inside a parenthesised value set.
fn split_requirements(selector: &str) -> Result<Vec<&str>> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut depth = 0i32;

    for (i, ch) in selector.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(Error::InvalidSelector(format!(
                        "unbalanced parentheses in {:?}",
                        selector
                    )));
                }
            }
            ',' if depth == 0 => {
                result.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(Error::InvalidSelector(format!(
            "unbalanced parentheses in {:?}",
            selector
        )));
    }
    result.push(&selector[start..]);
    Ok(result)
}

fn parse_value_set(requirement: &str, rest: &str) -> Result<BTreeSet<String>> {
    let rest = rest.trim();
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| Error::InvalidSelector(format!("expected value set in {:?}", requirement)))?;

    let values: BTreeSet<String> = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(Error::InvalidSelector(format!(
            "empty value set in {:?}",
            requirement
        )));
    }
    Ok(values)
}

fn checked_key<'a>(requirement: &str, key: &'a str) -> Result<&'a str> {
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(Error::InvalidSelector(format!(
            "invalid label key in {:?}",
            requirement
        )));
    }
    Ok(key)
}

fn parse_requirement(requirement: &str) -> Result<Expression> {
    if let Some((key, rest)) = requirement.split_once(" notin ") {
        let key = checked_key(requirement, key)?;
        return Ok(Expression::NotIn(key.to_string(), parse_value_set(requirement, rest)?));
    }
    if let Some((key, rest)) = requirement.split_once(" in ") {
        let key = checked_key(requirement, key)?;
        return Ok(Expression::In(key.to_string(), parse_value_set(requirement, rest)?));
    }
    if let Some(key) = requirement.strip_prefix('!') {
        let key = checked_key(requirement, key)?;
        return Ok(Expression::DoesNotExist(key.to_string()));
    }

    // `!=` must be tried before `==` and `=`.
    for (op, negate) in [("!=", true), ("==", false), ("=", false)] {
        if let Some((key, value)) = requirement.split_once(op) {
            let key = checked_key(requirement, key)?;
            let value = value.trim().to_string();
            return Ok(if negate {
                Expression::NotEqual(key.to_string(), value)
            } else {
                Expression::Equal(key.to_string(), value)
            });
        }
    }

    let key = checked_key(requirement, requirement)?;
    Ok(Expression::Exists(key.to_string()))
}

/// Parse a label selector string. An empty string selects everything.
///
/// ```
/// use kube_shared_informer::label_selector::parse_label_selector;
///
/// let selector = parse_label_selector("app=myapp,env in (production,staging)").unwrap();
/// ```
pub fn parse_label_selector(selector: &str) -> Result<Selector> {
    if selector.trim().is_empty() {
        return Ok(Selector::default());
    }

    let mut expressions = Vec::new();
    for requirement in split_requirements(selector)? {
        let requirement = requirement.trim();
        if requirement.is_empty() {
            return Err(Error::InvalidSelector(format!(
                "empty requirement in {:?}",
                selector
            )));
        }
        expressions.push(parse_requirement(requirement)?);
    }

    Ok(Selector::from_iter(expressions))
}

/// Match a label map against a selector string.
///
/// ```
/// use std::collections::BTreeMap;
/// use kube_shared_informer::label_selector::matches_label_selector;
///
/// let labels = BTreeMap::from([("app".to_string(), "myapp".to_string())]);
/// assert!(matches_label_selector(&labels, "app=myapp").unwrap());
/// assert!(!matches_label_selector(&labels, "app=other").unwrap());
/// ```
pub fn matches_label_selector(labels: &BTreeMap<String, String>, selector: &str) -> Result<bool> {
    Ok(parse_label_selector(selector)?.matches(labels))
}

/// Whether an object's labels satisfy `selector`. Objects without labels are
/// treated as having an empty label set.
pub fn object_matches<K: Resource>(obj: &K, selector: &Selector) -> bool {
    selector.matches(obj.labels())
}
