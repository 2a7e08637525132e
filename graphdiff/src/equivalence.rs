//! Property-map equivalence with volatile fields ignored.
//!
//! Equality is strict on purpose: a float printed differently, a number
//! stored as a string or a property set to null on one side only are all
//! real differences.

use std::collections::BTreeSet;

use crate::query::PropertyMap;

/// Audit and timestamp fields that legitimately differ between loads.
pub const VOLATILE_FIELDS: &[&str] = &[
    "updated_at",
    "created_at",
    "modified_at",
    "timestamp",
    "last_updated",
    "last_modified",
];

pub fn is_volatile(field: &str) -> bool {
    VOLATILE_FIELDS.contains(&field)
}

/// Copy of `props` without volatile fields.
pub fn strip_volatile(props: &PropertyMap) -> PropertyMap {
    props
        .iter()
        .filter(|(field, _)| !is_volatile(field))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

/// Whether two records describe the same entity.
///
/// Two absent records are equivalent; an absent and a present one are not.
pub fn equivalent(a: Option<&PropertyMap>, b: Option<&PropertyMap>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => strip_volatile(a) == strip_volatile(b),
        _ => false,
    }
}

/// Non-volatile fields whose values differ, including fields present on one side only.
pub fn changed_fields(a: &PropertyMap, b: &PropertyMap) -> Vec<String> {
    let fields: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    fields
        .into_iter()
        .filter(|field| !is_volatile(field))
        .filter(|field| a.get(field.as_str()) != b.get(field.as_str()))
        .cloned()
        .collect()
}
