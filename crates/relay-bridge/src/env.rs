// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Child environment sanitization

/// Return `base` without the variables named by `denylist`.
///
/// Entries ending in `*` match by prefix, everything else must match exactly.
/// Pure: the caller's environment is never touched, so concurrent invocations
/// cannot observe each other's adjustments.
pub fn sanitize_environment<I, K, V>(base: I, denylist: &[String]) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    base.into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .filter(|(name, _)| !is_denied(name, denylist))
        .collect()
}

fn is_denied(name: &str, denylist: &[String]) -> bool {
    denylist.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    })
}
