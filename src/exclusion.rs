//! Exclusion matching — domains where dark mode is forced off.
//!
//! DESIGN
//! ======
//! Matching is exact or suffix anchored at a label boundary (the literal
//! dot), so `mail.example.com` matches an `example.com` entry but
//! `notexample.com` does not. No wildcards, no regex, no case folding;
//! entries are compared as the user typed them.
//!
//! URL parsing stays on the caller side: `hostname_of` is the one place
//! that turns a tab URL into a hostname, and a `None` from it means
//! "cannot determine exclusion" — callers log and skip, they never fail.

/// True iff `domain` equals an exclusion entry or is a subdomain of one.
#[must_use]
pub fn is_excluded(domain: &str, exclusions: &[String]) -> bool {
    exclusions
        .iter()
        .any(|entry| domain == entry || domain.ends_with(&format!(".{entry}")))
}

/// Extract the hostname from a tab URL, if it has one.
#[must_use]
pub fn hostname_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed.host_str().map(String::from)
}

// =============================================================================
// TESTS
// =============================================================================
