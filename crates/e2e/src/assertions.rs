//! Containment checks shared by the browser and HTTP test cases

use crate::error::{E2eError, E2eResult};

/// One or more substrings to look for
pub trait Needles {
    fn needles(&self) -> Vec<&str>;
}

impl Needles for str {
    fn needles(&self) -> Vec<&str> {
        vec![self]
    }
}

impl Needles for String {
    fn needles(&self) -> Vec<&str> {
        vec![self.as_str()]
    }
}

impl<T: AsRef<str>> Needles for [T] {
    fn needles(&self) -> Vec<&str> {
        self.iter().map(AsRef::as_ref).collect()
    }
}

impl<T: AsRef<str>, const N: usize> Needles for [T; N] {
    fn needles(&self) -> Vec<&str> {
        self.iter().map(AsRef::as_ref).collect()
    }
}

impl<T: AsRef<str>> Needles for Vec<T> {
    fn needles(&self) -> Vec<&str> {
        self.iter().map(AsRef::as_ref).collect()
    }
}

impl<N: Needles + ?Sized> Needles for &N {
    fn needles(&self) -> Vec<&str> {
        (**self).needles()
    }
}

/// Fails on the first needle missing from `haystack`
pub fn contains_all<N: Needles + ?Sized>(haystack: &str, needles: &N, what: &str) -> E2eResult<()> {
    match needles.needles().into_iter().find(|n| !haystack.contains(n)) {
        Some(missing) => Err(E2eError::AssertionFailed(format!(
            "{} does not contain '{}'",
            what, missing
        ))),
        None => Ok(()),
    }
}

/// Fails on the first needle present in `haystack`
pub fn contains_none<N: Needles + ?Sized>(haystack: &str, needles: &N, what: &str) -> E2eResult<()> {
    match needles.needles().into_iter().find(|n| haystack.contains(n)) {
        Some(found) => Err(E2eError::AssertionFailed(format!(
            "{} contains '{}' but it shouldn't",
            what, found
        ))),
        None => Ok(()),
    }
}
