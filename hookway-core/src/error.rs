//! Error types for Hookway.
//!
//! - [`BoxError`] - The error type every handler returns
//! - [`find_source`] - typed lookup through an error's source chain

/// A boxed error type for dynamic error handling.
///
/// Handlers may fail with any error shape; consumers classify it again by
/// walking [`std::error::Error::source`] and downcasting.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Walks `err` and its chain of sources, returning the first value of type `E`.
///
/// Used by the normalizers to recognise wrapped errors.
pub fn find_source<'a, E>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a E>
where
    E: std::error::Error + 'static,
{
    let mut current: Option<&'a (dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<E>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn find_source_walks_the_chain() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let found = find_source::<std::io::Error>(&err).expect("io error in chain");
        assert_eq!(found.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn find_source_returns_none_when_absent() {
        let err = std::io::Error::other("plain");
        assert!(find_source::<Outer>(&err).is_none());
    }
}
