//! Shared primitives for the Archive OS backend.
//!
//! Every crate in the workspace pulls its error type and id generation from
//! here so that row ids and error plumbing stay uniform across services.

pub use anyhow::{Error, Result, anyhow, bail};
pub use serde_json::{Value, json};

/// Collision-resistant identifier for new rows (cuid2).
pub fn create_id() -> String {
    cuid2::create_id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_nonempty() {
        let a = create_id();
        let b = create_id();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }
}
