//! Identifier generation.
//!
//! Bucket identifiers come from a collaborator-supplied generator and are
//! treated as opaque strings everywhere else.

/// Source of globally-unique bucket identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh bucket identifier.
    fn bucket_id(&self) -> String;
}

/// Default generator producing `bkt_`-prefixed nanoid identifiers.
#[derive(Debug, Default, Clone)]
pub struct NanoidGenerator;

impl IdGenerator for NanoidGenerator {
    fn bucket_id(&self) -> String {
        format!("bkt_{}", nanoid::nanoid!(12))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_ids_are_prefixed_and_unique() {
        let ids = NanoidGenerator;
        let a = ids.bucket_id();
        let b = ids.bucket_id();
        assert!(a.starts_with("bkt_"));
        assert_eq!(a.len(), "bkt_".len() + 12);
        assert_ne!(a, b);
    }
}
