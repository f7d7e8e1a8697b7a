use super::StoreError;

/// Collection names that would collide with metadata keys.
const RESERVED_COLLECTIONS: &[&str] = &["_collections", "_indexes", "_validators"];

/// Key-construction helpers for the Redis-backed store.
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub prefix: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self { prefix }
    }

    /// Reject names that would let one collection's key pattern reach into another.
    pub fn validate_collection(collection: &str) -> Result<(), StoreError> {
        if collection.contains(':') {
            return Err(StoreError::other(format!(
                "collection name `{collection}` must not contain `:`"
            )));
        }
        if RESERVED_COLLECTIONS.contains(&collection) {
            return Err(StoreError::other(format!("collection name `{collection}` is reserved")));
        }
        Ok(())
    }

    pub fn document(&self, collection: &str, id: &str) -> String {
        format!("{}:{}:{}", self.prefix, collection, id)
    }

    /// `SCAN MATCH` pattern for every document of a collection.
    pub fn document_pattern(&self, collection: &str) -> String {
        format!("{}:{}:*", escape_glob(self.prefix), escape_glob(collection))
    }

    /// Set of known collection names.
    pub fn collections(&self) -> String {
        format!("{}:_collections", self.prefix)
    }

    /// Hash of index name -> serialized index definition.
    pub fn indexes(&self, collection: &str) -> String {
        format!("{}:_indexes:{}", self.prefix, collection)
    }

    /// Hash of collection name -> validator document.
    pub fn validators(&self) -> String {
        format!("{}:_validators", self.prefix)
    }
}

fn escape_glob(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_document_and_metadata_keys() {
        let ctx = KeyContext::new("docdrift");
        assert_eq!(ctx.document("users", "abc"), "docdrift:users:abc");
        assert_eq!(ctx.document_pattern("users"), "docdrift:users:*");
        assert_eq!(ctx.indexes("users"), "docdrift:_indexes:users");
        assert_eq!(ctx.collections(), "docdrift:_collections");
    }

    #[test]
    fn patterns_escape_glob_characters() {
        let ctx = KeyContext::new("app[1]");
        assert_eq!(ctx.document_pattern("logs*"), r"app\[1\]:logs\*:*");
    }

    #[test]
    fn ambiguous_collection_names_are_rejected() {
        assert!(KeyContext::validate_collection("users").is_ok());
        assert!(KeyContext::validate_collection("_docdrift_migrations").is_ok());
        assert!(KeyContext::validate_collection("users:archive").is_err());
        assert!(KeyContext::validate_collection("_indexes").is_err());
    }
}
