use std::collections::HashMap;

/// Server-side type identifier
pub type Oid = u32;

/// Mapping from server-side type oids to client-side decoder names.
///
/// Consumed by the result-decoding layer when interpreting query output.
/// Every connection carries its own map so that custom types registered
/// against one session never leak into another.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OidMap {
    decoders: HashMap<Oid, String>,
}

impl OidMap {
    /// Create an empty oid map
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a decoder with a type oid, returning the previously
    /// registered decoder (if any)
    pub fn register(&mut self, oid: Oid, decoder: impl Into<String>) -> Option<String> {
        self.decoders.insert(oid, decoder.into())
    }

    /// Look up the decoder registered for a type oid
    pub fn decoder(&self, oid: Oid) -> Option<&str> {
        self.decoders.get(&oid).map(String::as_str)
    }

    /// Number of registered decoders
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Check if no decoders have been registered
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::OidMap;

    #[test]
    fn registers_and_looks_up_decoders() {
        let mut oid_map = OidMap::new();
        assert!(oid_map.is_empty());

        assert_eq!(oid_map.register(114, "json"), None);
        assert_eq!(oid_map.register(114, "json_binary"), Some("json".to_string()));

        assert_eq!(oid_map.decoder(114), Some("json_binary"));
        assert_eq!(oid_map.decoder(3802), None);
        assert_eq!(oid_map.len(), 1);
    }
}
