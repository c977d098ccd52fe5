//! Piece registry
//!
//! In-memory registry for storing and retrieving pieces by name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::framework::piece::{Piece, PieceMetadata};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Piece '{name}' not found")]
    PieceNotFound { name: String },

    #[error("Action '{name}' not found in piece '{piece}'")]
    ActionNotFound { piece: String, name: String },

    #[error("Trigger '{name}' not found in piece '{piece}'")]
    TriggerNotFound { piece: String, name: String },
}

/// Registry of pieces keyed by piece name
#[derive(Clone, Default)]
pub struct Registry {
    pieces: HashMap<String, Arc<Piece>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a piece; a piece with the same name is replaced
    pub fn register(&mut self, piece: Piece) {
        tracing::debug!(piece = %piece.name, "Registering piece");
        self.pieces.insert(piece.name.clone(), Arc::new(piece));
    }

    /// Get a piece by name
    pub fn get(&self, name: &str) -> Result<Arc<Piece>, RegistryError> {
        self.pieces
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::PieceNotFound {
                name: name.to_string(),
            })
    }

    /// Get metadata for all pieces, sorted by name for stable ordering
    pub fn list_metadata(&self) -> Vec<PieceMetadata> {
        let mut metadata: Vec<_> = self.pieces.values().map(|p| p.metadata()).collect();
        metadata.sort_by(|a, b| a.name.cmp(&b.name));
        metadata
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_unknown_piece() {
        let registry = Registry::new();

        let result = registry.get("unknown");
        if let Err(RegistryError::PieceNotFound { name }) = result {
            assert_eq!(name, "unknown");
        } else {
            panic!("Expected PieceNotFound error");
        }
    }

    #[test]
    fn test_registry_list_ordering() {
        let mut registry = Registry::new();

        // Register pieces in non-alphabetical order
        registry.register(Piece::builder("zendesk", "Zendesk").build());
        registry.register(Piece::builder("bexio", "Bexio").build());
        registry.register(Piece::builder("pinecone", "Pinecone").build());

        let metadata = registry.list_metadata();
        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata[0].name, "bexio");
        assert_eq!(metadata[1].name, "pinecone");
        assert_eq!(metadata[2].name, "zendesk");
    }

    #[test]
    fn test_registry_register_replaces() {
        let mut registry = Registry::new();
        registry.register(Piece::builder("xero", "Xero").build());
        registry.register(Piece::builder("xero", "Xero v2").build());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("xero").unwrap().display_name, "Xero v2");
    }
}
