//! Node types and their inheritance
//!
//! Types are small integers. The built-in ones form a fixed hierarchy rooted
//! at `ProductionNode`; modules may register extension types below any known
//! type. The hierarchy is owned by a context, so extension types registered
//! in one context are invisible to another.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status::{Result, Status};

/// Identifier of a node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeType(pub i32);

impl NodeType {
    pub const INVALID: NodeType = NodeType(-1);
    pub const DEVICE: NodeType = NodeType(1);
    pub const DEPTH: NodeType = NodeType(2);
    pub const IMAGE: NodeType = NodeType(3);
    pub const AUDIO: NodeType = NodeType(4);
    pub const IR: NodeType = NodeType(5);
    pub const USER: NodeType = NodeType(6);
    pub const RECORDER: NodeType = NodeType(7);
    pub const PLAYER: NodeType = NodeType(8);
    pub const GESTURE: NodeType = NodeType(9);
    pub const SCENE: NodeType = NodeType(10);
    pub const HANDS: NodeType = NodeType(11);
    pub const CODEC: NodeType = NodeType(12);
    pub const PRODUCTION_NODE: NodeType = NodeType(13);
    pub const GENERATOR: NodeType = NodeType(14);
    pub const MAP_GENERATOR: NodeType = NodeType(15);
    pub const SCRIPT: NodeType = NodeType(16);

    /// First id handed out to registered extension types
    pub const FIRST_EXTENSION: NodeType = NodeType(17);

    /// Name of a built-in type, `None` for extensions and invalid ids.
    pub fn builtin_name(self) -> Option<&'static str> {
        BUILTINS
            .iter()
            .find(|(ty, _, _)| *ty == self)
            .map(|(_, name, _)| *name)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.builtin_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Extension{}", self.0),
        }
    }
}

/// (type, name, base). Parents precede children.
const BUILTINS: &[(NodeType, &str, Option<NodeType>)] = &[
    (NodeType::PRODUCTION_NODE, "ProductionNode", None),
    (NodeType::DEVICE, "Device", Some(NodeType::PRODUCTION_NODE)),
    (NodeType::RECORDER, "Recorder", Some(NodeType::PRODUCTION_NODE)),
    (NodeType::PLAYER, "Player", Some(NodeType::PRODUCTION_NODE)),
    (NodeType::CODEC, "Codec", Some(NodeType::PRODUCTION_NODE)),
    (NodeType::SCRIPT, "Script", Some(NodeType::PRODUCTION_NODE)),
    (NodeType::GENERATOR, "Generator", Some(NodeType::PRODUCTION_NODE)),
    (NodeType::USER, "User", Some(NodeType::GENERATOR)),
    (NodeType::HANDS, "Hands", Some(NodeType::GENERATOR)),
    (NodeType::GESTURE, "Gesture", Some(NodeType::GENERATOR)),
    (NodeType::AUDIO, "Audio", Some(NodeType::GENERATOR)),
    (NodeType::MAP_GENERATOR, "MapGenerator", Some(NodeType::GENERATOR)),
    (NodeType::DEPTH, "Depth", Some(NodeType::MAP_GENERATOR)),
    (NodeType::IMAGE, "Image", Some(NodeType::MAP_GENERATOR)),
    (NodeType::IR, "IR", Some(NodeType::MAP_GENERATOR)),
    (NodeType::SCENE, "Scene", Some(NodeType::MAP_GENERATOR)),
];

#[derive(Debug, Clone)]
struct TypeEntry {
    name: String,
    /// Every type this one derives from, itself included
    ancestors: Vec<NodeType>,
}

/// Registry of known node types
#[derive(Debug, Clone)]
pub struct TypeHierarchy {
    entries: HashMap<NodeType, TypeEntry>,
    by_name: HashMap<String, NodeType>,
    next_extension: i32,
}

impl TypeHierarchy {
    /// A hierarchy holding the built-in types
    pub fn new() -> Self {
        let mut hierarchy = Self {
            entries: HashMap::new(),
            by_name: HashMap::new(),
            next_extension: NodeType::FIRST_EXTENSION.0,
        };
        for (ty, name, base) in BUILTINS {
            hierarchy.insert(*ty, name, *base);
        }
        hierarchy
    }

    fn insert(&mut self, ty: NodeType, name: &str, base: Option<NodeType>) {
        let mut ancestors = vec![ty];
        if let Some(base) = base.and_then(|b| self.entries.get(&b)) {
            ancestors.extend(base.ancestors.iter().copied());
        }
        self.entries.insert(
            ty,
            TypeEntry {
                name: name.to_string(),
                ancestors,
            },
        );
        self.by_name.insert(name.to_string(), ty);
    }

    /// Register an extension type deriving from `base`.
    ///
    /// Registering an existing name returns the type already registered.
    pub fn register_type(&mut self, name: &str, base: NodeType) -> Result<NodeType> {
        if let Some(ty) = self.by_name.get(name) {
            return Ok(*ty);
        }
        if !self.entries.contains_key(&base) {
            return Err(Status::NoMatch);
        }

        let ty = NodeType(self.next_extension);
        self.next_extension += 1;
        self.insert(ty, name, Some(base));
        Ok(ty)
    }

    pub fn type_by_name(&self, name: &str) -> Option<NodeType> {
        self.by_name.get(name).copied()
    }

    pub fn type_name(&self, ty: NodeType) -> Option<&str> {
        self.entries.get(&ty).map(|e| e.name.as_str())
    }

    /// Whether `ty` is `base` or derives from it. Unknown types are `NoMatch`.
    pub fn is_derived_from(&self, ty: NodeType, base: NodeType) -> Result<bool> {
        let entry = self.entries.get(&ty).ok_or(Status::NoMatch)?;
        if !self.entries.contains_key(&base) {
            return Err(Status::NoMatch);
        }
        Ok(entry.ancestors.contains(&base))
    }

    pub fn is_generator(&self, ty: NodeType) -> bool {
        self.is_derived_from(ty, NodeType::GENERATOR)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TypeHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_hierarchy() {
        let types = TypeHierarchy::new();
        assert_eq!(types.len(), 16);
        assert!(types.is_derived_from(NodeType::DEPTH, NodeType::MAP_GENERATOR).unwrap());
        assert!(types.is_derived_from(NodeType::DEPTH, NodeType::GENERATOR).unwrap());
        assert!(types.is_derived_from(NodeType::DEPTH, NodeType::PRODUCTION_NODE).unwrap());
        assert!(types.is_derived_from(NodeType::DEPTH, NodeType::DEPTH).unwrap());
        assert!(!types.is_derived_from(NodeType::DEVICE, NodeType::GENERATOR).unwrap());
        assert!(!types.is_derived_from(NodeType::USER, NodeType::MAP_GENERATOR).unwrap());
    }

    #[test]
    fn test_is_generator() {
        let types = TypeHierarchy::new();
        assert!(types.is_generator(NodeType::AUDIO));
        assert!(types.is_generator(NodeType::SCENE));
        assert!(!types.is_generator(NodeType::RECORDER));
        assert!(!types.is_generator(NodeType(99)));
    }

    #[test]
    fn test_register_extension_type() {
        let mut types = TypeHierarchy::new();
        let thermal = types.register_type("Thermal", NodeType::MAP_GENERATOR).unwrap();
        assert_eq!(thermal, NodeType::FIRST_EXTENSION);
        assert_eq!(types.type_name(thermal), Some("Thermal"));
        assert_eq!(types.type_by_name("Thermal"), Some(thermal));
        assert!(types.is_generator(thermal));

        let again = types.register_type("Thermal", NodeType::DEVICE).unwrap();
        assert_eq!(again, thermal);

        let hot = types.register_type("HotSpots", thermal).unwrap();
        assert_eq!(hot.0, thermal.0 + 1);
        assert!(types.is_derived_from(hot, NodeType::MAP_GENERATOR).unwrap());
    }

    #[test]
    fn test_unknown_types() {
        let mut types = TypeHierarchy::new();
        assert_eq!(types.register_type("X", NodeType(500)), Err(Status::NoMatch));
        assert_eq!(
            types.is_derived_from(NodeType(500), NodeType::GENERATOR),
            Err(Status::NoMatch)
        );
        assert_eq!(types.type_name(NodeType::INVALID), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeType::MAP_GENERATOR.to_string(), "MapGenerator");
        assert_eq!(NodeType(42).to_string(), "Extension42");
    }
}
