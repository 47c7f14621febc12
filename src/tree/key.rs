//! Quantity addressing: domains, node paths, keys, and epoch references.
//!
//! A quantity is identified by the path of the node that owns it plus a short
//! quantity id, with an optional layer index for vertically discretized soil
//! quantities. Paths render as dot-separated strings (`soil.water_balance`)
//! and keys as `path:quantity` (`soil.water_balance:wcont[2]`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PathError;

/// Top-level domains a node path is rooted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Soil,
    Atmosphere,
    Crop,
    Management,
    Observation,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Soil => "soil",
            Domain::Atmosphere => "atmosphere",
            Domain::Crop => "crop",
            Domain::Management => "management",
            Domain::Observation => "observation",
        }
    }

    fn parse(s: &str) -> Option<Domain> {
        match s {
            "soil" => Some(Domain::Soil),
            "atmosphere" => Some(Domain::Atmosphere),
            "crop" => Some(Domain::Crop),
            "management" => Some(Domain::Management),
            "observation" => Some(Domain::Observation),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Node paths
// ============================================================================

/// Dot-separated chain of node names rooted at a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(into = "String", try_from = "String")]
pub struct ModelPath {
    domain: Domain,
    segments: Vec<String>,
}

impl ModelPath {
    /// Path of a domain root.
    pub fn root(domain: Domain) -> Self {
        Self {
            domain,
            segments: Vec::new(),
        }
    }

    /// Path of a direct child node.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.into());
        Self {
            domain: self.domain,
            segments,
        }
    }

    /// Parent path, or `None` at a domain root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self {
            domain: self.domain,
            segments,
        })
    }

    /// Parent `levels` steps up, or `None` when that escapes the domain root.
    pub fn ancestor(&self, levels: usize) -> Option<Self> {
        if levels > self.segments.len() {
            return None;
        }
        Some(Self {
            domain: self.domain,
            segments: self.segments[..self.segments.len() - levels].to_vec(),
        })
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Depth below the domain root.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for ModelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.domain)?;
        for seg in &self.segments {
            write!(f, ".{}", seg)?;
        }
        Ok(())
    }
}

impl FromStr for ModelPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let head = parts.next().unwrap_or("");
        let domain = Domain::parse(head).ok_or_else(|| PathError {
            path: s.to_string(),
            reason: format!("unknown domain '{}'", head),
        })?;

        let mut segments = Vec::new();
        for part in parts {
            if part.is_empty() {
                return Err(PathError {
                    path: s.to_string(),
                    reason: "empty path segment".to_string(),
                });
            }
            segments.push(part.to_string());
        }

        Ok(Self { domain, segments })
    }
}

impl From<ModelPath> for String {
    fn from(path: ModelPath) -> String {
        path.to_string()
    }
}

impl TryFrom<String> for ModelPath {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ============================================================================
// Quantity keys
// ============================================================================

/// Full identity of a registry quantity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(into = "String", try_from = "String")]
pub struct QuantityKey {
    pub path: ModelPath,
    pub quantity: String,
    pub layer: Option<u16>,
}

impl QuantityKey {
    pub fn new(path: ModelPath, quantity: impl Into<String>) -> Self {
        Self {
            path,
            quantity: quantity.into(),
            layer: None,
        }
    }

    pub fn layered(path: ModelPath, quantity: impl Into<String>, layer: u16) -> Self {
        Self {
            path,
            quantity: quantity.into(),
            layer: Some(layer),
        }
    }
}

impl fmt::Display for QuantityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.quantity)?;
        if let Some(layer) = self.layer {
            write!(f, "[{}]", layer)?;
        }
        Ok(())
    }
}

impl FromStr for QuantityKey {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path_str, rest) = s.split_once(':').ok_or_else(|| PathError {
            path: s.to_string(),
            reason: "missing ':' between path and quantity".to_string(),
        })?;
        let path: ModelPath = path_str.parse()?;

        let (quantity, layer) = match rest.split_once('[') {
            Some((q, tail)) => {
                let digits = tail.strip_suffix(']').ok_or_else(|| PathError {
                    path: s.to_string(),
                    reason: "unterminated layer index".to_string(),
                })?;
                let layer: u16 = digits.parse().map_err(|_| PathError {
                    path: s.to_string(),
                    reason: format!("invalid layer index '{}'", digits),
                })?;
                (q.to_string(), Some(layer))
            }
            None => (rest.to_string(), None),
        };

        if quantity.is_empty() {
            return Err(PathError {
                path: s.to_string(),
                reason: "empty quantity id".to_string(),
            });
        }

        Ok(Self {
            path,
            quantity,
            layer,
        })
    }
}

impl From<QuantityKey> for String {
    fn from(key: QuantityKey) -> String {
        key.to_string()
    }
}

impl TryFrom<String> for QuantityKey {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ============================================================================
// Relative references
// ============================================================================

/// Reference to a quantity, either absolute or relative to the declaring node.
///
/// Relative references are resolved at registration, so a submodel wired under
/// a different parent keeps working without edits. `ups` counts steps toward
/// the domain root before descending again.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum KeyRef {
    Absolute(QuantityKey),
    Relative {
        ups: usize,
        descend: Vec<String>,
        quantity: String,
        layer: Option<u16>,
    },
}

impl KeyRef {
    /// Absolute reference.
    pub fn absolute(key: QuantityKey) -> Self {
        KeyRef::Absolute(key)
    }

    /// One of the declaring node's own quantities.
    pub fn own(quantity: impl Into<String>) -> Self {
        KeyRef::Relative {
            ups: 0,
            descend: Vec::new(),
            quantity: quantity.into(),
            layer: None,
        }
    }

    /// A quantity of a sibling node (one up, one down).
    pub fn sibling(node: impl Into<String>, quantity: impl Into<String>) -> Self {
        KeyRef::Relative {
            ups: 1,
            descend: vec![node.into()],
            quantity: quantity.into(),
            layer: None,
        }
    }

    /// General relative reference.
    pub fn relative(ups: usize, descend: Vec<String>, quantity: impl Into<String>) -> Self {
        KeyRef::Relative {
            ups,
            descend,
            quantity: quantity.into(),
            layer: None,
        }
    }

    /// Same reference with a layer index.
    pub fn at_layer(self, layer: u16) -> Self {
        match self {
            KeyRef::Absolute(mut key) => {
                key.layer = Some(layer);
                KeyRef::Absolute(key)
            }
            KeyRef::Relative {
                ups,
                descend,
                quantity,
                ..
            } => KeyRef::Relative {
                ups,
                descend,
                quantity,
                layer: Some(layer),
            },
        }
    }

    /// Resolve against the path of the declaring node.
    pub fn resolve(&self, node_path: &ModelPath) -> Option<QuantityKey> {
        match self {
            KeyRef::Absolute(key) => Some(key.clone()),
            KeyRef::Relative {
                ups,
                descend,
                quantity,
                layer,
            } => {
                let mut path = node_path.ancestor(*ups)?;
                for seg in descend {
                    path = path.child(seg.clone());
                }
                Some(QuantityKey {
                    path,
                    quantity: quantity.clone(),
                    layer: *layer,
                })
            }
        }
    }
}

/// Which epoch a read refers to.
///
/// `Current` reads are intra-epoch dependencies and order node execution.
/// `Previous` reads are recurrences across the epoch boundary and create no
/// ordering edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochRef {
    Current,
    Previous,
}

impl fmt::Display for EpochRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochRef::Current => f.write_str("current epoch"),
            EpochRef::Previous => f.write_str("previous epoch"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_display_and_parse() {
        let path = ModelPath::root(Domain::Soil).child("water_balance");
        assert_eq!(path.to_string(), "soil.water_balance");

        let parsed: ModelPath = "soil.water_balance".parse().unwrap();
        assert_eq!(parsed, path);

        assert!("ocean.water".parse::<ModelPath>().is_err());
        assert!("soil..x".parse::<ModelPath>().is_err());
    }

    #[test]
    fn test_path_ancestry() {
        let path = ModelPath::root(Domain::Crop).child("canopy").child("leaves");
        assert_eq!(path.parent().unwrap().to_string(), "crop.canopy");
        assert_eq!(path.ancestor(2).unwrap().to_string(), "crop");
        assert!(path.ancestor(3).is_none());
    }

    #[test]
    fn test_key_display_round_trip() {
        let key = QuantityKey::layered(
            ModelPath::root(Domain::Soil).child("water_balance"),
            "wcont",
            2,
        );
        assert_eq!(key.to_string(), "soil.water_balance:wcont[2]");

        let parsed: QuantityKey = "soil.water_balance:wcont[2]".parse().unwrap();
        assert_eq!(parsed, key);

        let plain: QuantityKey = "atmosphere.weather:tavg".parse().unwrap();
        assert_eq!(plain.layer, None);
        assert_eq!(plain.quantity, "tavg");
    }

    #[test]
    fn test_key_parse_rejects_malformed() {
        assert!("soil.water_balance".parse::<QuantityKey>().is_err());
        assert!("soil.wb:".parse::<QuantityKey>().is_err());
        assert!("soil.wb:wcont[x]".parse::<QuantityKey>().is_err());
        assert!("soil.wb:wcont[2".parse::<QuantityKey>().is_err());
    }

    #[test]
    fn test_keyref_resolution() {
        let node = ModelPath::root(Domain::Crop).child("phenology");

        let own = KeyRef::own("tsum").resolve(&node).unwrap();
        assert_eq!(own.to_string(), "crop.phenology:tsum");

        let sib = KeyRef::sibling("roots", "depth").resolve(&node).unwrap();
        assert_eq!(sib.to_string(), "crop.roots:depth");

        let abs = KeyRef::absolute("atmosphere.weather:tavg".parse().unwrap())
            .resolve(&node)
            .unwrap();
        assert_eq!(abs.to_string(), "atmosphere.weather:tavg");
    }

    #[test]
    fn test_keyref_escape_is_caught() {
        let node = ModelPath::root(Domain::Crop).child("phenology");
        assert!(KeyRef::relative(2, vec![], "x").resolve(&node).is_none());
    }

    #[test]
    fn test_key_serde_as_string() {
        let key: QuantityKey = "soil.water_balance:wcont[1]".parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"soil.water_balance:wcont[1]\"");
        let back: QuantityKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
