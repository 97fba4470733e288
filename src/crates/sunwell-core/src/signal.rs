//! Signal vector extracted from a goal
//!
//! The signal vector is the fixed-shape classifier output that drives all
//! routing decisions. Extraction itself lives in the engine crate; this
//! module owns the shape and the conservative defaults used when extraction
//! fails or times out.

use serde::{Deserialize, Serialize};

/// Three-valued logic used by classifier fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tri {
    No,
    Maybe,
    Yes,
}

impl Tri {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tri::No => "NO",
            Tri::Maybe => "MAYBE",
            Tri::Yes => "YES",
        }
    }
}

impl std::fmt::Display for Tri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Tri {
    fn default() -> Self {
        Tri::Maybe
    }
}

/// Fixed-shape output of signal extraction
///
/// Created once per goal and immutable thereafter. A task-level re-extraction
/// produces a fresh vector rather than mutating the goal-level one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalVector {
    /// Does the goal require multi-step decomposition?
    pub complexity: Tri,

    /// Will tool/toolchain invocations be needed?
    pub needs_tools: Tri,

    /// Is the goal under-specified?
    pub is_ambiguous: Tri,

    /// Could the goal cause destructive or irreversible effects?
    pub is_dangerous: Tri,

    /// Extractor confidence in this classification, in [0, 1]
    pub confidence: f64,

    /// Free-form domain tag ("web", "cli", "data", ...)
    pub domain: Option<String>,

    /// Hinted language toolchain ("python", "rust", ...)
    pub toolchain_hint: Option<String>,

    /// Set when extraction fell back to conservative defaults
    #[serde(default)]
    pub degraded: bool,
}

impl SignalVector {
    /// Conservative defaults used on extraction parse failure or timeout.
    ///
    /// Deliberately pessimistic: assume complexity and tool use so the router
    /// picks a thorough strategy, but do not assume danger (danger requires
    /// positive evidence, and a degraded HALT would be unactionable).
    pub fn conservative_default() -> Self {
        Self {
            complexity: Tri::Yes,
            needs_tools: Tri::Yes,
            is_ambiguous: Tri::Maybe,
            is_dangerous: Tri::No,
            confidence: 0.5,
            domain: None,
            toolchain_hint: None,
            degraded: true,
        }
    }

    /// Clamp confidence into [0, 1]; NaN collapses to the conservative 0.5.
    pub fn normalized(mut self) -> Self {
        if self.confidence.is_nan() {
            self.confidence = 0.5;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

impl Default for SignalVector {
    fn default() -> Self {
        Self::conservative_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tri_serde_uppercase() {
        assert_eq!(serde_json::to_string(&Tri::Yes).unwrap(), "\"YES\"");
        assert_eq!(serde_json::to_string(&Tri::Maybe).unwrap(), "\"MAYBE\"");
        let t: Tri = serde_json::from_str("\"NO\"").unwrap();
        assert_eq!(t, Tri::No);
    }

    #[test]
    fn test_conservative_default_is_degraded() {
        let v = SignalVector::conservative_default();
        assert!(v.degraded);
        assert_eq!(v.complexity, Tri::Yes);
        assert_eq!(v.needs_tools, Tri::Yes);
        assert_eq!(v.is_dangerous, Tri::No);
        assert_eq!(v.is_ambiguous, Tri::Maybe);
        assert!((v.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_normalized_clamps_confidence() {
        let v = SignalVector {
            confidence: 1.7,
            ..SignalVector::conservative_default()
        };
        assert_eq!(v.normalized().confidence, 1.0);

        let v = SignalVector {
            confidence: f64::NAN,
            ..SignalVector::conservative_default()
        };
        assert_eq!(v.normalized().confidence, 0.5);
    }

    #[test]
    fn test_roundtrip() {
        let v = SignalVector {
            complexity: Tri::No,
            needs_tools: Tri::No,
            is_ambiguous: Tri::No,
            is_dangerous: Tri::No,
            confidence: 0.92,
            domain: Some("web".to_string()),
            toolchain_hint: Some("python".to_string()),
            degraded: false,
        };
        let json = serde_json::to_string(&v).unwrap();
        let back: SignalVector = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
