//! # Pipeline Stages
//!
//! The canonical five-stage ordering of the landing-page pipeline and the
//! naming scheme tying stages to queues and artifact keys.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::prompts;

/// One of the five canonical pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Research,
    ProductManager,
    Drawer,
    Designer,
    Coder,
}

/// Canonical stage order. `completed_stages` of any job is always a prefix
/// of this list.
pub const CANONICAL_ORDER: [Stage; 5] = [
    Stage::Research,
    Stage::ProductManager,
    Stage::Drawer,
    Stage::Designer,
    Stage::Coder,
];

impl Stage {
    /// Wire token for this stage (underscore form). Doubles as the stage's
    /// queue name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::ProductManager => "product_manager",
            Stage::Drawer => "drawer",
            Stage::Designer => "designer",
            Stage::Coder => "coder",
        }
    }

    /// Parse a stage token. Accepts both underscore and hyphen forms
    /// (`product_manager` and `product-manager`) since historical producers
    /// used both.
    pub fn from_token(token: &str) -> Option<Stage> {
        match token {
            "research" => Some(Stage::Research),
            "product_manager" | "product-manager" => Some(Stage::ProductManager),
            "drawer" => Some(Stage::Drawer),
            "designer" => Some(Stage::Designer),
            "coder" => Some(Stage::Coder),
            _ => None,
        }
    }

    /// Position in the canonical order, 0-based.
    pub fn position(&self) -> usize {
        match self {
            Stage::Research => 0,
            Stage::ProductManager => 1,
            Stage::Drawer => 2,
            Stage::Designer => 3,
            Stage::Coder => 4,
        }
    }

    /// The stage after this one, or `None` for the final stage.
    pub fn next(&self) -> Option<Stage> {
        CANONICAL_ORDER.get(self.position() + 1).copied()
    }

    /// Name of the queue that stage workers consume from.
    pub fn queue_name(&self) -> &'static str {
        self.as_str()
    }

    /// Blob key of the input payload dispatched to this stage.
    pub fn input_key(&self, job_id: &str) -> String {
        format!("{}/{}.json", job_id, self.as_str())
    }

    /// Blob key under which the stage worker writes its output.
    /// Always the underscore form; see [`Stage::legacy_result_key`].
    pub fn result_key(&self, job_id: &str) -> String {
        format!("{}/{}-result.json", job_id, self.as_str())
    }

    /// Hyphen-form result key emitted by older workers
    /// (`{job}/product-manager-result.json`). `None` when it does not differ
    /// from the canonical form.
    pub fn legacy_result_key(&self, job_id: &str) -> Option<String> {
        if self.as_str().contains('_') {
            Some(format!(
                "{}/{}-result.json",
                job_id,
                self.as_str().replace('_', "-")
            ))
        } else {
            None
        }
    }

    /// The instruction text bound to this stage, passed verbatim to the
    /// stage worker alongside its input artifact.
    pub fn instructions(&self) -> &'static str {
        match self {
            Stage::Research => prompts::RESEARCH,
            Stage::ProductManager => prompts::PRODUCT_MANAGER,
            Stage::Drawer => prompts::DRAWER,
            Stage::Designer => prompts::DESIGNER,
            Stage::Coder => prompts::CODER,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Stage, D::Error> {
        struct StageVisitor;

        impl Visitor<'_> for StageVisitor {
            type Value = Stage;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a pipeline stage name")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Stage, E> {
                Stage::from_token(value)
                    .ok_or_else(|| E::custom(format!("unknown stage '{value}'")))
            }
        }

        deserializer.deserialize_str(StageVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        assert_eq!(CANONICAL_ORDER[0], Stage::Research);
        assert_eq!(CANONICAL_ORDER[4], Stage::Coder);

        let mut stage = Stage::Research;
        let mut walked = vec![stage];
        while let Some(next) = stage.next() {
            walked.push(next);
            stage = next;
        }
        assert_eq!(walked, CANONICAL_ORDER.to_vec());
        assert_eq!(Stage::Coder.next(), None);
    }

    #[test]
    fn test_token_round_trip() {
        for stage in CANONICAL_ORDER {
            assert_eq!(Stage::from_token(stage.as_str()), Some(stage));
        }
        assert_eq!(
            Stage::from_token("product-manager"),
            Some(Stage::ProductManager)
        );
        assert_eq!(Stage::from_token("architect"), None);
    }

    #[test]
    fn test_artifact_keys() {
        assert_eq!(
            Stage::Research.input_key("j1"),
            "j1/research.json".to_string()
        );
        assert_eq!(
            Stage::ProductManager.result_key("j1"),
            "j1/product_manager-result.json".to_string()
        );
        assert_eq!(
            Stage::ProductManager.legacy_result_key("j1"),
            Some("j1/product-manager-result.json".to_string())
        );
        assert_eq!(Stage::Drawer.legacy_result_key("j1"), None);
    }

    #[test]
    fn test_serde_accepts_both_forms() {
        let stage: Stage = serde_json::from_str("\"product_manager\"").unwrap();
        assert_eq!(stage, Stage::ProductManager);
        let stage: Stage = serde_json::from_str("\"product-manager\"").unwrap();
        assert_eq!(stage, Stage::ProductManager);
        assert_eq!(
            serde_json::to_string(&Stage::ProductManager).unwrap(),
            "\"product_manager\""
        );
    }

    #[test]
    fn test_instructions_non_empty() {
        for stage in CANONICAL_ORDER {
            assert!(
                stage.instructions().len() > 50,
                "instructions for '{}' seem too short",
                stage
            );
        }
    }
}
