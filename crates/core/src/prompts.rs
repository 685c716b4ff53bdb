//! Per-stage instruction texts bundled at compile time.
//!
//! The orchestrator treats these as opaque constants: each is attached
//! verbatim to the stage's input payload and consumed by the external
//! worker. Editing a file here changes what workers are told, nothing else.

/// Research - market and audience research for the brief
pub const RESEARCH: &str = include_str!("defaults/research.md");

/// Product manager - turns research into page requirements
pub const PRODUCT_MANAGER: &str = include_str!("defaults/product_manager.md");

/// Drawer - wireframe and section layout
pub const DRAWER: &str = include_str!("defaults/drawer.md");

/// Designer - visual design system over the wireframe
pub const DESIGNER: &str = include_str!("defaults/designer.md");

/// Coder - emits the final landing-page code artifact
pub const CODER: &str = include_str!("defaults/coder.md");

#[cfg(test)]
mod tests {
    use crate::stage::CANONICAL_ORDER;

    #[test]
    fn test_every_stage_has_instructions() {
        for stage in CANONICAL_ORDER {
            assert!(
                !stage.instructions().is_empty(),
                "stage '{}' has no instructions",
                stage
            );
        }
    }
}
