//! Animation metadata output.
//!
//! Write-only descriptive metadata per node, consumed by external
//! visualization tooling and by nothing in the core simulation.

use serde::Serialize;
use std::fs::File;
use std::path::Path;
use trafsim_common::Role;
use trafsim_model::{NodeInfo, Position};

use crate::RunnerError;

/// RGB node color by role: root red, relay green, leaf blue.
pub fn role_color(role: Role) -> [u8; 3] {
    match role {
        Role::Root => [255, 0, 0],
        Role::Relay => [0, 255, 0],
        Role::Leaf => [0, 0, 255],
    }
}

#[derive(Debug, Serialize)]
struct AnimationNode<'a> {
    name: &'a str,
    /// Radio device-class label (FPC/FFD/RFD).
    description: &'static str,
    color: [u8; 3],
    position: Position,
}

/// Write per-node animation metadata as a JSON document.
pub fn write_animation_metadata(path: &Path, nodes: &[NodeInfo]) -> Result<(), RunnerError> {
    let entries: Vec<AnimationNode<'_>> = nodes
        .iter()
        .map(|info| AnimationNode {
            name: &info.name,
            description: info.role.radio_label(),
            color: role_color(info.role),
            position: info.position,
        })
        .collect();

    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &entries)?;
    Ok(())
}
