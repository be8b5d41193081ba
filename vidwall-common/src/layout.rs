//! Display layout resolution.
//!
//! Maps every configured stream onto a screen region given the outputs that
//! are currently connected. The result is immutable and handed to the
//! supervisor loops as an `Arc<Layout>`; it is recomputed whenever the set of
//! outputs changes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::display::DisplayOutput;
use crate::error::LayoutError;
use crate::region::Region;
use crate::target::{OutputBinding, StreamTarget};

/// Where one stream plays, and what it shows when it can't.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    /// Physical output the region belongs to, if the stream is bound to one.
    pub output: Option<String>,
    pub region: Region,
    pub placeholder: PathBuf,
}

/// Why a stream could not be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Unassigned {
    OutputMissing { output: String },
    OutputHasNoMode { output: String },
    NoOutputs,
    /// More streams share the output than it has pixel columns.
    OutputTooNarrow { output: String },
    /// The region intersects one already given to another stream.
    Overlaps { other: String },
}

impl fmt::Display for Unassigned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unassigned::OutputMissing { output } => write!(f, "output {} is not connected", output),
            Unassigned::OutputHasNoMode { output } => write!(f, "output {} has no active mode", output),
            Unassigned::NoOutputs => write!(f, "no connected outputs"),
            Unassigned::OutputTooNarrow { output } => write!(f, "output {} is too narrow for its streams", output),
            Unassigned::Overlaps { other } => write!(f, "region overlaps stream {}", other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub assignments: BTreeMap<String, Assignment>,
    pub unassigned: BTreeMap<String, Unassigned>,
}

impl Layout {
    pub fn assignment(&self, target_id: &str) -> Option<&Assignment> {
        self.assignments.get(target_id)
    }

    pub fn conflict(&self, target_id: &str) -> Option<LayoutError> {
        self.unassigned.get(target_id).map(|reason| LayoutError::RegionConflict {
            target: target_id.to_string(),
            reason: reason.to_string(),
        })
    }
}

struct Slot<'a> {
    name: &'a str,
    geometry: Region,
    targets: Vec<&'a StreamTarget>,
}

/// Assigns every target a region. Deterministic for the same inputs.
///
/// Explicit regions are used verbatim. Named outputs bind directly when
/// connected. Auto targets go to the least-populated connected output.
/// An output shared by N targets is split into N equal columns.
///
/// No two assigned regions overlap: walking targets in id order, one whose
/// region intersects an earlier assignment is left unassigned.
pub fn resolve(outputs: &[DisplayOutput], targets: &[StreamTarget]) -> Layout {
    let mut layout = Layout::default();
    let mut candidates: BTreeMap<String, Assignment> = BTreeMap::new();

    let mut sorted: Vec<&StreamTarget> = targets.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut slots: Vec<Slot> = outputs
        .iter()
        .filter_map(|o| {
            o.usable_geometry().map(|geometry| Slot {
                name: o.name.as_str(),
                geometry,
                targets: Vec::new(),
            })
        })
        .collect();
    slots.sort_by(|a, b| {
        (a.geometry.x, a.geometry.y, a.name).cmp(&(b.geometry.x, b.geometry.y, b.name))
    });

    let mut auto = Vec::new();
    for target in sorted {
        match &target.binding {
            OutputBinding::Region(region) => {
                candidates.insert(
                    target.id.clone(),
                    Assignment {
                        output: None,
                        region: *region,
                        placeholder: target.placeholder.clone(),
                    },
                );
            }
            OutputBinding::Output(name) => {
                if let Some(slot) = slots.iter_mut().find(|s| s.name == name.as_str()) {
                    slot.targets.push(target);
                } else {
                    let reason = match outputs.iter().find(|o| &o.name == name) {
                        Some(o) if o.connected => Unassigned::OutputHasNoMode { output: name.clone() },
                        _ => Unassigned::OutputMissing { output: name.clone() },
                    };
                    layout.unassigned.insert(target.id.clone(), reason);
                }
            }
            OutputBinding::Auto => auto.push(target),
        }
    }

    for target in auto {
        match slots.iter_mut().min_by_key(|s| s.targets.len()) {
            Some(slot) => slot.targets.push(target),
            None => {
                layout.unassigned.insert(target.id.clone(), Unassigned::NoOutputs);
            }
        }
    }

    for slot in &mut slots {
        slot.targets.sort_by(|a, b| a.id.cmp(&b.id));
        let columns = slot.geometry.split_columns(slot.targets.len());
        for (i, target) in slot.targets.iter().enumerate() {
            match columns.get(i) {
                Some(region) => {
                    candidates.insert(
                        target.id.clone(),
                        Assignment {
                            output: Some(slot.name.to_string()),
                            region: *region,
                            placeholder: target.placeholder.clone(),
                        },
                    );
                }
                None => {
                    layout.unassigned.insert(
                        target.id.clone(),
                        Unassigned::OutputTooNarrow { output: slot.name.to_string() },
                    );
                }
            }
        }
    }

    for (id, assignment) in candidates {
        let taken = layout
            .assignments
            .iter()
            .find(|(_, placed)| placed.region.overlaps(&assignment.region));
        match taken {
            Some((other, _)) => {
                let reason = Unassigned::Overlaps { other: other.clone() };
                layout.unassigned.insert(id, reason);
            }
            None => {
                layout.assignments.insert(id, assignment);
            }
        }
    }

    layout
}
