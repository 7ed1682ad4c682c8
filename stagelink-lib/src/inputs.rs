//! Panel on/off state reports.
//!
//! These arrive on their own report id as a bare 16-bit bitmask, one bit
//! per panel, fire-and-forget. They are decoded per report and never pass
//! through the frame assembler.

use modular_bitfield::prelude::*;

use crate::api::{PANEL_COUNT, Panel};
use crate::error::StageError;

#[bitfield(bytes = 2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageInputs {
    pub up_left: bool,
    pub up: bool,
    pub up_right: bool,
    pub left: bool,
    pub center: bool,
    pub right: bool,
    pub down_left: bool,
    pub down: bool,
    pub down_right: bool,
    #[skip]
    unused: B7,
}

impl Default for StageInputs {
    fn default() -> Self {
        Self::new()
    }
}

impl StageInputs {
    pub fn decode(data: &[u8]) -> Result<Self, StageError> {
        let bytes: [u8; 2] =
            data.get(..2)
                .and_then(|b| b.try_into().ok())
                .ok_or(StageError::InsufficientData {
                    expected: 2,
                    actual: data.len(),
                })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Pressed state for all nine panels in panel array order.
    pub fn to_array(&self) -> [bool; PANEL_COUNT] {
        [
            self.up_left(),
            self.up(),
            self.up_right(),
            self.left(),
            self.center(),
            self.right(),
            self.down_left(),
            self.down(),
            self.down_right(),
        ]
    }

    pub fn pressed(&self, panel: Panel) -> bool {
        self.to_array()[panel as usize]
    }
}
