//! Color-vision deficiency simulation.
//!
//! Each deficiency is a fixed 3×3 linear projection applied to the RGB
//! vector. Deterministic: the same input always maps to the same output.

use serde::{Deserialize, Serialize};

use super::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deficiency {
    Protanopia,
    Deuteranopia,
    Tritanopia,
}

impl Deficiency {
    pub const ALL: [Deficiency; 3] = [
        Deficiency::Protanopia,
        Deficiency::Deuteranopia,
        Deficiency::Tritanopia,
    ];

    fn matrix(&self) -> [[f64; 3]; 3] {
        match self {
            Deficiency::Protanopia => [
                [0.567, 0.433, 0.0],
                [0.558, 0.442, 0.0],
                [0.0, 0.242, 0.758],
            ],
            Deficiency::Deuteranopia => [
                [0.625, 0.375, 0.0],
                [0.7, 0.3, 0.0],
                [0.0, 0.3, 0.7],
            ],
            Deficiency::Tritanopia => [
                [0.95, 0.05, 0.0],
                [0.0, 0.433, 0.567],
                [0.0, 0.475, 0.525],
            ],
        }
    }
}

/// Project `color` through the deficiency matrix; alpha is preserved.
pub fn simulate(color: Color, deficiency: Deficiency) -> Color {
    let m = deficiency.matrix();
    let v = [color.r as f64, color.g as f64, color.b as f64];

    let row = |i: usize| -> u8 {
        let out = m[i][0] * v[0] + m[i][1] * v[1] + m[i][2] * v[2];
        out.round().clamp(0.0, 255.0) as u8
    };

    Color::rgba(row(0), row(1), row(2), color.a)
}
