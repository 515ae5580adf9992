//! Parameter semantics shared by domains, strategies and the engine.
//!
//! A cutter is described by a flat vector of normalized values. Which value
//! means what is decided per domain by a [`ParameterMap`], built from the
//! domain's [`ScaleOptimization`] and [`OpeningType`].

use serde::{Deserialize, Serialize};

/// Largest number of parameters a single cutter can consume.
pub const MAX_PARAMETERS: usize = 6;

/// Marker for a packed slot that carries no value.
pub const UNUSED_PARAMETER: f64 = -1.0;

/// Positional parameter block handed to a domain.
pub type PackedParameters = [f64; MAX_PARAMETERS];

/// The meaning of one cutter parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterSemantic {
    PosX,
    PosY,
    ScaleX,
    ScaleY,
    SpacingX,
    SpacingY,
}

impl ParameterSemantic {
    pub const ALL: [ParameterSemantic; MAX_PARAMETERS] = [
        ParameterSemantic::PosX,
        ParameterSemantic::PosY,
        ParameterSemantic::ScaleX,
        ParameterSemantic::ScaleY,
        ParameterSemantic::SpacingX,
        ParameterSemantic::SpacingY,
    ];

    fn slot(self) -> usize {
        match self {
            ParameterSemantic::PosX => 0,
            ParameterSemantic::PosY => 1,
            ParameterSemantic::ScaleX => 2,
            ParameterSemantic::ScaleY => 3,
            ParameterSemantic::SpacingX => 4,
            ParameterSemantic::SpacingY => 5,
        }
    }
}

/// How a domain lets the optimizer resize its cutters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScaleOptimization {
    #[default]
    NoOptimization,
    ScaleXAxis,
    UniformScale,
    VariableScale,
}

/// Whether one parameter set yields one opening or a repeated row/grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpeningType {
    #[default]
    Simple,
    SpacingX,
    SpacingXY,
}

/// Semantic → position lookup for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMap {
    positions: [Option<usize>; MAX_PARAMETERS],
}

impl Default for ParameterMap {
    fn default() -> Self {
        let mut positions = [None; MAX_PARAMETERS];
        positions[ParameterSemantic::PosX.slot()] = Some(0);
        positions[ParameterSemantic::PosY.slot()] = Some(1);
        Self { positions }
    }
}

impl ParameterMap {
    /// Build the map for a domain and return it with the variable count.
    ///
    /// Positions 0 and 1 always hold the opening position. Scale parameters
    /// follow, then spacing parameters. A uniform scale consumes a single
    /// position stored under [`ParameterSemantic::ScaleX`]; the Y scale is
    /// mirrored from it when unpacking.
    pub fn build(scale: ScaleOptimization, opening: OpeningType) -> (Self, usize) {
        let mut map = Self::default();
        let mut next = 2;

        match scale {
            ScaleOptimization::ScaleXAxis | ScaleOptimization::UniformScale => {
                map.assign(ParameterSemantic::ScaleX, next);
                next += 1;
            }
            ScaleOptimization::VariableScale => {
                map.assign(ParameterSemantic::ScaleX, next);
                map.assign(ParameterSemantic::ScaleY, next + 1);
                next += 2;
            }
            ScaleOptimization::NoOptimization => {}
        }

        match opening {
            OpeningType::SpacingX => {
                map.assign(ParameterSemantic::SpacingX, next);
                next += 1;
            }
            OpeningType::SpacingXY => {
                map.assign(ParameterSemantic::SpacingX, next);
                map.assign(ParameterSemantic::SpacingY, next + 1);
                next += 2;
            }
            OpeningType::Simple => {}
        }

        (map, next)
    }

    fn assign(&mut self, semantic: ParameterSemantic, position: usize) {
        self.positions[semantic.slot()] = Some(position);
    }

    /// Position of `semantic`, or `None` when the domain does not use it.
    pub fn position(&self, semantic: ParameterSemantic) -> Option<usize> {
        self.positions[semantic.slot()]
    }

    /// Read `semantic` out of a packed block, [`UNUSED_PARAMETER`] if unmapped.
    pub fn read(&self, packed: &PackedParameters, semantic: ParameterSemantic) -> f64 {
        self.position(semantic)
            .and_then(|p| packed.get(p).copied())
            .unwrap_or(UNUSED_PARAMETER)
    }

    /// Number of mapped semantics.
    pub fn len(&self) -> usize {
        self.positions.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Expand a variable-length parameter vector into a packed block.
pub fn pack_parameters(parameters: &[f64]) -> PackedParameters {
    let mut packed = [UNUSED_PARAMETER; MAX_PARAMETERS];
    for (slot, value) in packed.iter_mut().zip(parameters) {
        *slot = *value;
    }
    packed
}

/// Working state of one cutter during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutterState {
    /// Normalized parameters, interpreted through the domain's map.
    pub parameters: Vec<f64>,
    /// Index of the top-level domain this cutter belongs to.
    pub domain_index: usize,
}

impl CutterState {
    pub fn new(domain_index: usize, variables: usize) -> Self {
        Self {
            parameters: vec![0.0; variables],
            domain_index,
        }
    }

    pub fn packed(&self) -> PackedParameters {
        pack_parameters(&self.parameters)
    }
}

/// Total number of scalar variables across a cutter collection.
pub fn dimension_of(cutters: &[CutterState]) -> usize {
    cutters.iter().map(|c| c.parameters.len()).sum()
}

/// Concatenate every cutter's parameters into one flat vector.
pub fn flatten_cutters(cutters: &[CutterState]) -> Vec<f64> {
    cutters
        .iter()
        .flat_map(|c| c.parameters.iter().copied())
        .collect()
}

/// Inverse of [`flatten_cutters`]; extra values are ignored, missing ones leave
/// the cutter untouched.
pub fn unflatten_into(cutters: &mut [CutterState], flat: &[f64]) {
    let mut values = flat.iter();
    for cutter in cutters.iter_mut() {
        for parameter in cutter.parameters.iter_mut() {
            match values.next() {
                Some(v) => *parameter = *v,
                None => return,
            }
        }
    }
}
