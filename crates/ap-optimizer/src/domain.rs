//! Opening domains: map normalized cutter parameters onto world transforms.

use std::fmt;

use ap_types::{
    BoundingBox, CutTarget, CutterType, OpeningType, PackedParameters, ParameterMap,
    ParameterSemantic, ScaleOptimization, Transform, CUTTER_HALF_EXTENT,
};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Upper bound on repeated openings along one spacing axis.
pub const MAX_SPACING_REPEATS: usize = 1024;

/// Static description of an opening domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    pub name: String,
    /// World placement of the domain's 100x100 local square.
    pub transform: Transform,
    pub cutter_type: CutterType,
    pub opening_type: OpeningType,
    pub scale_optimization: ScaleOptimization,
    /// Cutter scale range along X, mapped from a normalized parameter.
    pub cutter_scale_x: (f64, f64),
    pub cutter_scale_y: (f64, f64),
    pub number_of_cutters: usize,
    pub max_cutters: usize,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: "domain".to_string(),
            transform: Transform::identity(),
            cutter_type: CutterType::Box,
            opening_type: OpeningType::Simple,
            scale_optimization: ScaleOptimization::NoOptimization,
            cutter_scale_x: (0.5, 2.0),
            cutter_scale_y: (0.5, 2.0),
            number_of_cutters: 1,
            max_cutters: 1,
        }
    }
}

impl DomainConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_cutter_type(mut self, cutter_type: CutterType) -> Self {
        self.cutter_type = cutter_type;
        self
    }

    pub fn with_opening_type(mut self, opening_type: OpeningType) -> Self {
        self.opening_type = opening_type;
        self
    }

    pub fn with_scale_optimization(mut self, mode: ScaleOptimization) -> Self {
        self.scale_optimization = mode;
        self
    }

    pub fn with_scale_ranges(mut self, x: (f64, f64), y: (f64, f64)) -> Self {
        self.cutter_scale_x = x;
        self.cutter_scale_y = y;
        self
    }

    pub fn with_cutters(mut self, number: usize) -> Self {
        self.number_of_cutters = number;
        self.max_cutters = self.max_cutters.max(number);
        self
    }
}

/// Parameters of one cutter after reading them through the domain's map.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Unpacked {
    pos_x: f64,
    pos_y: f64,
    scale_x: f64,
    scale_y: f64,
    spacing_x: f64,
    spacing_y: f64,
}

/// A region of a facade where openings may be placed.
///
/// Neighbors continue the domain along X: a normalized X coordinate is split
/// across this domain and its neighbors in proportion to their X scales.
/// Instances replicate every cut onto further sub-domains.
pub struct OpeningDomain {
    config: DomainConfig,
    parameter_map: ParameterMap,
    cut_target: Option<Box<dyn CutTarget>>,
    neighbors: Vec<OpeningDomain>,
    instances: Vec<OpeningDomain>,
}

impl fmt::Debug for OpeningDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpeningDomain")
            .field("config", &self.config)
            .field("parameter_map", &self.parameter_map)
            .field("has_cut_target", &self.cut_target.is_some())
            .field("neighbors", &self.neighbors)
            .field("instances", &self.instances)
            .finish()
    }
}

impl OpeningDomain {
    pub fn new(config: DomainConfig) -> Self {
        let (parameter_map, _) = ParameterMap::build(config.scale_optimization, config.opening_type);
        Self {
            config,
            parameter_map,
            cut_target: None,
            neighbors: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn with_cut_target(mut self, target: impl CutTarget + 'static) -> Self {
        self.cut_target = Some(Box::new(target));
        self
    }

    pub fn with_neighbor(mut self, neighbor: OpeningDomain) -> Self {
        self.neighbors.push(neighbor);
        self
    }

    pub fn with_instance(mut self, instance: OpeningDomain) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn set_cut_target(&mut self, target: Box<dyn CutTarget>) {
        self.cut_target = Some(target);
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    pub fn number_of_cutters(&self) -> usize {
        self.config.number_of_cutters
    }

    pub fn has_cut_target(&self) -> bool {
        self.cut_target.is_some()
    }

    pub fn neighbors(&self) -> &[OpeningDomain] {
        &self.neighbors
    }

    pub fn instances(&self) -> &[OpeningDomain] {
        &self.instances
    }

    pub fn parameter_map(&self) -> &ParameterMap {
        &self.parameter_map
    }

    /// Count the free parameters of one cutter and refresh the parameter map.
    pub fn number_of_variables(&mut self) -> usize {
        let (map, count) = ParameterMap::build(self.config.scale_optimization, self.config.opening_type);
        self.parameter_map = map;
        count
    }

    /// Depth-first walk over this node, its instances and its neighbors.
    pub fn nodes(&self) -> Vec<&OpeningDomain> {
        let mut out = vec![self];
        for child in self.instances.iter().chain(self.neighbors.iter()) {
            out.extend(child.nodes());
        }
        out
    }

    /// Name of the first node in the tree without a cut target.
    pub fn first_missing_cut_target(&self) -> Option<&str> {
        self.nodes()
            .into_iter()
            .find(|node| !node.has_cut_target())
            .map(|node| node.name())
    }

    /// Place the cutters described by `packed` on the cut target.
    ///
    /// Instances receive the same parameters first. When neighbors exist the
    /// X coordinate may hand the whole cutter over to one of them.
    pub fn apply_transform_from_parameterization(&mut self, packed: PackedParameters) -> bool {
        self.number_of_variables();

        let mut success = true;
        for instance in &mut self.instances {
            success &= instance.apply_transform_from_parameterization(packed);
        }

        let mut packed = packed;
        if let Some((selected, x)) = self.select_neighbor(packed[0]) {
            packed[0] = x;
            if selected > 0 {
                return self.neighbors[selected - 1].apply_transform_from_parameterization(packed) && success;
            }
        }

        if self.cut_target.is_none() {
            error!(domain = %self.config.name, "no cut target assigned, cannot apply opening");
            return false;
        }

        let values = self.unpack(&packed);
        let placements = self.cutter_transforms(&values);
        let cutter = self.config.cutter_type;
        if let Some(target) = self.cut_target.as_mut() {
            for transform in &placements {
                target.apply_cutter_transform(cutter, transform);
            }
        }
        success
    }

    /// Transform of a single opening at `(x, y)` with default scale.
    pub fn transform_from_parameterization(&self, x: f64, y: f64) -> Transform {
        self.transform_from_parameterization_scaled(x, y, -1.0, -1.0)
    }

    /// Transform of a single opening; negative scales mean "keep 1.0".
    pub fn transform_from_parameterization_scaled(&self, x: f64, y: f64, scale_x: f64, scale_y: f64) -> Transform {
        let mut x = x;
        if let Some((selected, local)) = self.select_neighbor(x) {
            x = local;
            if selected > 0 {
                return self.neighbors[selected - 1].transform_from_parameterization_scaled(x, y, scale_x, scale_y);
            }
        }
        self.place(x, y, self.cutter_scale(scale_x, scale_y))
    }

    /// Clear cuts on this node and every instance and neighbor below it.
    pub fn reset_cutted(&mut self) -> bool {
        let mut ok = match self.cut_target.as_mut() {
            Some(target) => {
                target.reset();
                true
            }
            None => {
                warn!(domain = %self.config.name, "reset requested without a cut target");
                false
            }
        };
        for child in self.instances.iter_mut().chain(self.neighbors.iter_mut()) {
            ok &= child.reset_cutted();
        }
        ok
    }

    /// Bounds of the openings applied to this node's own target.
    pub fn openings_bbox(&self) -> Vec<BoundingBox> {
        self.cut_target
            .as_ref()
            .map(|target| target.openings_bbox())
            .unwrap_or_default()
    }

    /// Pick the domain a normalized X falls into and rescale X to it.
    ///
    /// Index 0 is this domain, `i > 0` is neighbor `i - 1`. `None` when there
    /// are no neighbors.
    fn select_neighbor(&self, x: f64) -> Option<(usize, f64)> {
        if self.neighbors.is_empty() {
            return None;
        }

        let mut cdf = Vec::with_capacity(self.neighbors.len() + 1);
        let mut total = self.config.transform.scale.x;
        cdf.push(total);
        for neighbor in &self.neighbors {
            total += neighbor.config.transform.scale.x;
            cdf.push(total);
        }

        let target = x * total;
        let last = cdf.len() - 1;
        let selected = cdf.iter().position(|c| target <= *c).unwrap_or(last);
        let lo = if selected == 0 { 0.0 } else { cdf[selected - 1] };
        let hi = cdf[selected];
        let width = hi - lo;
        let local = if width > f64::EPSILON {
            ((target - lo) / width).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some((selected, local))
    }

    fn unpack(&self, packed: &PackedParameters) -> Unpacked {
        let map = &self.parameter_map;
        let scale_x = map.read(packed, ParameterSemantic::ScaleX);
        let scale_y = match self.config.scale_optimization {
            ScaleOptimization::UniformScale => scale_x,
            _ => map.read(packed, ParameterSemantic::ScaleY),
        };
        Unpacked {
            pos_x: map.read(packed, ParameterSemantic::PosX),
            pos_y: map.read(packed, ParameterSemantic::PosY),
            scale_x,
            scale_y,
            spacing_x: map.read(packed, ParameterSemantic::SpacingX),
            spacing_y: map.read(packed, ParameterSemantic::SpacingY),
        }
    }

    fn cutter_scale(&self, scale_x: f64, scale_y: f64) -> Vector3<f64> {
        Vector3::new(
            lerp_or_unit(self.config.cutter_scale_x, scale_x),
            lerp_or_unit(self.config.cutter_scale_y, scale_y),
            1.0,
        )
    }

    fn place(&self, u: f64, v: f64, scale: Vector3<f64>) -> Transform {
        let local = Vector3::new(
            (2.0 * u - 1.0) * CUTTER_HALF_EXTENT,
            (2.0 * v - 1.0) * CUTTER_HALF_EXTENT,
            0.0,
        );
        let world = self.config.transform.transform_point(&local);
        Transform::new(self.config.transform.rotation, world, scale)
    }

    fn cutter_transforms(&self, values: &Unpacked) -> Vec<Transform> {
        let scale = self.cutter_scale(values.scale_x, values.scale_y);
        let domain_scale = self.config.transform.scale;

        match self.config.opening_type {
            OpeningType::Simple => vec![self.place(values.pos_x, values.pos_y, scale)],
            OpeningType::SpacingX => {
                let step = spacing_step(values.spacing_x, domain_scale.x);
                spaced_offsets(values.pos_x, step)
                    .into_iter()
                    .map(|x| self.place(x, values.pos_y, scale))
                    .collect()
            }
            OpeningType::SpacingXY => {
                let step_x = spacing_step(values.spacing_x, domain_scale.x);
                let step_y = spacing_step(values.spacing_y, domain_scale.y);
                let rows = spaced_offsets(values.pos_y, step_y);
                spaced_offsets(values.pos_x, step_x)
                    .into_iter()
                    .flat_map(|x| rows.iter().map(move |y| (x, *y)))
                    .map(|(x, y)| self.place(x, y, scale))
                    .collect()
            }
        }
    }
}

fn lerp_or_unit(range: (f64, f64), t: f64) -> f64 {
    if t >= 0.0 {
        range.0 + (range.1 - range.0) * t
    } else {
        1.0
    }
}

/// Signed gap between repeated openings.
///
/// The raw value spans [-1, 1]; the cutter width in domain units is added
/// in the direction of travel so neighbors never touch.
fn spacing_step(spacing: f64, domain_scale: f64) -> f64 {
    let s = 2.0 * spacing - 1.0;
    s + (1.0 / domain_scale).copysign(s)
}

fn spaced_offsets(start: f64, step: f64) -> Vec<f64> {
    let mut offsets = Vec::new();
    let mut offset = start;
    while offset > 0.0 && offset < 1.0 {
        if offsets.len() == MAX_SPACING_REPEATS {
            warn!(start, step, "spacing produced too many openings, truncating");
            break;
        }
        offsets.push(offset);
        offset += step;
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_types::{pack_parameters, CutRecorder};
    use proptest::prelude::*;

    fn facade(name: &str, scale_x: f64) -> DomainConfig {
        DomainConfig::new(name).with_transform(Transform::identity().with_scale(Vector3::new(scale_x, 1.0, 1.0)))
    }

    #[test]
    fn simple_opening_lands_on_domain_plane() {
        let recorder = CutRecorder::new();
        let mut domain = OpeningDomain::new(DomainConfig::new("wall")).with_cut_target(recorder.clone());

        assert!(domain.apply_transform_from_parameterization(pack_parameters(&[0.75, 0.25])));

        let applied = recorder.applied();
        assert_eq!(applied.len(), 1);
        let t = applied[0].transform.translation;
        assert!((t.x - 25.0).abs() < 1e-9);
        assert!((t.y + 25.0).abs() < 1e-9);
        assert_eq!(t.z, 0.0);
        assert_eq!(applied[0].transform.scale, Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn missing_cut_target_fails() {
        let mut domain = OpeningDomain::new(DomainConfig::new("bare"));
        assert!(!domain.apply_transform_from_parameterization(pack_parameters(&[0.5, 0.5])));
        assert_eq!(domain.first_missing_cut_target(), Some("bare"));
    }

    #[test]
    fn neighbor_split_delegates_with_rescaled_x() {
        let own = CutRecorder::new();
        let right = CutRecorder::new();
        let mut domain = OpeningDomain::new(facade("left", 1.0))
            .with_cut_target(own.clone())
            .with_neighbor(OpeningDomain::new(facade("right", 2.0)).with_cut_target(right.clone()));

        // 0.5 * 3 = 1.5 lies in (1, 3], local x = 0.25
        assert!(domain.apply_transform_from_parameterization(pack_parameters(&[0.5, 0.5])));
        assert_eq!(own.applied_count(), 0);
        let applied = right.applied();
        assert_eq!(applied.len(), 1);
        assert!((applied[0].transform.translation.x + 50.0).abs() < 1e-9);

        // 0.2 * 3 = 0.6 stays home, local x = 0.6
        assert!(domain.apply_transform_from_parameterization(pack_parameters(&[0.2, 0.5])));
        let applied = own.applied();
        assert_eq!(applied.len(), 1);
        assert!((applied[0].transform.translation.x - 10.0).abs() < 1e-9);
    }

    #[test]
    fn instances_receive_every_cut() {
        let main = CutRecorder::new();
        let copy = CutRecorder::new();
        let mut domain = OpeningDomain::new(DomainConfig::new("floor_1"))
            .with_cut_target(main.clone())
            .with_instance(OpeningDomain::new(DomainConfig::new("floor_2")).with_cut_target(copy.clone()));

        assert!(domain.apply_transform_from_parameterization(pack_parameters(&[0.3, 0.3])));
        assert_eq!(main.applied_count(), 1);
        assert_eq!(copy.applied_count(), 1);

        assert!(domain.reset_cutted());
        assert_eq!(main.reset_count(), 1);
        assert_eq!(copy.reset_count(), 1);
        assert_eq!(copy.applied_count(), 0);
    }

    #[test]
    fn failing_instance_fails_the_application() {
        let main = CutRecorder::new();
        let mut domain = OpeningDomain::new(DomainConfig::new("floor_1"))
            .with_cut_target(main.clone())
            .with_instance(OpeningDomain::new(DomainConfig::new("floor_2")));

        assert!(!domain.apply_transform_from_parameterization(pack_parameters(&[0.3, 0.3])));
        assert_eq!(main.applied_count(), 1);
        assert!(!domain.reset_cutted());
    }

    #[test]
    fn spacing_x_terminates_inside_unit_interval() {
        let recorder = CutRecorder::new();
        let config = facade("row", 4.0).with_opening_type(OpeningType::SpacingX);
        let mut domain = OpeningDomain::new(config).with_cut_target(recorder.clone());
        assert_eq!(domain.number_of_variables(), 3);

        // step = 0 + 1/4
        assert!(domain.apply_transform_from_parameterization(pack_parameters(&[0.1, 0.5, 0.5])));
        assert_eq!(recorder.applied_count(), 4);

        recorder.clone().reset();
        let mut unit = OpeningDomain::new(DomainConfig::new("unit").with_opening_type(OpeningType::SpacingX))
            .with_cut_target(recorder.clone());
        assert!(unit.apply_transform_from_parameterization(pack_parameters(&[0.1, 0.5, 0.5])));
        assert_eq!(recorder.applied_count(), 1);
    }

    #[test]
    fn negative_spacing_walks_left() {
        let recorder = CutRecorder::new();
        let config = facade("row", 4.0).with_opening_type(OpeningType::SpacingX);
        let mut domain = OpeningDomain::new(config).with_cut_target(recorder.clone());

        // step = -1 - 1/4
        assert!(domain.apply_transform_from_parameterization(pack_parameters(&[0.9, 0.5, 0.0])));
        assert_eq!(recorder.applied_count(), 1);

        recorder.clone().reset();
        // step = -0.5 - 0.25
        assert!(domain.apply_transform_from_parameterization(pack_parameters(&[0.9, 0.5, 0.25])));
        assert_eq!(recorder.applied_count(), 2);
    }

    #[test]
    fn spacing_xy_builds_a_grid() {
        let recorder = CutRecorder::new();
        let config = DomainConfig::new("grid")
            .with_transform(Transform::identity().with_scale(Vector3::new(4.0, 2.0, 1.0)))
            .with_opening_type(OpeningType::SpacingXY);
        let mut domain = OpeningDomain::new(config).with_cut_target(recorder.clone());

        // x steps of 0.25 from 0.1 give 4 columns, y steps of 0.5 from 0.2 give 2 rows
        assert!(domain.apply_transform_from_parameterization(pack_parameters(&[0.1, 0.2, 0.5, 0.5])));
        assert_eq!(recorder.applied_count(), 8);
    }

    #[test]
    fn uniform_scale_mirrors_into_y() {
        let recorder = CutRecorder::new();
        let config = DomainConfig::new("wall")
            .with_scale_optimization(ScaleOptimization::UniformScale)
            .with_scale_ranges((0.5, 2.0), (1.0, 3.0));
        let mut domain = OpeningDomain::new(config).with_cut_target(recorder.clone());

        assert!(domain.apply_transform_from_parameterization(pack_parameters(&[0.5, 0.5, 0.5])));
        let scale = recorder.applied()[0].transform.scale;
        assert!((scale.x - 1.25).abs() < 1e-12);
        assert!((scale.y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn scaled_query_uses_y_parameter_for_y_axis() {
        let domain = OpeningDomain::new(DomainConfig::new("wall"));
        let t = domain.transform_from_parameterization_scaled(0.5, 0.5, 0.0, 1.0);
        assert_eq!(t.scale, Vector3::new(0.5, 2.0, 1.0));
    }

    proptest! {
        #[test]
        fn default_scale_query_matches_explicit_form(x in 0.0f64..=1.0, y in 0.0f64..=1.0) {
            let domain = OpeningDomain::new(facade("left", 1.0))
                .with_neighbor(OpeningDomain::new(facade("right", 2.0)));
            let a = domain.transform_from_parameterization(x, y);
            let b = domain.transform_from_parameterization_scaled(x, y, -1.0, -1.0);
            prop_assert!(a.approx_eq(&b, 1e-12));
        }

        #[test]
        fn neighbor_local_coordinate_stays_in_range(x in 0.0f64..=1.0) {
            let domain = OpeningDomain::new(facade("left", 1.0))
                .with_neighbor(OpeningDomain::new(facade("right", 2.0)));
            let (selected, local) = domain.select_neighbor(x).unwrap();
            prop_assert!(selected <= 1);
            prop_assert!((0.0..=1.0).contains(&local));

            let t = domain.transform_from_parameterization(x, 0.5);
            let reach = if selected == 0 { 50.0 } else { 100.0 };
            prop_assert!(t.translation.x.abs() <= reach + 1e-9);
        }

        #[test]
        fn spacing_is_bounded(start in 0.0f64..=1.0, spacing in 0.0f64..=1.0, scale in 0.5f64..8.0) {
            let offsets = spaced_offsets(start, spacing_step(spacing, scale));
            prop_assert!(offsets.len() <= (scale.ceil() as usize) + 1);
            prop_assert!(offsets.iter().all(|o| *o > 0.0 && *o < 1.0));
        }
    }
}
