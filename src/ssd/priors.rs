//! Prior (anchor) box generation
//!
//! Builds the fixed set of candidate boxes an SSD head regresses offsets
//! against, following the original SSD formulation
//! (<https://arxiv.org/abs/1512.02325>). The table is a pure function of its
//! configuration; each detector generates it once at construction and shares
//! it by reference with every decode call.

use super::PriorBox;

/// Configuration for one feature map layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMapConfig {
    /// Activations along the horizontal axis
    pub width: usize,
    /// Activations along the vertical axis
    pub height: usize,
    /// Downscaling factor from image pixels to feature map cells
    pub shrinkage: u32,
    /// Smallest box size, in image pixels
    pub box_size_min: u32,
    /// Largest box size, in image pixels
    pub box_size_max: u32,
}

impl FeatureMapConfig {
    /// Number of values this layer contributes to a tensor carrying
    /// `floats_per_prior` values per prior.
    pub fn tensor_len(&self, priors_per_activation: usize, floats_per_prior: usize) -> usize {
        self.width * self.height * priors_per_activation * floats_per_prior
    }
}

/// Configuration for a detector's full prior table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorConfig {
    /// Width of the image the model was trained on, in pixels
    pub image_width: u32,
    /// Height of the image the model was trained on, in pixels
    pub image_height: u32,
    /// Feature map layers, in model output order
    pub feature_maps: Vec<FeatureMapConfig>,
    /// First box aspect ratio
    pub aspect_ratio_one: u32,
    /// Second box aspect ratio
    pub aspect_ratio_two: u32,
    /// Box shapes emitted per feature map activation, at most six
    pub priors_per_activation: usize,
}

impl PriorConfig {
    /// Total number of priors this configuration generates.
    pub fn num_priors(&self) -> usize {
        self.feature_maps
            .iter()
            .map(|map| map.width * map.height * self.priors_per_activation)
            .sum()
    }
}

/// The precomputed anchor boxes for one detector configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorTable {
    priors: Vec<PriorBox>,
}

impl PriorTable {
    /// Generate the combined prior table for `config`, every coordinate
    /// clamped to `[0, 1]`.
    pub fn generate(config: &PriorConfig) -> Self {
        let mut priors = Vec::with_capacity(config.num_priors());
        for map in &config.feature_maps {
            generate_feature_map(config, map, &mut priors);
        }
        for prior in &mut priors {
            prior.cx = prior.cx.clamp(0.0, 1.0);
            prior.cy = prior.cy.clamp(0.0, 1.0);
            prior.h = prior.h.clamp(0.0, 1.0);
            prior.w = prior.w.clamp(0.0, 1.0);
        }
        Self { priors }
    }

    pub fn len(&self) -> usize {
        self.priors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priors.is_empty()
    }

    pub fn as_slice(&self) -> &[PriorBox] {
        &self.priors
    }
}

/// Emit the priors of one feature map layer, row by row.
///
/// Each cell contributes up to six shapes in fixed order: the min-size
/// square, the geometric-mean square, then the four aspect-ratio variants.
/// Only the first `priors_per_activation` shapes are kept.
fn generate_feature_map(config: &PriorConfig, map: &FeatureMapConfig, out: &mut Vec<PriorBox>) {
    let image_width = config.image_width as f32;
    let image_height = config.image_height as f32;
    let scale_x = image_width / map.shrinkage as f32;
    let scale_y = image_height / map.shrinkage as f32;
    let ratio_one = (config.aspect_ratio_one as f32).sqrt();
    let ratio_two = (config.aspect_ratio_two as f32).sqrt();

    let min_w = map.box_size_min as f32 / image_width;
    let min_h = map.box_size_min as f32 / image_height;
    let mid_size = (f64::from(map.box_size_min) * f64::from(map.box_size_max)).sqrt() as f32;
    let mid_w = mid_size / image_width;
    let mid_h = mid_size / image_height;

    let shapes = [
        (min_h, min_w),
        (mid_h, mid_w),
        (min_h * ratio_one, min_w / ratio_one),
        (min_h / ratio_one, min_w * ratio_one),
        (min_h * ratio_two, min_w / ratio_two),
        (min_h / ratio_two, min_w * ratio_two),
    ];

    for j in 0..map.height {
        for i in 0..map.width {
            let cx = (i as f32 + 0.5) / scale_x;
            let cy = (j as f32 + 0.5) / scale_y;
            for &(h, w) in shapes.iter().take(config.priors_per_activation) {
                out.push(PriorBox { cx, cy, h, w });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_config() -> PriorConfig {
        PriorConfig {
            image_width: 300,
            image_height: 300,
            feature_maps: vec![
                FeatureMapConfig {
                    width: 19,
                    height: 19,
                    shrinkage: 16,
                    box_size_min: 60,
                    box_size_max: 105,
                },
                FeatureMapConfig {
                    width: 10,
                    height: 10,
                    shrinkage: 32,
                    box_size_min: 105,
                    box_size_max: 150,
                },
            ],
            aspect_ratio_one: 2,
            aspect_ratio_two: 3,
            priors_per_activation: 6,
        }
    }

    #[test]
    fn test_table_size_matches_configuration() {
        let config = square_config();
        assert_eq!(config.num_priors(), 19 * 19 * 6 + 10 * 10 * 6);
        let table = PriorTable::generate(&config);
        assert_eq!(table.len(), 2766);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let config = square_config();
        let a = PriorTable::generate(&config);
        let b = PriorTable::generate(&config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_all_coordinates_clamped_to_unit_range() {
        let table = PriorTable::generate(&square_config());
        for prior in table.as_slice() {
            assert!((0.0..=1.0).contains(&prior.cx));
            assert!((0.0..=1.0).contains(&prior.cy));
            assert!((0.0..=1.0).contains(&prior.h));
            assert!((0.0..=1.0).contains(&prior.w));
        }
    }

    #[test]
    fn test_first_cell_center() {
        let table = PriorTable::generate(&square_config());
        let first = &table.as_slice()[0];
        // (0 + 0.5) / (300 / 16)
        assert!((first.cx - 0.5 / 18.75).abs() < 1e-6);
        assert!((first.cy - 0.5 / 18.75).abs() < 1e-6);
        // min-size square comes first
        assert!((first.w - 60.0 / 300.0).abs() < 1e-6);
        assert!((first.h - 60.0 / 300.0).abs() < 1e-6);
    }

    #[test]
    fn test_shape_order_within_cell() {
        let config = square_config();
        let table = PriorTable::generate(&config);
        let cell = &table.as_slice()[..6];
        // Geometric mean square second
        let mid = (60.0f64 * 105.0).sqrt() as f32 / 300.0;
        assert!((cell[1].w - mid).abs() < 1e-6);
        assert_eq!(cell[1].w, cell[1].h);
        // Aspect variants come in h*sqrt(r), w/sqrt(r) pairs
        let root_two = 2.0f32.sqrt();
        assert!((cell[2].h - cell[0].h * root_two).abs() < 1e-6);
        assert!((cell[2].w - cell[0].w / root_two).abs() < 1e-6);
        assert!((cell[3].h - cell[0].h / root_two).abs() < 1e-6);
        assert!((cell[3].w - cell[0].w * root_two).abs() < 1e-6);
    }

    #[test]
    fn test_truncated_shape_list() {
        let mut config = square_config();
        config.priors_per_activation = 3;
        let table = PriorTable::generate(&config);
        assert_eq!(table.len(), (19 * 19 + 10 * 10) * 3);
        // Third shape is the first aspect variant
        let cell = &table.as_slice()[..3];
        let root_two = 2.0f32.sqrt();
        assert!((cell[2].h - cell[0].h * root_two).abs() < 1e-6);
    }
}
