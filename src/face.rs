//! Face metrics from landmarks
//!
//! Geometric heuristics over a 468-point face mesh. Every function degrades
//! to a neutral default when a landmark it needs is missing or non-finite,
//! so a bad detection never stops the tracking loop.

use serde::{Deserialize, Serialize};

use crate::config::FaceConfig;
use crate::landmarks::{FaceKeypointSet, Keypoint};

// Mesh indices. "Right" and "left" are the subject's.
const RIGHT_EYE_UPPER: usize = 159;
const RIGHT_EYE_LOWER: usize = 145;
const RIGHT_EYE_OUTER: usize = 33;
const RIGHT_EYE_INNER: usize = 133;
const LEFT_EYE_UPPER: usize = 386;
const LEFT_EYE_LOWER: usize = 374;
const LEFT_EYE_INNER: usize = 362;
const LEFT_EYE_OUTER: usize = 263;
const NOSE_TIP: usize = 1;
const CHIN: usize = 152;
const MOUTH_RIGHT: usize = 61;
const MOUTH_LEFT: usize = 291;
const UPPER_LIP: usize = 13;
const LOWER_LIP: usize = 14;

/// Eye openness when the eyes cannot be measured
pub const DEFAULT_EYE_OPENNESS: f64 = 0.5;

/// Mouth width (px) at which the smile width term saturates
const SMILE_FULL_WIDTH: f64 = 50.0;

/// Lip gap (px) at which the smile is fully cancelled
const SMILE_MAX_OPENNESS: f64 = 20.0;

/// Raw face signals for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceMetrics {
    pub eye_openness: f64,
    pub head_yaw: f64,
    pub head_pitch: f64,
    pub head_roll: f64,
    pub smile_probability: f64,
}

impl Default for FaceMetrics {
    fn default() -> Self {
        Self {
            eye_openness: DEFAULT_EYE_OPENNESS,
            head_yaw: 0.0,
            head_pitch: 0.0,
            head_roll: 0.0,
            smile_probability: 0.0,
        }
    }
}

impl FaceMetrics {
    pub fn from_keypoints(keypoints: &FaceKeypointSet, config: &FaceConfig) -> Self {
        let (head_yaw, head_pitch, head_roll) = head_pose(keypoints, config);
        Self {
            eye_openness: eye_openness(keypoints),
            head_yaw,
            head_pitch,
            head_roll,
            smile_probability: smile_probability(keypoints),
        }
    }
}

fn points<const N: usize>(keypoints: &FaceKeypointSet, indices: [usize; N]) -> Option<[Keypoint; N]> {
    let mut out = [Keypoint::new(0.0, 0.0, 0.0); N];
    for (slot, &index) in out.iter_mut().zip(indices.iter()) {
        *slot = keypoints.point(index)?;
    }
    Some(out)
}

fn eye_ratio(upper: Keypoint, lower: Keypoint, outer: Keypoint, inner: Keypoint) -> Option<f64> {
    let horizontal = outer.distance_2d(&inner);
    if horizontal <= f64::EPSILON {
        return None;
    }
    Some((upper.distance_2d(&lower) / horizontal).clamp(0.0, 1.0))
}

/// Mean vertical/horizontal eye aspect ratio, clamped to [0, 1]
pub fn eye_openness(keypoints: &FaceKeypointSet) -> f64 {
    let right = points(
        keypoints,
        [RIGHT_EYE_UPPER, RIGHT_EYE_LOWER, RIGHT_EYE_OUTER, RIGHT_EYE_INNER],
    )
    .and_then(|[u, l, o, i]| eye_ratio(u, l, o, i));
    let left = points(
        keypoints,
        [LEFT_EYE_UPPER, LEFT_EYE_LOWER, LEFT_EYE_OUTER, LEFT_EYE_INNER],
    )
    .and_then(|[u, l, o, i]| eye_ratio(u, l, o, i));

    match (right, left) {
        (Some(r), Some(l)) => (r + l) / 2.0,
        _ => DEFAULT_EYE_OPENNESS,
    }
}

/// (yaw, pitch, roll) in degrees.
///
/// Yaw is the nose offset from the outer eye-corner midpoint, pitch the
/// nose-to-chin vertical offset, each times a configured scale. Roll is the
/// tilt of the line between the outer eye corners.
pub fn head_pose(keypoints: &FaceKeypointSet, config: &FaceConfig) -> (f64, f64, f64) {
    let Some([nose, chin, right, left]) =
        points(keypoints, [NOSE_TIP, CHIN, RIGHT_EYE_OUTER, LEFT_EYE_OUTER])
    else {
        return (0.0, 0.0, 0.0);
    };

    let eye_center_x = (right.x + left.x) / 2.0;
    let yaw = config.yaw_scale * (nose.x - eye_center_x);
    let pitch = config.pitch_scale * (nose.y - chin.y);
    let roll = (left.y - right.y).atan2((left.x - right.x).abs()).to_degrees();

    if yaw.is_finite() && pitch.is_finite() && roll.is_finite() {
        (yaw, pitch, roll)
    } else {
        (0.0, 0.0, 0.0)
    }
}

/// Wide, closed mouth scores high; an open mouth cancels the smile.
pub fn smile_probability(keypoints: &FaceKeypointSet) -> f64 {
    let Some([right, left, upper, lower]) =
        points(keypoints, [MOUTH_RIGHT, MOUTH_LEFT, UPPER_LIP, LOWER_LIP])
    else {
        return 0.0;
    };

    let width = (right.distance_2d(&left) / SMILE_FULL_WIDTH).min(1.0);
    let openness = (upper.distance_2d(&lower) / SMILE_MAX_OPENNESS).min(1.0);
    (width * (1.0 - openness)).clamp(0.0, 1.0)
}


#[cfg(test)]
mod tests {
    use super::fixtures::SyntheticFace;
    use super::*;
    use crate::landmarks::FACE_MESH_POINTS;

    fn config() -> FaceConfig {
        FaceConfig::default()
    }

    #[test]
    fn test_eye_openness_ratio() {
        let face = SyntheticFace {
            eye_openness: 0.3,
            ..SyntheticFace::default()
        };
        assert!((eye_openness(&face.keypoints()) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_eye_openness_closed() {
        let face = SyntheticFace {
            eye_openness: 0.0,
            ..SyntheticFace::default()
        };
        assert_eq!(eye_openness(&face.keypoints()), 0.0);
    }

    #[test]
    fn test_eye_openness_clamped() {
        let face = SyntheticFace {
            eye_openness: 2.5,
            ..SyntheticFace::default()
        };
        assert_eq!(eye_openness(&face.keypoints()), 1.0);
    }

    #[test]
    fn test_short_keypoints_default() {
        let short = FaceKeypointSet::new(vec![Keypoint::new(1.0, 1.0, 0.0); 100]);
        assert_eq!(eye_openness(&short), DEFAULT_EYE_OPENNESS);
        assert_eq!(head_pose(&short, &config()), (0.0, 0.0, 0.0));
        assert_eq!(smile_probability(&short), 0.0);
        assert_eq!(FaceMetrics::from_keypoints(&FaceKeypointSet::default(), &config()), FaceMetrics::default());
    }

    #[test]
    fn test_non_finite_landmark_defaults() {
        let mut points = SyntheticFace::default().keypoints().points().to_vec();
        points[NOSE_TIP] = Keypoint::new(f64::NAN, 0.0, 0.0);
        points[RIGHT_EYE_UPPER] = Keypoint::new(f64::INFINITY, 0.0, 0.0);
        let set = FaceKeypointSet::new(points);
        assert_eq!(set.len(), FACE_MESH_POINTS);
        assert_eq!(head_pose(&set, &config()), (0.0, 0.0, 0.0));
        assert_eq!(eye_openness(&set), DEFAULT_EYE_OPENNESS);
    }

    #[test]
    fn test_degenerate_eye_width_defaults() {
        let mut points = SyntheticFace::default().keypoints().points().to_vec();
        points[RIGHT_EYE_INNER] = points[RIGHT_EYE_OUTER];
        assert_eq!(eye_openness(&FaceKeypointSet::new(points)), DEFAULT_EYE_OPENNESS);
    }

    #[test]
    fn test_centered_face_has_no_yaw_or_roll() {
        let (yaw, pitch, roll) = head_pose(&SyntheticFace::default().keypoints(), &config());
        assert_eq!(yaw, 0.0);
        assert_eq!(roll, 0.0);
        // Nose 80px above the chin
        assert!((pitch - -8.0).abs() < 1e-9);
    }

    #[test]
    fn test_yaw_follows_nose_offset() {
        let face = SyntheticFace {
            nose_offset: 20.0,
            ..SyntheticFace::default()
        };
        let (yaw, _, _) = head_pose(&face.keypoints(), &config());
        assert!((yaw - 10.0).abs() < 1e-9);

        let face = SyntheticFace {
            nose_offset: -20.0,
            ..SyntheticFace::default()
        };
        let (yaw, _, _) = head_pose(&face.keypoints(), &config());
        assert!((yaw + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_roll_from_eye_tilt() {
        // 100px between outer corners, 100px drop gives 45 degrees
        let face = SyntheticFace {
            eye_tilt: 100.0,
            ..SyntheticFace::default()
        };
        let (_, _, roll) = head_pose(&face.keypoints(), &config());
        assert!((roll - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_pose_scales_from_config() {
        let config = FaceConfig {
            yaw_scale: 1.0,
            pitch_scale: 0.5,
            ..FaceConfig::default()
        };
        let face = SyntheticFace {
            nose_offset: 4.0,
            chin_drop: 10.0,
            ..SyntheticFace::default()
        };
        let (yaw, pitch, _) = head_pose(&face.keypoints(), &config);
        assert!((yaw - 4.0).abs() < 1e-9);
        assert!((pitch + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_smile_formula() {
        // min(1, 60/50) * (1 - 5/20)
        let smile = smile_probability(&SyntheticFace::default().keypoints());
        assert!((smile - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_open_mouth_is_not_a_smile() {
        let face = SyntheticFace {
            mouth_openness: 25.0,
            ..SyntheticFace::default()
        };
        assert_eq!(smile_probability(&face.keypoints()), 0.0);
    }

    #[test]
    fn test_narrow_mouth_smiles_less() {
        let narrow = SyntheticFace {
            mouth_width: 25.0,
            mouth_openness: 0.0,
            ..SyntheticFace::default()
        };
        assert!((smile_probability(&narrow.keypoints()) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_from_keypoints_combines() {
        let metrics = FaceMetrics::from_keypoints(&SyntheticFace::default().keypoints(), &config());
        assert!((metrics.eye_openness - 0.35).abs() < 1e-9);
        assert_eq!(metrics.head_yaw, 0.0);
        assert!((metrics.smile_probability - 0.75).abs() < 1e-9);
    }
}
