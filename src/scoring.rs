//! Signal normalization
//!
//! Pure functions mapping raw face signals to bounded [0, 1] scores, a
//! centered moving average for score smoothing, and a three-sample blink
//! pattern detector. Every function is total over `f64`: NaN counts as the
//! worst case for the component it feeds.

/// Eye openness above which the eyes count as fully open for eye contact
const EYE_OPEN_THRESHOLD: f64 = 0.3;

/// Blink pattern thresholds
const BLINK_OPEN: f64 = 0.4;
const BLINK_CLOSED: f64 = 0.2;

/// Default moving-average window
pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

/// `1 - min(1, |angle| / limit)`. `f64::min` drops NaN, so NaN maps to 0.
fn angle_term(angle: f64, limit: f64) -> f64 {
    1.0 - (angle.abs() / limit).min(1.0)
}

/// Posture score from head angles in degrees.
///
/// Yaw and pitch carry 40% each, roll 20%.
pub fn posture_score(yaw: f64, pitch: f64, roll: f64) -> f64 {
    0.4 * angle_term(yaw, 30.0) + 0.4 * angle_term(pitch, 20.0) + 0.2 * angle_term(roll, 15.0)
}

/// Eye contact score from eye openness and head yaw.
///
/// Closed eyes (openness <= 0) cannot hold eye contact, whatever the yaw.
pub fn eye_contact_score(eye_openness: f64, head_yaw: f64) -> f64 {
    if eye_openness.is_nan() || eye_openness <= 0.0 {
        return 0.0;
    }
    let openness = if eye_openness > EYE_OPEN_THRESHOLD {
        1.0
    } else {
        eye_openness / EYE_OPEN_THRESHOLD
    };
    0.6 * openness + 0.4 * angle_term(head_yaw, 25.0)
}

/// Centered moving average.
///
/// Returns the input unchanged when it is shorter than `window`. Edge samples
/// average over the part of the window that falls inside the input.
pub fn smooth_signal(values: &[f64], window: usize) -> Vec<f64> {
    if values.len() < window || window <= 1 {
        return values.to_vec();
    }

    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(values.len());
            let slice = &values[start..end];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Open -> closed -> open over the last three eye openness samples.
pub fn detect_blink(samples: &[f64]) -> bool {
    if samples.len() < 3 {
        return false;
    }
    let last = &samples[samples.len() - 3..];
    last[0] > BLINK_OPEN && last[1] < BLINK_CLOSED && last[2] > BLINK_OPEN
}

/// Map a [0, 1] score to an integer percentage.
pub fn to_percent(score: f64) -> u8 {
    if score.is_nan() {
        return 0;
    }
    (score.clamp(0.0, 1.0) * 100.0).round() as u8
}
