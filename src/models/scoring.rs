//! Post-processing of raw classifier scores.

/// Convert logits to a probability distribution.
///
/// The maximum logit is subtracted before exponentiating so large logits do
/// not overflow. Accumulation is done in `f64`.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }

    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let exp_values: Vec<f64> = logits
        .iter()
        .map(|&x| (x as f64 - max_logit).exp())
        .collect();
    let sum: f64 = exp_values.iter().sum();

    exp_values.iter().map(|&x| (x / sum) as f32).collect()
}

/// Index of the largest value. Ties resolve to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Round a probability to 3 decimal places for the response body.
pub fn round_confidence(probability: f32) -> f64 {
    ((probability as f64) * 1000.0).round() / 1000.0
}
