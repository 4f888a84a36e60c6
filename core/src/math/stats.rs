pub struct StatsHelper;

impl StatsHelper {
    /// Weighted arithmetic mean; `None` when the weights sum to zero.
    pub fn weighted_mean(pairs: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
        let (sum, weight) = pairs
            .into_iter()
            .fold((0.0, 0.0), |(sum, weight), (value, w)| {
                (sum + value * w, weight + w)
            });
        if weight > 0.0 {
            Some(sum / weight)
        } else {
            None
        }
    }

    /// Exponential smoothing: `alpha` is the weight of the new sample.
    pub fn smooth(previous: f64, sample: f64, alpha: f64) -> f64 {
        alpha * sample + (1.0 - alpha) * previous
    }
}
