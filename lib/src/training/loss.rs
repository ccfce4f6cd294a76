use ndarray::Array2;

/// Huber (smooth-L1) loss, mean-reduced over all elements.
///
/// ```text
/// l(d) = 0.5 d²                 if |d| < delta
///      = delta (|d| - delta/2)  otherwise
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HuberLoss {
  pub delta: f64,
}

impl Default for HuberLoss {
  fn default() -> Self {
    Self { delta: 1.0 }
  }
}

impl HuberLoss {
  pub fn new(delta: f64) -> Self {
    Self { delta }
  }

  pub fn value(&self, pred: &Array2<f64>, target: &Array2<f64>) -> f64 {
    debug_assert_eq!(pred.dim(), target.dim());
    let n = pred.len() as f64;
    let delta = self.delta;
    pred
      .iter()
      .zip(target.iter())
      .map(|(p, t)| {
        let d = (p - t).abs();
        if d < delta {
          0.5 * d * d
        } else {
          delta * (d - 0.5 * delta)
        }
      })
      .sum::<f64>()
      / n
  }

  /// dLoss/dPred, already divided by the element count.
  pub fn gradient(&self, pred: &Array2<f64>, target: &Array2<f64>) -> Array2<f64> {
    debug_assert_eq!(pred.dim(), target.dim());
    let n = pred.len() as f64;
    let delta = self.delta;
    let mut grad = pred - target;
    grad.mapv_inplace(|d| d.clamp(-delta, delta) / n);
    grad
  }
}
