use ndarray::{Array1, Array2, Zip};

use crate::model::{LinearGrad, Network};

/// Adam with bias-corrected moments, one moment pair per linear stage.
#[derive(Debug, Clone)]
pub struct Adam {
  pub lr: f64,
  pub beta1: f64,
  pub beta2: f64,
  pub eps: f64,
  t: i32,
  m: Vec<(Array2<f64>, Array1<f64>)>,
  v: Vec<(Array2<f64>, Array1<f64>)>,
}

impl Adam {
  pub fn new(network: &Network, lr: f64) -> Self {
    let zeros: Vec<_> = network
      .linear_stages()
      .map(|l| (Array2::zeros(l.weight.dim()), Array1::zeros(l.bias.len())))
      .collect();
    Self {
      lr,
      beta1: 0.9,
      beta2: 0.999,
      eps: 1e-8,
      t: 0,
      m: zeros.clone(),
      v: zeros,
    }
  }

  pub fn steps(&self) -> i32 {
    self.t
  }

  /// One update of every linear stage; `grads` must be in `linear_stages` order.
  pub fn step(&mut self, network: &mut Network, grads: &[LinearGrad]) {
    self.t += 1;
    let (b1, b2, eps) = (self.beta1, self.beta2, self.eps);
    let c1 = 1.0 - b1.powi(self.t);
    let c2 = 1.0 - b2.powi(self.t);
    let lr = self.lr;

    let update = |p: f64, m: &mut f64, v: &mut f64, g: f64| -> f64 {
      *m = b1 * *m + (1.0 - b1) * g;
      *v = b2 * *v + (1.0 - b2) * g * g;
      let m_hat = *m / c1;
      let v_hat = *v / c2;
      p - lr * m_hat / (v_hat.sqrt() + eps)
    };

    let stages = network.linear_stages_mut();
    for (((layer, grad), (m_w, m_b)), (v_w, v_b)) in stages
      .zip(grads)
      .zip(self.m.iter_mut())
      .zip(self.v.iter_mut())
    {
      Zip::from(&mut layer.weight)
        .and(m_w)
        .and(v_w)
        .and(&grad.weight)
        .for_each(|p, m, v, &g| *p = update(*p, m, v, g));
      Zip::from(&mut layer.bias)
        .and(m_b)
        .and(v_b)
        .and(&grad.bias)
        .for_each(|p, m, v, &g| *p = update(*p, m, v, g));
    }
  }
}
