/// Adam with bias correction and an additive L2 penalty.
///
/// One instance holds the moment buffers for a single flat parameter
/// slice; the trainer keeps one per layer for the duration of a local
/// fit and discards them afterwards.
#[derive(Debug)]
pub(crate) struct Adam {
    learning_rate: f32,
    weight_decay: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    /// Creates an optimizer for `len` parameters.
    pub(crate) fn new(len: usize, learning_rate: f32, weight_decay: f32) -> Self {
        Self {
            learning_rate,
            weight_decay,
            beta1: 0.9,
            beta2: 0.999,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon: 1e-8,
        }
    }

    /// Applies one update step in place.
    ///
    /// # Panics
    /// In debug builds when `grad` and `params` disagree in length with
    /// the buffers allocated at construction.
    pub(crate) fn step(&mut self, grad: &[f32], params: &mut [f32]) {
        debug_assert_eq!(grad.len(), self.v.len());
        debug_assert_eq!(params.len(), self.v.len());

        let Self {
            learning_rate: lr,
            weight_decay: wd,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                let g = g + wd * *p;
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });
    }
}
