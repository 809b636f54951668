//! Noise estimator interface
//!
//! The network that predicts ε_θ(x_t, t) is supplied by the caller. Anything
//! that maps a noisy batch and its per-row timesteps to a same-shaped noise
//! estimate can drive the reverse chain, including plain closures.

use burn::prelude::*;

/// Learned noise estimator ε_θ
pub trait NoisePredictor<B: Backend> {
    /// Predict the noise contained in `x` at timesteps `t` (one per row)
    ///
    /// The result must have the shape of `x`.
    fn predict_noise(
        &self,
        x: Tensor<B, 4>,
        t: Tensor<B, 1, Int>,
    ) -> anyhow::Result<Tensor<B, 4>>;
}

impl<B, F> NoisePredictor<B> for F
where
    B: Backend,
    F: Fn(Tensor<B, 4>, Tensor<B, 1, Int>) -> anyhow::Result<Tensor<B, 4>>,
{
    fn predict_noise(
        &self,
        x: Tensor<B, 4>,
        t: Tensor<B, 1, Int>,
    ) -> anyhow::Result<Tensor<B, 4>> {
        self(x, t)
    }
}

/// Build the per-row timestep tensor handed to the predictor
pub fn timestep_tensor<B: Backend>(
    timestep: usize,
    batch: usize,
    device: &B::Device,
) -> Tensor<B, 1, Int> {
    Tensor::from_data(
        TensorData::new(vec![timestep as i32; batch], [batch]),
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TB = NdArray<f32>;

    #[test]
    fn test_closure_predictor() {
        let device = Default::default();
        let predictor =
            |x: Tensor<TB, 4>, _t: Tensor<TB, 1, Int>| -> anyhow::Result<Tensor<TB, 4>> {
                Ok(x.mul_scalar(2.0))
            };
        let x = Tensor::<TB, 4>::ones([2, 1, 2, 2], &device);
        let out = predictor
            .predict_noise(x, timestep_tensor::<TB>(5, 2, &device))
            .unwrap();
        let values: Vec<f32> = out.into_data().to_vec().unwrap();
        assert!(values.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_timestep_tensor() {
        let device = Default::default();
        let t = timestep_tensor::<TB>(42, 3, &device);
        assert_eq!(t.dims(), [3]);
        let values: Vec<i64> = t.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(values, vec![42, 42, 42]);
    }
}
