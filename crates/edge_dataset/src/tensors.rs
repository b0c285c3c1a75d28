//! Conversion of stacked host batches into Burn tensors.

use crate::batch::Batch;
use crate::types::{DatasetError, DatasetResult, PixelArray};
use burn::tensor::{backend::Backend, Tensor, TensorData};

impl Batch {
    /// Images as an N x C x H x W tensor.
    pub fn images_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        let shape = [self.len(), self.height, self.width, self.channels];
        Tensor::<B, 4>::from_data(TensorData::new(self.images.clone(), shape), device)
            .permute([0, 3, 1, 2])
    }

    /// Binarized masks as an N x 1 x H x W tensor.
    pub fn masks_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        let shape = [self.len(), 1, self.height, self.width];
        Tensor::<B, 4>::from_data(TensorData::new(self.masks.clone(), shape), device)
    }
}

/// Split an N x 1 x H x W tensor of per-pixel values into one H x W map per sample.
pub fn unstack_maps<B: Backend>(maps: Tensor<B, 4>) -> DatasetResult<Vec<PixelArray>> {
    let [n, c, h, w] = maps.dims();
    if c != 1 {
        return Err(DatasetError::TensorRead(format!(
            "expected single-channel maps, got {c} channels"
        )));
    }
    let values = maps
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| DatasetError::TensorRead(format!("{e:?}")))?;
    let per_sample = h * w;
    Ok((0..n)
        .map(|i| PixelArray {
            height: h,
            width: w,
            channels: 1,
            data: values[i * per_sample..(i + 1) * per_sample].to_vec(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn images_are_channel_first() {
        // One 1x2 image with 3 channels: pixel0 = (1,2,3), pixel1 = (4,5,6).
        let batch = Batch {
            ids: vec!["a".into()],
            images: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            masks: vec![0.0, 1.0],
            height: 1,
            width: 2,
            channels: 3,
        };
        let device = Default::default();
        let t = batch.images_tensor::<B>(&device);
        assert_eq!(t.dims(), [1, 3, 1, 2]);
        let v = t.into_data().to_vec::<f32>().unwrap();
        assert_eq!(v, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        let maps = unstack_maps(batch.masks_tensor::<B>(&device)).unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].data, vec![0.0, 1.0]);
    }

    #[test]
    fn multi_channel_maps_are_rejected() {
        let device = Default::default();
        let maps = Tensor::<B, 4>::zeros([2, 2, 3, 3], &device);
        match unstack_maps(maps) {
            Err(DatasetError::TensorRead(msg)) => assert!(msg.contains("2 channels"), "{msg}"),
            other => panic!("expected a tensor read error, got {other:?}"),
        }
    }
}
