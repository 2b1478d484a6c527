//! One-hot векторы меток.

use candle_core::{Device, Result, Tensor};

/// One-hot вектор ширины `width`. Нулевой вектор получается только из `None`;
/// индекс `>= width` это ошибка.
pub fn one_hot(index: Option<usize>, width: usize) -> Result<Vec<f32>> {
    let mut row = vec![0.0f32; width];
    if let Some(id) = index {
        match row.get_mut(id) {
            Some(slot) => *slot = 1.0,
            None => candle_core::bail!("label index {id} is out of range for width {width}"),
        }
    }
    Ok(row)
}

/// Батч one-hot векторов: [B, width].
pub fn one_hot_batch(indices: &[Option<usize>], width: usize, device: &Device) -> Result<Tensor> {
    let mut data = Vec::with_capacity(indices.len() * width);
    for &index in indices {
        data.extend(one_hot(index, width)?);
    }
    Tensor::from_vec(data, (indices.len(), width), device)
}

/// Ground truth для teacher forcing: [B, S, width].
///
/// Все последовательности батча должны иметь одинаковую длину S.
pub fn one_hot_sequence(labels: &[Vec<usize>], width: usize, device: &Device) -> Result<Tensor> {
    let seq_len = labels.first().map(|l| l.len()).unwrap_or(0);
    if let Some(bad) = labels.iter().find(|l| l.len() != seq_len) {
        candle_core::bail!(
            "ground truth sequences must share one length: {} vs {}",
            seq_len,
            bad.len()
        );
    }
    let mut data = Vec::with_capacity(labels.len() * seq_len * width);
    for &id in labels.iter().flatten() {
        data.extend(one_hot(Some(id), width)?);
    }
    Tensor::from_vec(data, (labels.len(), seq_len, width), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hot() {
        assert_eq!(one_hot(Some(2), 4).unwrap(), vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(one_hot(None, 3).unwrap(), vec![0.0; 3]);
        assert!(one_hot(Some(3), 3).is_err());
        assert!(one_hot(Some(7), 3).is_err());
    }

    #[test]
    fn test_one_hot_batch() {
        let t = one_hot_batch(&[Some(0), None, Some(2)], 3, &Device::Cpu).unwrap();
        assert_eq!(
            t.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 0.0, 0.0], vec![0.0; 3], vec![0.0, 0.0, 1.0]]
        );
        assert!(one_hot_batch(&[Some(0), Some(3)], 3, &Device::Cpu).is_err());
    }

    #[test]
    fn test_one_hot_sequence() {
        let t = one_hot_sequence(&[vec![1, 0], vec![2, 2]], 3, &Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[2, 2, 3]);
        let rows = t.to_vec3::<f32>().unwrap();
        assert_eq!(rows[0][0], vec![0.0, 1.0, 0.0]);
        assert_eq!(rows[1][1], vec![0.0, 0.0, 1.0]);

        assert!(one_hot_sequence(&[vec![1], vec![1, 2]], 3, &Device::Cpu).is_err());
    }

    #[test]
    fn test_one_hot_sequence_rejects_label_past_vocabulary() {
        let err = one_hot_sequence(&[vec![1, 7]], 5, &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }
}
