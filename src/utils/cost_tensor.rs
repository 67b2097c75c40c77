use crate::Errors;
use anyhow::Result;
use itertools::Itertools;
use nalgebra::DMatrix;

/// Dense row-major N-dimensional array of assignment costs.
///
#[derive(Debug, Clone, PartialEq)]
pub struct CostTensor {
    shape: Vec<usize>,
    strides: Vec<usize>,
    data: Vec<f64>,
}

fn strides_of(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

impl CostTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != data.len() {
            return Err(Errors::InvalidTensor(format!(
                "shape {:?} requires {} elements, got {}",
                shape,
                expected,
                data.len()
            ))
            .into());
        }
        Ok(Self {
            strides: strides_of(&shape),
            shape,
            data,
        })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::filled(shape, 0.0)
    }

    pub fn filled(shape: Vec<usize>, value: f64) -> Self {
        let len = shape.iter().product();
        Self {
            strides: strides_of(&shape),
            shape,
            data: vec![value; len],
        }
    }

    /// Builds the tensor by evaluating `f` at every multi-index in row-major order
    ///
    pub fn from_fn<F>(shape: Vec<usize>, mut f: F) -> Self
    where
        F: FnMut(&[usize]) -> f64,
    {
        let mut tensor = Self::zeros(shape);
        for flat in 0..tensor.data.len() {
            let idx = tensor.unravel(flat);
            tensor.data[flat] = f(&idx);
        }
        tensor
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    fn offset(&self, idx: &[usize]) -> usize {
        debug_assert_eq!(idx.len(), self.shape.len());
        idx.iter().zip(self.strides.iter()).map(|(i, s)| i * s).sum()
    }

    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        self.strides
            .iter()
            .map(|s| {
                let i = flat / s;
                flat %= s;
                i
            })
            .collect()
    }

    pub fn get(&self, idx: &[usize]) -> Option<f64> {
        if idx.len() != self.shape.len() || idx.iter().zip(&self.shape).any(|(i, n)| i >= n) {
            return None;
        }
        Some(self.data[self.offset(idx)])
    }

    pub fn set(&mut self, idx: &[usize], value: f64) -> Result<()> {
        if idx.len() != self.shape.len() || idx.iter().zip(&self.shape).any(|(i, n)| i >= n) {
            return Err(Errors::InvalidTensor(format!(
                "index {:?} is out of bounds for shape {:?}",
                idx, self.shape
            ))
            .into());
        }
        let offset = self.offset(idx);
        self.data[offset] = value;
        Ok(())
    }

    /// Cost matrix of the two leading axes, minimized over all trailing axes.
    ///
    /// NaN entries are ignored unless every trailing entry is NaN.
    ///
    pub fn min_over_trailing(&self) -> Result<DMatrix<f64>> {
        if self.ndim() < 2 {
            return Err(Errors::InvalidTensor(format!(
                "at least 2 axes are required, got shape {:?}",
                self.shape
            ))
            .into());
        }
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let block = self.strides[1];
        Ok(DMatrix::from_fn(rows, cols, |i, j| {
            let start = i * self.strides[0] + j * block;
            self.data[start..start + block]
                .iter()
                .copied()
                .fold(f64::NAN, f64::min)
        }))
    }

    /// Replaces the two leading axes by a single axis over the matched `pairs`.
    ///
    /// Entry `(k, rest..)` of the result is entry `(pairs[k].0, pairs[k].1, rest..)` of `self`.
    ///
    pub fn collapse_leading(&self, pairs: &[(usize, usize)]) -> Result<CostTensor> {
        if self.ndim() < 3 {
            return Err(Errors::InvalidTensor(format!(
                "collapsing requires at least 3 axes, got shape {:?}",
                self.shape
            ))
            .into());
        }
        if let Some(p) = pairs
            .iter()
            .find(|(a, b)| *a >= self.shape[0] || *b >= self.shape[1])
        {
            return Err(Errors::InvalidTensor(format!(
                "pair {:?} is out of bounds for shape {:?}",
                p, self.shape
            ))
            .into());
        }
        let block = self.strides[1];
        let data = pairs
            .iter()
            .flat_map(|(a, b)| {
                let start = a * self.strides[0] + b * block;
                self.data[start..start + block].iter().copied()
            })
            .collect::<Vec<_>>();
        let shape = std::iter::once(pairs.len())
            .chain(self.shape[2..].iter().copied())
            .collect();
        CostTensor::new(shape, data)
    }

    /// Tensor with axes reordered: axis `k` of the result is axis `order[k]` of `self`
    ///
    pub fn permuted(&self, order: &[usize]) -> Result<CostTensor> {
        if order.len() != self.ndim()
            || !order.iter().all_unique()
            || order.iter().any(|a| *a >= self.ndim())
        {
            return Err(Errors::InvalidTensor(format!(
                "{:?} is not a permutation of {} axes",
                order,
                self.ndim()
            ))
            .into());
        }
        let shape = order.iter().map(|a| self.shape[*a]).collect::<Vec<_>>();
        let mut source = vec![0; self.ndim()];
        Ok(CostTensor::from_fn(shape, |idx| {
            for (k, a) in order.iter().enumerate() {
                source[*a] = idx[k];
            }
            self.data[self.offset(&source)]
        }))
    }

    pub fn map<F>(&self, f: F) -> CostTensor
    where
        F: Fn(f64) -> f64,
    {
        CostTensor {
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }

    /// Element-wise combination of two tensors of equal shape
    ///
    pub fn zip_with<F>(&self, other: &CostTensor, f: F) -> Result<CostTensor>
    where
        F: Fn(f64, f64) -> f64,
    {
        if self.shape != other.shape {
            return Err(Errors::InvalidTensor(format!(
                "shapes {:?} and {:?} differ",
                self.shape, other.shape
            ))
            .into());
        }
        Ok(CostTensor {
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::cost_tensor::CostTensor;
    use crate::Errors;

    fn sample() -> CostTensor {
        CostTensor::from_fn(vec![2, 3, 4], |i| (i[0] * 100 + i[1] * 10 + i[2]) as f64)
    }

    #[test]
    fn indexing() {
        let t = sample();
        assert_eq!(t.len(), 24);
        assert_eq!(t.get(&[1, 2, 3]), Some(123.0));
        assert_eq!(t.get(&[2, 0, 0]), None);
        assert_eq!(t.unravel(23), vec![1, 2, 3]);
        let err = CostTensor::new(vec![2, 2], vec![0.0; 3]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::InvalidTensor(_))
        ));
    }

    #[test]
    fn min_over_trailing() {
        let mut t = sample();
        t.set(&[1, 1, 0], f64::NAN).unwrap();
        let m = t.min_over_trailing().unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m[(0, 2)], 20.0);
        assert_eq!(m[(1, 1)], 111.0);

        let all_nan = CostTensor::filled(vec![1, 1, 2], f64::NAN);
        assert!(all_nan.min_over_trailing().unwrap()[(0, 0)].is_nan());
        assert!(CostTensor::zeros(vec![3]).min_over_trailing().is_err());
    }

    #[test]
    fn collapse_leading() {
        let t = sample();
        let c = t.collapse_leading(&[(1, 0), (0, 2)]).unwrap();
        assert_eq!(c.shape(), &[2, 4]);
        assert_eq!(c.get(&[0, 3]), Some(103.0));
        assert_eq!(c.get(&[1, 1]), Some(21.0));
        assert!(t.collapse_leading(&[(2, 0)]).is_err());
    }

    #[test]
    fn permuted() {
        let t = sample();
        let p = t.permuted(&[2, 0, 1]).unwrap();
        assert_eq!(p.shape(), &[4, 2, 3]);
        assert_eq!(p.get(&[3, 1, 2]), Some(123.0));
        assert!(t.permuted(&[0, 0, 1]).is_err());
    }

    #[test]
    fn combine() {
        let t = sample();
        let sum = t.zip_with(&t.map(|v| v * 2.0), |a, b| a + b).unwrap();
        assert_eq!(sum.get(&[1, 0, 1]), Some(303.0));
        assert!(t.zip_with(&CostTensor::zeros(vec![2, 3]), |a, _| a).is_err());
    }
}
