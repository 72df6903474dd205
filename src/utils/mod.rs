//! Utility functions and types

pub mod data_loader;
mod timer;

pub use data_loader::{frame_to_arrays, load_frame, FrameArrays};
pub use timer::TickTock;

use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Gather the given rows of `x` into a new owned matrix, in index order.
pub fn take_rows(x: ArrayView2<'_, f64>, indices: &[usize]) -> Result<Array2<f64>> {
    check_indices(x.nrows(), indices)?;
    Ok(x.select(Axis(0), indices))
}

/// Gather the given elements of `y` into a new owned vector, in index order.
pub fn take_elems(y: ArrayView1<'_, f64>, indices: &[usize]) -> Result<Array1<f64>> {
    check_indices(y.len(), indices)?;
    Ok(y.select(Axis(0), indices))
}

fn check_indices(len: usize, indices: &[usize]) -> Result<()> {
    match indices.iter().find(|&&i| i >= len) {
        Some(&bad) => Err(KolosalError::InvalidInput(format!(
            "row index {} out of bounds for {} rows",
            bad, len
        ))),
        None => Ok(()),
    }
}

/// Permutation of `0..n` drawn from a seeded ChaCha8 generator.
pub fn permutation(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rng);
    indices
}

/// Shuffle the rows of `x` and the elements of `y` with the same permutation.
///
/// Feature/target pairing is preserved: row `i` of the output and element `i`
/// of the output came from the same input row.
pub fn shuffle_rows(x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<(Array2<f64>, Array1<f64>)> {
    if x.nrows() != y.len() {
        return Err(KolosalError::ShapeError {
            expected: format!("{} targets", x.nrows()),
            actual: format!("{} targets", y.len()),
        });
    }
    let order = permutation(x.nrows(), seed);
    Ok((x.select(Axis(0), &order), y.select(Axis(0), &order)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_take_rows() {
        let x = array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]];
        let picked = take_rows(x.view(), &[2, 0]).unwrap();
        assert_eq!(picked, array![[4.0, 5.0], [0.0, 1.0]]);
    }

    #[test]
    fn test_take_rows_out_of_bounds() {
        let x = array![[0.0], [1.0]];
        assert!(matches!(take_rows(x.view(), &[2]), Err(KolosalError::InvalidInput(_))));
    }

    #[test]
    fn test_shuffle_preserves_pairing() {
        // First column is a unique id, target is id * 10
        let x = Array2::from_shape_fn((50, 3), |(r, c)| if c == 0 { r as f64 } else { (r * c) as f64 });
        let y = Array1::from_shape_fn(50, |r| r as f64 * 10.0);

        let (xs, ys) = shuffle_rows(&x, &y, 7).unwrap();
        assert_ne!(xs.column(0).to_vec(), x.column(0).to_vec());
        for (row, target) in xs.rows().into_iter().zip(ys.iter()) {
            assert_eq!(row[0] * 10.0, *target);
            assert_eq!(row[2], row[0] * 2.0);
        }
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let x = Array2::from_shape_fn((20, 1), |(r, _)| r as f64);
        let y = Array1::from_shape_fn(20, |r| r as f64);
        let (a, _) = shuffle_rows(&x, &y, 3).unwrap();
        let (b, _) = shuffle_rows(&x, &y, 3).unwrap();
        let (c, _) = shuffle_rows(&x, &y, 4).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_shuffle_shape_mismatch() {
        let x = Array2::<f64>::zeros((3, 2));
        let y = Array1::<f64>::zeros(2);
        assert!(matches!(shuffle_rows(&x, &y, 0), Err(KolosalError::ShapeError { .. })));
    }
}
