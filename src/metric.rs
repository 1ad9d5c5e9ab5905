/// Fraction of predictions that miss the label.
pub fn misclassification_error(y: &[f64], yhat: &[f64]) -> f64 {
    let missed = y
        .iter()
        .zip(yhat)
        .filter(|(y_, yhat_)| *y_ != *yhat_)
        .count();
    missed as f64 / y.len() as f64
}

pub fn accuracy(y: &[f64], yhat: &[f64]) -> f64 {
    1.0 - misclassification_error(y, yhat)
}

pub fn mean_squared_error(y: &[f64], yhat: &[f64]) -> f64 {
    y.iter()
        .zip(yhat)
        .map(|(y_, yhat_)| (y_ - yhat_) * (y_ - yhat_))
        .sum::<f64>()
        / y.len() as f64
}

pub fn root_mean_squared_error(y: &[f64], yhat: &[f64]) -> f64 {
    mean_squared_error(y, yhat).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::precision_round;

    #[test]
    fn test_misclassification_error() {
        let y = vec![0., 1., 1., 0., 1.];
        let yhat = vec![0., 1., 0., 0., 1.];
        assert_eq!(misclassification_error(&y, &yhat), 0.2);
        assert_eq!(accuracy(&y, &yhat), 0.8);
    }

    #[test]
    fn test_mean_squared_error() {
        let y = vec![1., 3., 4., 5.];
        let yhat = vec![3., 2., 3., 4.];
        assert_eq!(mean_squared_error(&y, &yhat), 7.0 / 4.0);
        assert_eq!(
            precision_round(root_mean_squared_error(&y, &yhat), 6),
            precision_round((7.0f64 / 4.0).sqrt(), 6)
        );
    }
}
