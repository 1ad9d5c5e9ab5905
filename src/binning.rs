use crate::data::Matrix;
use crate::errors::ForestError;

// The binning stage lives outside this crate. What we consume
// is its product: a column major matrix of fixed width bin codes,
// and a per feature offset table describing how many codes each
// feature occupies. A split [feature <= bin 4] is translated back
// to a real threshold by the layer that owns the cut values.

/// Binned input data, one `u16` code per cell plus the
/// per feature bin layout.
pub struct BinnedFrame<'a> {
    pub data: Matrix<'a, u16>,
    /// Length `cols + 1`, monotone, `bin_offsets[f + 1] - bin_offsets[f]`
    /// is the number of bins feature `f` occupies.
    pub bin_offsets: Vec<usize>,
}

impl<'a> BinnedFrame<'a> {
    pub fn new(data: Matrix<'a, u16>, bin_offsets: Vec<usize>) -> Result<Self, ForestError> {
        if bin_offsets.len() != data.cols + 1 {
            return Err(ForestError::ShapeMismatch {
                what: "bin offsets",
                expected: data.cols + 1,
                got: bin_offsets.len(),
            });
        }
        for w in bin_offsets.windows(2) {
            if w[1] <= w[0] {
                return Err(ForestError::InvalidParameter(
                    "bin offsets must be strictly increasing".to_string(),
                ));
            }
        }
        let frame = BinnedFrame { data, bin_offsets };
        let max_bins = frame.max_bin_count();
        if max_bins > u16::MAX as usize + 1 {
            return Err(ForestError::DimensionExceeded {
                what: "bin count",
                value: max_bins,
                limit: u16::MAX as usize + 1,
            });
        }
        // Every code must sit inside its feature's declared bin
        // range; a stray code would land in histogram cells the
        // split search never scans, or index out of bounds.
        for feature in 0..frame.cols() {
            let declared = frame.bin_count(feature);
            let max_code = frame
                .data
                .get_col(feature)
                .iter()
                .max()
                .copied()
                .unwrap_or(0) as usize;
            if max_code >= declared {
                return Err(ForestError::InvalidParameter(format!(
                    "feature {} holds code {} but declares only {} bins",
                    feature, max_code, declared
                )));
            }
        }
        Ok(frame)
    }

    /// Build a frame from a code matrix alone, deriving each
    /// feature's bin count as `max code + 1`. Convenient for tests
    /// and callers that did not keep the offset table around.
    pub fn from_codes(data: Matrix<'a, u16>) -> Result<Self, ForestError> {
        let mut offsets = Vec::with_capacity(data.cols + 1);
        offsets.push(0);
        for col in 0..data.cols {
            let max_code = data.get_col(col).iter().max().copied().unwrap_or(0);
            offsets.push(offsets[col] + max_code as usize + 1);
        }
        BinnedFrame::new(data, offsets)
    }

    pub fn rows(&self) -> usize {
        self.data.rows
    }

    pub fn cols(&self) -> usize {
        self.data.cols
    }

    /// Number of bins feature `f` occupies.
    pub fn bin_count(&self, feature: usize) -> usize {
        self.bin_offsets[feature + 1] - self.bin_offsets[feature]
    }

    /// The widest per feature bin count, the histogram stride.
    pub fn max_bin_count(&self) -> usize {
        (0..self.cols())
            .map(|f| self.bin_count(f))
            .max()
            .unwrap_or(0)
    }
}
