/// Pivot the index slice on a bin threshold, so that all
/// rows whose code is less than or equal to `split_bin` occupy
/// the low end of the slice. Returns the number of rows routed
/// left. Only index positions are swapped, the data itself is
/// never moved.
pub fn pivot_on_split(index: &mut [usize], feature: &[u16], split_bin: u16) -> usize {
    if index.is_empty() {
        return 0;
    }
    let mut low = 0;
    let mut high = index.len() - 1;
    loop {
        while low < index.len() && feature[index[low]] <= split_bin {
            low += 1;
        }
        while high > 0 && feature[index[high]] > split_bin {
            high -= 1;
        }
        if low >= high {
            return low;
        }
        index.swap(low, high);
    }
}

/// Fixed capacity set of bin codes, backed by 64 bit blocks.
/// Used to deduplicate candidate thresholds when scanning a
/// node's rows directly.
pub struct BinSet {
    blocks: Vec<u64>,
    capacity: usize,
}

impl BinSet {
    pub fn new(capacity: usize) -> Self {
        BinSet {
            blocks: vec![0; (capacity + 63) / 64],
            capacity,
        }
    }

    /// Insert a code, returning whether it was already present.
    pub fn insert(&mut self, code: u16) -> bool {
        let code = code as usize;
        debug_assert!(code < self.capacity);
        let mask = 1u64 << (code % 64);
        let block = &mut self.blocks[code / 64];
        let present = (*block & mask) != 0;
        *block |= mask;
        present
    }

    pub fn contains(&self, code: u16) -> bool {
        let code = code as usize;
        (self.blocks[code / 64] & (1u64 << (code % 64))) != 0
    }

    /// Iterate the stored codes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.blocks.iter().enumerate().flat_map(|(b, block)| {
            (0..64)
                .filter(move |bit| (block >> bit) & 1 == 1)
                .map(move |bit| (b * 64 + bit) as u16)
        })
    }
}

pub fn precision_round(n: f64, precision: i32) -> f64 {
    let p = (10.0_f64).powi(precision);
    (n * p).round() / p
}
