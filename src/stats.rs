/// Two moment running statistic, count, mean and the sum of
/// squared deviations from the mean. Accumulated online so a
/// single pass over a node's rows is enough, merged pairwise
/// when partial histograms are reduced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MomentStat {
    pub count: usize,
    pub mean: f64,
    pub sum2cent: f64,
}

impl MomentStat {
    pub fn push(&mut self, y: f64) {
        self.count += 1;
        let delta = y - self.mean;
        self.mean += delta / self.count as f64;
        self.sum2cent += delta * (y - self.mean);
    }

    /// Merge another statistic into this one, Chan's parallel
    /// update. The result is the statistic of the combined row
    /// sets, independent of how they were partitioned.
    pub fn merge(&mut self, other: &MomentStat) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let n = (self.count + other.count) as f64;
        let delta = other.mean - self.mean;
        let new_mean = self.mean + delta * other.count as f64 / n;
        self.sum2cent +=
            other.sum2cent + delta * delta * (self.count as f64) * (other.count as f64) / n;
        self.mean = new_mean;
        self.count += other.count;
    }

    /// The complement statistic, recovering the right partition
    /// from the node total and the left partition without a
    /// second pass over the rows.
    pub fn sub(total: &MomentStat, left: &MomentStat) -> MomentStat {
        let count = total.count - left.count;
        if count == 0 {
            return MomentStat::default();
        }
        if left.count == 0 {
            return total.clone();
        }
        let mean =
            (total.mean * total.count as f64 - left.mean * left.count as f64) / count as f64;
        let delta = mean - left.mean;
        let sum2cent = total.sum2cent
            - left.sum2cent
            - delta * delta * (left.count as f64) * (count as f64) / total.count as f64;
        MomentStat {
            count,
            mean,
            // Rounding can push a tiny positive value below zero.
            sum2cent: sum2cent.max(0.0),
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum2cent / self.count as f64
        }
    }
}

/// Per class counts for a node's row set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassCounts {
    pub counts: Vec<u32>,
}

impl ClassCounts {
    pub fn new(class_count: usize) -> Self {
        ClassCounts {
            counts: vec![0; class_count],
        }
    }

    pub fn push(&mut self, class: usize) {
        self.counts[class] += 1;
    }

    pub fn merge(&mut self, other: &ClassCounts) {
        if self.counts.is_empty() {
            self.counts = other.counts.clone();
            return;
        }
        for (c, o) in self.counts.iter_mut().zip(other.counts.iter()) {
            *c += o;
        }
    }

    pub fn sub(total: &ClassCounts, left: &ClassCounts) -> ClassCounts {
        if left.counts.is_empty() {
            return total.clone();
        }
        ClassCounts {
            counts: total
                .counts
                .iter()
                .zip(left.counts.iter())
                .map(|(t, l)| t - l)
                .collect(),
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|c| *c as usize).sum()
    }

    /// Gini impurity, `1 - sum((c / n)^2)`, in `[0, 1]`.
    pub fn gini(&self) -> f64 {
        let n = self.total();
        if n == 0 {
            return 0.0;
        }
        let n = n as f64;
        1.0 - self
            .counts
            .iter()
            .map(|c| {
                let p = *c as f64 / n;
                p * p
            })
            .sum::<f64>()
    }

    /// The class holding the plurality of rows, ties resolved
    /// to the lowest class index.
    pub fn winner(&self) -> usize {
        let mut best = 0;
        for (c, count) in self.counts.iter().enumerate() {
            if *count > self.counts[best] {
                best = c;
            }
        }
        best
    }
}

/// The single seam between the classification and regression
/// numeric kernels. The histogram builder, splitter and grower
/// are generic over this trait, dispatching once at the training
/// entry point rather than per cell.
pub trait StatKernel: Send + Sync {
    type Stat: Clone + Default + Send + Sync;

    fn empty(&self) -> Self::Stat;
    /// Fold one response value into a statistic.
    fn accumulate(&self, stat: &mut Self::Stat, response: f64);
    fn merge(&self, into: &mut Self::Stat, from: &Self::Stat);
    fn sub(&self, total: &Self::Stat, left: &Self::Stat) -> Self::Stat;
    fn count(&self, stat: &Self::Stat) -> usize;
    /// Node level impurity, Gini for classification, variance
    /// for regression.
    fn impurity(&self, stat: &Self::Stat) -> f64;
    /// Decrease achieved by splitting `parent` into `left` and
    /// `right`. Positive for any useful split.
    fn impurity_decrease(
        &self,
        parent: &Self::Stat,
        left: &Self::Stat,
        right: &Self::Stat,
    ) -> f64;
    /// The value a leaf holding this statistic predicts.
    fn leaf_response(&self, stat: &Self::Stat) -> f64;
    fn class_histogram(&self, stat: &Self::Stat) -> Option<Vec<u32>>;
}

pub struct GiniKernel {
    pub class_count: usize,
}

impl StatKernel for GiniKernel {
    type Stat = ClassCounts;

    fn empty(&self) -> ClassCounts {
        ClassCounts::new(self.class_count)
    }

    fn accumulate(&self, stat: &mut ClassCounts, response: f64) {
        stat.push(response as usize);
    }

    fn merge(&self, into: &mut ClassCounts, from: &ClassCounts) {
        into.merge(from);
    }

    fn sub(&self, total: &ClassCounts, left: &ClassCounts) -> ClassCounts {
        ClassCounts::sub(total, left)
    }

    fn count(&self, stat: &ClassCounts) -> usize {
        stat.total()
    }

    fn impurity(&self, stat: &ClassCounts) -> f64 {
        stat.gini()
    }

    fn impurity_decrease(
        &self,
        parent: &ClassCounts,
        left: &ClassCounts,
        right: &ClassCounts,
    ) -> f64 {
        let n = parent.total() as f64;
        let n_left = left.total() as f64;
        let n_right = right.total() as f64;
        parent.gini() - (n_left * left.gini() + n_right * right.gini()) / n
    }

    fn leaf_response(&self, stat: &ClassCounts) -> f64 {
        stat.winner() as f64
    }

    fn class_histogram(&self, stat: &ClassCounts) -> Option<Vec<u32>> {
        Some(stat.counts.clone())
    }
}

pub struct MomentKernel;

impl StatKernel for MomentKernel {
    type Stat = MomentStat;

    fn empty(&self) -> MomentStat {
        MomentStat::default()
    }

    fn accumulate(&self, stat: &mut MomentStat, response: f64) {
        stat.push(response);
    }

    fn merge(&self, into: &mut MomentStat, from: &MomentStat) {
        into.merge(from);
    }

    fn sub(&self, total: &MomentStat, left: &MomentStat) -> MomentStat {
        MomentStat::sub(total, left)
    }

    fn count(&self, stat: &MomentStat) -> usize {
        stat.count
    }

    fn impurity(&self, stat: &MomentStat) -> f64 {
        stat.variance()
    }

    fn impurity_decrease(
        &self,
        parent: &MomentStat,
        left: &MomentStat,
        right: &MomentStat,
    ) -> f64 {
        parent.sum2cent - left.sum2cent - right.sum2cent
    }

    fn leaf_response(&self, stat: &MomentStat) -> f64 {
        stat.mean
    }

    fn class_histogram(&self, _stat: &MomentStat) -> Option<Vec<u32>> {
        None
    }
}
