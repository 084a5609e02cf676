use std::fmt::Display;

/// Running min / max / average of a series of counts.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub min: usize,
    pub max: usize,
    pub avg: f32,
}

impl Stats {
    pub fn new_single(v: usize) -> Self {
        Stats {
            count: 1,
            min: v,
            max: v,
            avg: v as f32,
        }
    }

    pub fn add_sample(&mut self, value: usize) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.avg += (value as f32 - self.avg) / (self.count as f32);
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            count: 0,
            min: usize::MAX,
            max: 0,
            avg: 0.0,
        }
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "no samples");
        }
        write!(
            f,
            "{} - {}; avg {:.1}; {} samples",
            self.min, self.max, self.avg, self.count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use test_case::test_case;

    #[test]
    fn single_sample() {
        let s = Stats::new_single(10);
        assert!(s == Stats { count: 1, min: 10, max: 10, avg: 10.0 });
    }

    #[test]
    fn samples_match_single() {
        let mut s = Stats::default();
        s.add_sample(7);
        assert!(s == Stats::new_single(7));
    }

    #[test]
    fn leaf_sizes() {
        let mut s = Stats::default();
        for size in [4, 0, 2, 2] {
            s.add_sample(size);
        }
        assert!(s.count == 4);
        assert!(s.min == 0);
        assert!(s.max == 4);
        assert!(s.avg == 2.0);
    }

    #[test_case(Stats::new_single(42) => "42 - 42; avg 42.0; 1 samples")]
    #[test_case(Stats::default() => "no samples")]
    fn display(s: Stats) -> String {
        s.to_string()
    }
}
