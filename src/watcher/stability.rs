//! Quiescence evaluation shared by the event-driven watcher and the page
//! poller

/// Outcome of comparing a sample against the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Enough consecutive quiet samples
    Settled,
    /// Quiet, but more samples are required
    Pending,
    /// Content or mutation count moved since the baseline
    Changed,
}

#[derive(Debug, Clone)]
pub struct Quiescence {
    required: u32,
    baseline: Option<(String, u64)>,
    consecutive: u32,
}

impl Quiescence {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            baseline: None,
            consecutive: 0,
        }
    }

    /// Capture the snapshot the next check compares against
    pub fn rebaseline(&mut self, text: String, mutations: u64) {
        self.baseline = Some((text, mutations));
    }

    /// Drop the consecutive quiet count
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn check(&mut self, text: &str, mutations: u64) -> Verdict {
        match &self.baseline {
            Some((baseline, seen)) if baseline == text && *seen == mutations => {
                self.consecutive += 1;
                if self.consecutive >= self.required {
                    Verdict::Settled
                } else {
                    Verdict::Pending
                }
            }
            _ => {
                self.consecutive = 0;
                self.baseline = Some((text.to_string(), mutations));
                Verdict::Changed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settles_after_required_quiet_samples() {
        let mut q = Quiescence::new(2);
        q.rebaseline("a".into(), 0);
        assert_eq!(q.check("a", 0), Verdict::Pending);
        assert_eq!(q.check("a", 0), Verdict::Settled);
    }

    #[test]
    fn test_text_change_resets() {
        let mut q = Quiescence::new(2);
        q.rebaseline("a".into(), 0);
        assert_eq!(q.check("a", 0), Verdict::Pending);
        assert_eq!(q.check("b", 0), Verdict::Changed);
        assert_eq!(q.consecutive(), 0);
        assert_eq!(q.check("b", 0), Verdict::Pending);
    }

    #[test]
    fn test_mutation_count_change_resets_without_text_change() {
        let mut q = Quiescence::new(1);
        q.rebaseline("same".into(), 3);
        assert_eq!(q.check("same", 4), Verdict::Changed);
        assert_eq!(q.check("same", 4), Verdict::Settled);
    }

    #[test]
    fn test_zero_requirement_is_treated_as_one() {
        let mut q = Quiescence::new(0);
        q.rebaseline(String::new(), 0);
        assert_eq!(q.check("", 0), Verdict::Settled);
    }
}
