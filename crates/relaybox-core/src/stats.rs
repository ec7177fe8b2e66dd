use std::fmt;

/// Counters for one forward cycle.
///
/// `read` is how many unpublished rows the cycle saw, `published` how many
/// broker publishes succeeded, `acked` how many rows the acknowledgment
/// update actually touched. Under failures `published` and `acked` lag
/// `read`; the gap is re-driven on the next cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub read: usize,
    pub published: usize,
    pub acked: usize,
}

impl fmt::Display for ForwardStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[read: {}, published: {}, acked: {}]",
            self.read, self.published, self.acked
        )
    }
}
