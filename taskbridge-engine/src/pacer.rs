//! Cooperative scheduling contract.
//!
//! The cycle is one blocking sequence with no intra-cycle parallelism; the
//! only scheduling hooks are explicit yield points — after each processed
//! document, and periodically inside the vault-wide id search. Hosts that
//! need to stay responsive implement [`Pacer`]; everything else uses
//! [`NoopPacer`].

/// Receives a call at every engine yield point.
pub trait Pacer {
    fn breathe(&mut self);
}

/// Yield point sink that does nothing. Suits one-shot CLI runs and daemon
/// cycles already isolated on a blocking thread.
#[derive(Debug, Default)]
pub struct NoopPacer;

impl Pacer for NoopPacer {
    fn breathe(&mut self) {}
}

#[cfg(test)]
pub(crate) struct CountingPacer(pub usize);

#[cfg(test)]
impl Pacer for CountingPacer {
    fn breathe(&mut self) {
        self.0 += 1;
    }
}
