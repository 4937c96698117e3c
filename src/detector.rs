use rust_decimal::Decimal;

use crate::window::PriceWindow;

/// Which spike test to run over the price window
///
/// Both variants are deliberately preserved: the plain breakout test enters
/// on any sufficiently large move, the guarded variant additionally refuses
/// moves that already ran too far past an earlier reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Breakout,
    GuardedBreakout,
}

/// Threshold and window parameters for the spike tests
#[derive(Debug, Clone)]
pub struct DetectorParams {
    /// Fraction above a reference price that counts as a breakout
    pub breakout_ratio: Decimal,
    /// Fraction above an earlier reference beyond which the move is
    /// considered already too extreme to chase (guarded variant only)
    pub guard_ratio: Decimal,
    /// Start offset of the comparison window, anchored to a full buffer
    pub lookback_start: usize,
    /// End offset of the comparison window (guarded variant only)
    pub lookback_end: usize,
}

/// Pure anomaly test over a price window
///
/// `evaluate` has no side effects; the caller owns the window and decides
/// what an anomaly means.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    kind: DetectorKind,
    params: DetectorParams,
}

impl AnomalyDetector {
    pub fn new(kind: DetectorKind, params: DetectorParams) -> Self {
        Self { kind, params }
    }

    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    /// Does the latest price qualify as an upward anomaly?
    pub fn evaluate(&self, window: &PriceWindow) -> bool {
        let prices = window.snapshot();
        let Some(&current) = prices.last() else {
            return false;
        };

        match self.kind {
            DetectorKind::Breakout => self.breakout(prices, current, window.capacity()),
            DetectorKind::GuardedBreakout => self.guarded_breakout(prices, current),
        }
    }

    /// One-sided breakout over a suffix window: current exceeds some
    /// reference among the recent prices by more than breakout_ratio.
    ///
    /// The start offset is anchored to a full buffer, so the comparison
    /// window is the suffix of at most `capacity - lookback_start` entries;
    /// while the buffer is still filling, the whole of it is in range.
    fn breakout(&self, prices: &[Decimal], current: Decimal, capacity: usize) -> bool {
        let span = capacity.saturating_sub(self.params.lookback_start);
        let start = prices.len().saturating_sub(span);

        prices[start..]
            .iter()
            .any(|p| current > p * (Decimal::ONE + self.params.breakout_ratio))
    }

    /// Bounded breakout: a mid-history reference must be exceeded by more
    /// than breakout_ratio, while some earlier reference keeps the move
    /// under the guard band. Guards against chasing an already-extreme
    /// move. Offsets are absolute indices into the buffer and clamp to its
    /// length, so a window still filling up yields no anomaly until the
    /// breakout range is populated.
    fn guarded_breakout(&self, prices: &[Decimal], current: Decimal) -> bool {
        let end = self.params.lookback_end.min(prices.len());
        let start = self.params.lookback_start.min(end);

        let broke_out = prices[start..end]
            .iter()
            .any(|p| current > p * (Decimal::ONE + self.params.breakout_ratio));

        if !broke_out {
            return false;
        }

        prices[..end]
            .iter()
            .any(|p| current < p * (Decimal::ONE + self.params.guard_ratio))
    }
}
