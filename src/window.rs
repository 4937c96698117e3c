use rust_decimal::Decimal;

/// Rolling buffer of the most recent prices for one symbol
///
/// Strict FIFO: once `capacity` is reached, every push evicts the oldest
/// entry. Capacity is fixed at construction. The window does not validate
/// prices; the stream parser drops unparseable and non-positive ticks before
/// they get here.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    prices: Vec<Decimal>,
    capacity: usize,
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            prices: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a price, evicting the oldest entry when over capacity
    pub fn push(&mut self, price: Decimal) {
        self.prices.push(price);
        if self.prices.len() > self.capacity {
            self.prices.remove(0);
        }
    }

    /// Read-only view of the buffered prices, oldest first
    pub fn snapshot(&self) -> &[Decimal] {
        &self.prices
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.prices.len() == self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut window = PriceWindow::new(5);
        for i in 1..=20 {
            window.push(Decimal::from(i));
            assert!(window.len() <= 5);
        }
        assert!(window.is_full());
    }

    #[test]
    fn test_fifo_eviction() {
        let mut window = PriceWindow::new(3);
        window.push(dec!(1));
        window.push(dec!(2));
        window.push(dec!(3));
        window.push(dec!(4));

        // Oldest (1) evicted, order preserved
        assert_eq!(window.snapshot(), &[dec!(2), dec!(3), dec!(4)]);
    }

    #[test]
    fn test_partial_fill() {
        let mut window = PriceWindow::new(100);
        window.push(dec!(42));
        assert_eq!(window.len(), 1);
        assert!(!window.is_full());
        assert_eq!(window.snapshot(), &[dec!(42)]);
    }
}
