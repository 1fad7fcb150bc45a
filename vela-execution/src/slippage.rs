use serde::{Deserialize, Serialize};

/// Slippage policy of the simulated broker.
///
/// Percent and fixed amounts are mutually exclusive, percent winning when
/// both are set. The four application flags are independent (see the
/// matching engine):
///
/// * `slip_open` - slip prices taken from a bar's open (gap fills).
/// * `slip_match` - when the slipped price leaves the bar's range, cap it
///   at high/low and still match; otherwise the order does not execute on
///   this bar.
/// * `slip_limit` - apply slippage to fills whose price was determined by
///   a limit (capped so the limit contract is never violated).
/// * `slip_out` - allow fills outside the bar's high/low range.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct SlippageConfig {
    pub perc: f64,
    pub fixed: f64,
    pub slip_open: bool,
    pub slip_match: bool,
    pub slip_limit: bool,
    pub slip_out: bool,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            perc: 0.0,
            fixed: 0.0,
            slip_open: false,
            slip_match: true,
            slip_limit: true,
            slip_out: false,
        }
    }
}

impl SlippageConfig {
    pub fn percent(perc: f64) -> Self {
        Self {
            perc,
            ..Self::default()
        }
    }

    pub fn fixed(fixed: f64) -> Self {
        Self {
            fixed,
            ..Self::default()
        }
    }

    fn amount(&self, price: f64) -> f64 {
        if self.perc != 0.0 {
            price * self.perc
        } else {
            self.fixed
        }
    }

    /// Slip a buy fill towards higher prices. `cap` is the worst price the
    /// fill may reach (bar high, or the limit price when tighter); `None`
    /// means the order does not match on this bar.
    pub fn slip_up(&self, price: f64, cap: f64, doslip: bool) -> Option<f64> {
        let slip = self.amount(price);
        if !doslip || slip == 0.0 {
            return Some(price);
        }
        let slipped = price + slip;
        if self.slip_out || slipped <= cap {
            Some(slipped)
        } else if self.slip_match {
            Some(cap)
        } else {
            None
        }
    }

    /// Slip a sell fill towards lower prices; mirror of [`Self::slip_up`].
    pub fn slip_down(&self, price: f64, cap: f64, doslip: bool) -> Option<f64> {
        let slip = self.amount(price);
        if !doslip || slip == 0.0 {
            return Some(price);
        }
        let slipped = price - slip;
        if self.slip_out || slipped >= cap {
            Some(slipped)
        } else if self.slip_match {
            Some(cap)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_slippage_passes_prices_through() {
        let slip = SlippageConfig::default();
        assert_eq!(slip.slip_up(100.0, 101.0, true), Some(100.0));
        assert_eq!(slip.slip_down(100.0, 99.0, true), Some(100.0));
    }

    #[test]
    fn fixed_slippage_caps_at_the_bar_range() {
        // mirror of the expected sell executions: open 1297.5, low 1293.1
        let cases = [
            (0.0, 1297.5),
            (3.0, 1294.5),
            (4.0, 1293.5),
            (5.0, 1293.1),
            (10.0, 1293.1),
        ];
        for (fixed, expected) in cases {
            let slip = SlippageConfig::fixed(fixed);
            assert_eq!(slip.slip_down(1297.5, 1293.1, true), Some(expected));
        }
    }

    #[test]
    fn without_match_the_order_skips_the_bar() {
        let slip = SlippageConfig {
            slip_match: false,
            ..SlippageConfig::fixed(5.0)
        };
        assert_eq!(slip.slip_up(100.0, 103.0, true), None);
        assert_eq!(slip.slip_up(100.0, 106.0, true), Some(105.0));
    }

    #[test]
    fn slip_out_ignores_the_range() {
        let slip = SlippageConfig {
            slip_out: true,
            ..SlippageConfig::fixed(5.0)
        };
        assert_eq!(slip.slip_up(100.0, 101.0, true), Some(105.0));
    }

    #[test]
    fn percent_takes_precedence_over_fixed() {
        let slip = SlippageConfig {
            perc: 0.01,
            fixed: 50.0,
            ..SlippageConfig::default()
        };
        assert_eq!(slip.slip_up(100.0, 200.0, true), Some(101.0));
    }
}
