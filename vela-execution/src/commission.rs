use serde::{Deserialize, Serialize};

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Default,
)]
pub enum CommType {
    /// Commission is a fraction of traded value.
    #[default]
    Percent,
    /// Commission is a fixed amount per traded unit.
    PerUnit,
}

/// Cost model attached to a feed (or the broker default): commission,
/// contract multiplier, margin, leverage and credit interest.
///
/// `stocklike` instruments move full value through cash; futures-like ones
/// (`stocklike == false`) post margin per contract and settle pnl in cash.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct CommissionScheme {
    pub commission: f64,
    pub commtype: CommType,
    /// Percentage commissions given in absolute terms (0.001 == 0.1%);
    /// when false, `commission` is interpreted as a percentage (0.1 == 0.1%).
    pub percabs: bool,
    /// Contract multiplier applied to price moves.
    pub mult: f64,
    /// Fixed margin per contract for futures-like instruments.
    pub margin: Option<f64>,
    /// Non-zero: margin is `automargin * price` instead of the fixed value.
    pub automargin: f64,
    pub stocklike: bool,
    pub leverage: f64,
    /// Annual interest rate charged on short positions (and long ones when
    /// `interest_long` is set).
    pub interest: f64,
    pub interest_long: bool,
}

impl Default for CommissionScheme {
    fn default() -> Self {
        Self {
            commission: 0.0,
            commtype: CommType::Percent,
            percabs: true,
            mult: 1.0,
            margin: None,
            automargin: 0.0,
            stocklike: true,
            leverage: 1.0,
            interest: 0.0,
            interest_long: false,
        }
    }
}

impl CommissionScheme {
    /// Flat percentage commission (absolute fraction).
    pub fn percent(rate: f64) -> Self {
        Self {
            commission: rate,
            ..Self::default()
        }
    }

    /// Fixed amount per unit traded.
    pub fn per_unit(amount: f64) -> Self {
        Self {
            commission: amount,
            commtype: CommType::PerUnit,
            ..Self::default()
        }
    }

    /// Futures-like scheme: fixed margin per contract, price multiplier.
    pub fn futures(commission: f64, margin: f64, mult: f64) -> Self {
        Self {
            commission,
            commtype: CommType::PerUnit,
            margin: Some(margin),
            mult,
            stocklike: false,
            ..Self::default()
        }
    }

    /// Margin posted per contract at the given price.
    pub fn margin_per_unit(&self, price: f64) -> f64 {
        if self.automargin > 0.0 {
            self.automargin * price
        } else if self.automargin < 0.0 {
            price * self.mult
        } else {
            self.margin.unwrap_or(price)
        }
    }

    /// Maximum size affordable with `cash` at `price`, after leverage.
    pub fn get_size(&self, price: f64, cash: f64) -> f64 {
        if price <= 0.0 || cash <= 0.0 {
            return 0.0;
        }
        let unit_cost = if self.stocklike {
            price
        } else {
            self.margin_per_unit(price)
        };
        (self.leverage * (cash / unit_cost)).floor()
    }

    /// Cash needed to put on `size` units at `price`.
    pub fn operating_cost(&self, size: f64, price: f64) -> f64 {
        if self.stocklike {
            size.abs() * price
        } else {
            size.abs() * self.margin_per_unit(price)
        }
    }

    /// Signed monetary footprint of a position of `size` at `price`.
    pub fn value_size(&self, size: f64, price: f64) -> f64 {
        if self.stocklike {
            size * price
        } else {
            size * self.margin_per_unit(price)
        }
    }

    /// Commission charged for trading `size` units at `price`.
    pub fn commission_rate(&self, size: f64, price: f64) -> f64 {
        match self.commtype {
            CommType::PerUnit => size.abs() * self.commission,
            CommType::Percent => {
                let rate = if self.percabs {
                    self.commission
                } else {
                    self.commission / 100.0
                };
                size.abs() * price * rate
            }
        }
    }

    /// Realized profit of closing `size` units entered at `entry_price`.
    pub fn profit_and_loss(&self, size: f64, entry_price: f64, exit_price: f64) -> f64 {
        size * (exit_price - entry_price) * self.mult
    }

    /// Mark-to-market value of a position against the latest price.
    pub fn position_value(&self, size: f64, avg_price: f64, price: f64) -> f64 {
        if self.stocklike {
            size * price
        } else {
            size.abs() * self.margin_per_unit(avg_price)
                + self.profit_and_loss(size, avg_price, price)
        }
    }

    /// Credit interest accrued over `days` on a position's exposure.
    pub fn credit_interest(&self, days: f64, size: f64, price: f64) -> f64 {
        if self.interest == 0.0 {
            return 0.0;
        }
        let charge_long = self.interest_long && size > 0.0;
        if size < 0.0 || charge_long {
            days * (self.interest / 365.0) * size.abs() * price
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_commission_scales_with_value() {
        let scheme = CommissionScheme::percent(0.001);
        assert!((scheme.commission_rate(10.0, 100.0) - 1.0).abs() < 1e-12);
        // non-absolute percentage input
        let scheme = CommissionScheme {
            percabs: false,
            commission: 0.1,
            ..CommissionScheme::default()
        };
        assert!((scheme.commission_rate(10.0, 100.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn per_unit_commission_ignores_price() {
        let scheme = CommissionScheme::per_unit(0.5);
        assert_eq!(scheme.commission_rate(-10.0, 12_345.0), 5.0);
    }

    #[test]
    fn stocklike_costs_full_value() {
        let scheme = CommissionScheme::default();
        assert_eq!(scheme.operating_cost(10.0, 100.0), 1000.0);
        assert_eq!(scheme.value_size(-10.0, 100.0), -1000.0);
        assert_eq!(scheme.get_size(100.0, 1050.0), 10.0);
    }

    #[test]
    fn futures_cost_margin_and_settle_pnl() {
        let scheme = CommissionScheme::futures(2.0, 1000.0, 10.0);
        assert_eq!(scheme.operating_cost(3.0, 50_000.0), 3000.0);
        assert_eq!(scheme.profit_and_loss(3.0, 100.0, 105.0), 150.0);
        assert_eq!(scheme.position_value(3.0, 100.0, 105.0), 3150.0);
    }

    #[test]
    fn leverage_multiplies_affordable_size() {
        let scheme = CommissionScheme {
            leverage: 2.0,
            ..CommissionScheme::default()
        };
        assert_eq!(scheme.get_size(100.0, 1000.0), 20.0);
    }

    #[test]
    fn interest_accrues_on_shorts_only_by_default() {
        let scheme = CommissionScheme {
            interest: 0.365,
            ..CommissionScheme::default()
        };
        assert!((scheme.credit_interest(1.0, -10.0, 100.0) - 1.0).abs() < 1e-12);
        assert_eq!(scheme.credit_interest(1.0, 10.0, 100.0), 0.0);

        let scheme = CommissionScheme {
            interest_long: true,
            ..scheme
        };
        assert!((scheme.credit_interest(1.0, 10.0, 100.0) - 1.0).abs() < 1e-12);
    }
}
