use crate::order::SIZE_EPSILON;
use serde::{Deserialize, Serialize};

/// Net position in one feed: signed size and volume-weighted average entry
/// price of the open portion.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct Position {
    pub size: f64,
    pub price: f64,
    /// Timestamp of the last update.
    pub dt: f64,
}

/// Split of one fill into position-changing portions.
///
/// `opened` is the part that extended (or flipped into) a position,
/// `closed` the part that reduced an existing one; both carry the sign of
/// the fill. `opened + closed == fill size`.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct PositionUpdate {
    pub size: f64,
    pub price: f64,
    pub opened: f64,
    pub closed: f64,
}

impl Position {
    pub fn new(size: f64, price: f64) -> Self {
        Self {
            size,
            price,
            dt: f64::NAN,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size.abs() <= SIZE_EPSILON
    }

    pub fn is_long(&self) -> bool {
        self.size > SIZE_EPSILON
    }

    pub fn is_short(&self) -> bool {
        self.size < -SIZE_EPSILON
    }

    /// Apply a fill of `size` at `price`, returning the opened/closed
    /// split. The average price is recalculated only on the opened
    /// portion; a position returning to flat resets it to zero.
    pub fn update(&mut self, size: f64, price: f64, dt: f64) -> PositionUpdate {
        let oldsize = self.size;
        self.size += size;
        self.dt = dt;

        let (opened, closed) = if oldsize.abs() <= SIZE_EPSILON {
            // opening from flat
            (size, 0.0)
        } else if oldsize * size >= 0.0 {
            // extending the existing direction
            (size, 0.0)
        } else if self.size * oldsize > 0.0 {
            // reduced but not crossed
            (0.0, size)
        } else {
            // crossed through flat: closed the old position, the remainder
            // opens the opposite direction
            (self.size, -oldsize)
        };

        if opened != 0.0 {
            if oldsize * opened > 0.0 {
                // weighted average over the extended portion
                self.price = (self.price * oldsize + price * opened) / self.size;
            } else {
                // fresh direction
                self.price = price;
            }
        }
        if self.size.abs() <= SIZE_EPSILON {
            self.size = 0.0;
            self.price = 0.0;
        }

        PositionUpdate {
            size: self.size,
            price: self.price,
            opened,
            closed,
        }
    }

    /// The update a fill would produce, without mutating the position.
    pub fn pseudo_update(&self, size: f64, price: f64) -> PositionUpdate {
        let mut clone = *self;
        clone.update(size, price, self.dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_from_flat() {
        let mut pos = Position::default();
        let upd = pos.update(10.0, 100.0, 1.0);
        assert_eq!(upd.opened, 10.0);
        assert_eq!(upd.closed, 0.0);
        assert_eq!(pos.size, 10.0);
        assert_eq!(pos.price, 100.0);
    }

    #[test]
    fn extend_long_reweights_average() {
        let mut pos = Position::new(10.0, 100.0);
        let upd = pos.update(10.0, 110.0, 1.0);
        assert_eq!(upd.opened, 10.0);
        assert_eq!(upd.closed, 0.0);
        assert_eq!(pos.size, 20.0);
        assert_eq!(pos.price, 105.0);
    }

    #[test]
    fn partial_close_keeps_average() {
        let mut pos = Position::new(10.0, 100.0);
        let upd = pos.update(-4.0, 120.0, 1.0);
        assert_eq!(upd.opened, 0.0);
        assert_eq!(upd.closed, -4.0);
        assert_eq!(pos.size, 6.0);
        assert_eq!(pos.price, 100.0);
    }

    #[test]
    fn exact_close_resets() {
        let mut pos = Position::new(10.0, 100.0);
        let upd = pos.update(-10.0, 120.0, 1.0);
        assert_eq!(upd.closed, -10.0);
        assert_eq!(upd.opened, 0.0);
        assert!(pos.is_flat());
        assert_eq!(pos.price, 0.0);
    }

    #[test]
    fn flip_long_to_short() {
        let mut pos = Position::new(10.0, 100.0);
        let upd = pos.update(-15.0, 120.0, 1.0);
        assert_eq!(upd.closed, -10.0);
        assert_eq!(upd.opened, -5.0);
        assert_eq!(pos.size, -5.0);
        assert_eq!(pos.price, 120.0);
    }

    #[test]
    fn flip_short_to_long() {
        let mut pos = Position::new(-5.0, 50.0);
        let upd = pos.update(8.0, 55.0, 1.0);
        assert_eq!(upd.closed, 5.0);
        assert_eq!(upd.opened, 3.0);
        assert_eq!(pos.size, 3.0);
        assert_eq!(pos.price, 55.0);
    }

    #[test]
    fn pseudo_update_leaves_the_position_untouched() {
        let pos = Position::new(10.0, 100.0);
        let upd = pos.pseudo_update(-15.0, 120.0);
        assert_eq!(upd.closed, -10.0);
        assert_eq!(upd.opened, -5.0);
        assert_eq!(pos.size, 10.0);
        assert_eq!(pos.price, 100.0);
    }
}
