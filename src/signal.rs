//! Signal detection (component D): LONG/SHORT entry rules plus latched
//! direction invalidation.
//!
//! A signal is derived purely from the latest [`IndicatorSnapshot`] and the
//! currently latched direction, if any. LONG and SHORT are mutually
//! exclusive by construction: their price/colour conditions cannot both
//! hold on the same bar.

use crate::indicators::{IndicatorSnapshot, MomentumColor, TrendColor};
use crate::types::Side;

/// A freshly detected entry signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub side: Side,
}

/// LONG iff open below the trend line, close above it, the trend line is
/// blue, and momentum colour is MAROON or LIME (transitioning-up or
/// sustained-up).
fn is_long(snap: &IndicatorSnapshot) -> bool {
    snap.open_price < snap.tm_value
        && snap.current_price > snap.tm_value
        && snap.tm_color == TrendColor::Blue
        && matches!(snap.momentum_color, MomentumColor::Maroon | MomentumColor::Lime)
}

/// SHORT iff open above the trend line, close below it, the trend line is
/// red, and momentum colour is GREEN or RED (transitioning-down or
/// sustained-down).
fn is_short(snap: &IndicatorSnapshot) -> bool {
    snap.open_price > snap.tm_value
        && snap.current_price < snap.tm_value
        && snap.tm_color == TrendColor::Red
        && matches!(snap.momentum_color, MomentumColor::Green | MomentumColor::Red)
}

/// Evaluate the snapshot for a fresh entry signal. Returns `None` when
/// neither the LONG nor the SHORT condition holds.
pub fn detect(snap: &IndicatorSnapshot) -> Option<Signal> {
    if is_long(snap) {
        Some(Signal { side: Side::Long })
    } else if is_short(snap) {
        Some(Signal { side: Side::Short })
    } else {
        None
    }
}

/// Whether a previously latched direction is still supported by the
/// current snapshot. A LONG latch requires the trend line to still be
/// blue and momentum colour still in the permitted up-set; symmetrically
/// for SHORT. Used to clear a latched signal once context no longer
/// supports it, independent of whether a fresh signal re-fires.
pub fn still_supported(side: Side, snap: &IndicatorSnapshot) -> bool {
    match side {
        Side::Long => {
            snap.tm_color == TrendColor::Blue
                && matches!(snap.momentum_color, MomentumColor::Maroon | MomentumColor::Lime)
        }
        Side::Short => {
            snap.tm_color == TrendColor::Red
                && matches!(snap.momentum_color, MomentumColor::Green | MomentumColor::Red)
        }
    }
}
