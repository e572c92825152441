//! Normalized ratio -> display color, and the legend built from it
//!
//! Three anchors: green-ish `#00cc00` near 0.0 (best), pure yellow at 0.5,
//! red near 1.0 (worst). Channels are truncated to whole bytes.

use serde::Serialize;

use crate::ratio::{is_no_data, normalize, BadnessDivisor};

/// Color for regions without data; outside the red-green scale.
pub const NO_DATA_COLOR: &str = "#9999aa";

pub const MIDPOINT_COLOR: &str = "#ffff00";

const LOWER_CLAMP: f64 = 0.0001;
const UPPER_CLAMP: f64 = 0.9999;

/// Ratio bands shown in the legend, best first
pub const LEGEND_GRADES: [f64; 6] = [2.0, 1.75, 1.5, 1.0, 0.5, 0.0];

/// Red/green channels for a clamped normalized value
pub fn channels(d: f64) -> (u8, u8, u8) {
    let d = d.clamp(LOWER_CLAMP, UPPER_CLAMP);
    if d == 0.5 {
        return (0xff, 0xff, 0x00);
    }
    if d < 0.5 {
        // red 0..255 and green 204..255 as d rises
        (byte(d * 510.0), byte(d * 102.0 + 204.0), 0)
    } else {
        // green 255..0 as d rises
        (0xff, byte(510.0 - d * 510.0), 0)
    }
}

fn byte(v: f64) -> u8 {
    v.floor().clamp(0.0, 255.0) as u8
}

/// Hex color (`#rrggbb`) for a normalized ratio; the no-data sentinel gets
/// `NO_DATA_COLOR`.
pub fn color_for(normalized: f64) -> String {
    if is_no_data(normalized) || normalized.is_nan() {
        return NO_DATA_COLOR.to_string();
    }
    let (r, g, b) = channels(normalized);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

/// One legend band, `upper`..`lower` in raw ratio terms
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub upper: f64,
    pub lower: f64,
    /// The top band covers everything above `upper` too
    pub open_ended: bool,
    pub color: String,
    pub label: String,
}

/// Legend bands for the current divisor, colored like a region whose ratio
/// sits at the band's lower bound.
pub fn legend(divisor: BadnessDivisor) -> Vec<LegendEntry> {
    LEGEND_GRADES
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let (upper, lower) = (pair[0], pair[1]);
            let open_ended = i == 0;
            LegendEntry {
                upper,
                lower,
                open_ended,
                color: color_for(normalize(lower, divisor)),
                label: format!(
                    "{}{:.2}\u{2013}{:.2}",
                    if open_ended { "+" } else { "" },
                    upper,
                    lower
                ),
            }
        })
        .collect()
}
