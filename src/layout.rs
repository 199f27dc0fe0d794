//! Mapping between scan positions and image coordinates.
//!
//! The panels are refreshed one row-select group at a time. At any instant
//! every output shifts out one column of one row, so a physical scan position
//! is an `(output, row_select, column)` triple. A [`ScanLayout`] says which
//! image pixel each triple displays.
//!
//! Currently supported layouts:
//! - [`Octoscroller`]

use embedded_graphics::prelude::Point;

use crate::{HEIGHT, OUTPUTS, SCANS, SCAN_WIDTH, WIDTH};

/// One physical scan position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScanPosition {
    /// Half-connector index, `0..OUTPUTS`.
    pub output: usize,
    /// Row-select value, `0..SCANS`.
    pub row_select: usize,
    /// Column within the scan row, `0..SCAN_WIDTH`.
    pub column: usize,
}

impl ScanPosition {
    /// A scan position from its three coordinates.
    #[must_use]
    pub const fn new(output: usize, row_select: usize, column: usize) -> Self {
        Self {
            output,
            row_select,
            column,
        }
    }
}

/// Trait for scan layouts
///
/// Implementors map every scan position to a distinct pixel of the
/// `WIDTH` x `HEIGHT` image, and back.
pub trait ScanLayout {
    /// Rows covered by a single output.
    const OUTPUT_ROWS: usize;
    /// Columns covered by a single output.
    const OUTPUT_COLS: usize;

    /// The image pixel `(x, y)` shown at a scan position.
    ///
    /// For every position inside the scan geometry the result must satisfy
    /// `x < WIDTH` and `y < HEIGHT`; the encoder reads that pixel unchecked
    /// by layout and panics otherwise.
    fn locate(position: ScanPosition) -> (usize, usize);

    /// The scan position showing image pixel `(x, y)`, if it is on a panel.
    fn scan_position(x: usize, y: usize) -> Option<ScanPosition>;

    /// [`ScanLayout::locate`] as an `embedded-graphics` point.
    #[inline]
    #[must_use]
    fn locate_point(position: ScanPosition) -> Point {
        let (x, y) = Self::locate(position);
        Point::new(x as i32, y as i32)
    }

    /// The scan position for a point, `None` for points off the panels.
    #[inline]
    #[must_use]
    fn point_position(point: Point) -> Option<ScanPosition> {
        if point.x < 0 || point.y < 0 {
            return None;
        }
        Self::scan_position(point.x as usize, point.y as usize)
    }
}

/// Layout of the Octoscroller cape.
///
/// Outputs are stacked eight high in two columns: output `o` drives a
/// 64 x 16 strip whose top-left pixel is `(64 * (o / 8), 16 * (o % 8))`.
/// Within a strip the row select picks the row and the column is the
/// x offset.
#[derive(Clone, Copy, Debug, Default)]
pub struct Octoscroller;

impl Octoscroller {
    /// Outputs stacked vertically in each column of strips.
    pub const OUTPUTS_HIGH: usize = OUTPUTS / 2;
}

impl ScanLayout for Octoscroller {
    const OUTPUT_ROWS: usize = SCANS;
    const OUTPUT_COLS: usize = SCAN_WIDTH;

    #[inline]
    fn locate(position: ScanPosition) -> (usize, usize) {
        let panel_x = position.output / Self::OUTPUTS_HIGH;
        let panel_y = position.output % Self::OUTPUTS_HIGH;
        (
            panel_x * Self::OUTPUT_COLS + position.column,
            panel_y * Self::OUTPUT_ROWS + position.row_select,
        )
    }

    fn scan_position(x: usize, y: usize) -> Option<ScanPosition> {
        if x >= WIDTH || y >= HEIGHT {
            return None;
        }
        let panel_x = x / Self::OUTPUT_COLS;
        let panel_y = y / Self::OUTPUT_ROWS;
        Some(ScanPosition {
            output: panel_x * Self::OUTPUTS_HIGH + panel_y,
            row_select: y % Self::OUTPUT_ROWS,
            column: x % Self::OUTPUT_COLS,
        })
    }
}

const _: () = assert!(Octoscroller::OUTPUTS_HIGH * SCANS == HEIGHT);
const _: () = assert!(2 * SCAN_WIDTH == WIDTH);
