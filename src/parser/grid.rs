//! Merged-cell tables → rectangular logical grid, plus header/day discovery.

use chrono::NaiveDate;
use scraper::ElementRef;
use std::collections::BTreeMap;

use super::text::{DayLabel, element_text, parse_day_label};

/// HTML caps `colspan` at 1000 and `rowspan` at 65534.
const MAX_COLSPAN: usize = 1000;
const MAX_ROWSPAN: usize = 65534;

// ── Grid ──────────────────────────────────────────────────────────────────────

/// One logical grid position and the physical cell that covers it.
#[derive(Debug, Clone, Copy)]
pub struct GridCell<'a> {
    pub source: ElementRef<'a>,
    /// Row / column where the source cell starts.
    pub row: usize,
    pub col: usize,
}

impl GridCell<'_> {
    pub fn same_source(&self, other: &GridCell<'_>) -> bool {
        self.source.id() == other.source.id()
    }

    pub fn text(&self) -> String {
        element_text(self.source)
    }
}

/// Row-major arena of `height * width` slots.
#[derive(Debug, Clone)]
pub struct TableGrid<'a> {
    cells: Vec<Option<GridCell<'a>>>,
    row_widths: Vec<usize>,
    pub width: usize,
    pub height: usize,
}

impl<'a> TableGrid<'a> {
    pub fn get(&self, row: usize, col: usize) -> Option<&GridCell<'a>> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.cells[row * self.width + col].as_ref()
    }

    /// The source cell at `(row, col)` only if it starts in `row`.
    pub fn origin_cell(&self, row: usize, col: usize) -> Option<ElementRef<'a>> {
        self.get(row, col)
            .filter(|cell| cell.row == row)
            .map(|cell| cell.source)
    }

    /// Logical length of one row before padding to `width`.
    pub fn row_width(&self, row: usize) -> usize {
        self.row_widths.get(row).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingSpan<'a> {
    cell: GridCell<'a>,
    remaining: usize,
}

fn span_attr(cell: ElementRef<'_>, name: &str, max: usize) -> usize {
    cell.value()
        .attr(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, max)
}

fn place<'a>(row: &mut Vec<Option<GridCell<'a>>>, col: usize, cell: GridCell<'a>) {
    if row.len() <= col {
        row.resize(col + 1, None);
    }
    row[col] = Some(cell);
}

fn is_taken(row: &[Option<GridCell<'_>>], col: usize) -> bool {
    row.get(col).is_some_and(Option::is_some)
}

/// `<tr>` children of the table and of its row groups, in document order.
/// Rows of nested tables are not included.
pub fn table_rows<'a>(table: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| el.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

pub fn row_cells<'a>(row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

/// Normalise a table with `colspan`/`rowspan` into a rectangular grid.
pub fn build_table_grid(table: ElementRef<'_>) -> TableGrid<'_> {
    let mut rows: Vec<Vec<Option<GridCell<'_>>>> = Vec::new();
    let mut pending: BTreeMap<usize, PendingSpan<'_>> = BTreeMap::new();

    for (row_index, tr) in table_rows(table).into_iter().enumerate() {
        let mut current = Vec::new();

        // Columns still covered by rowspans from earlier rows.
        pending.retain(|&col, span| {
            place(&mut current, col, span.cell);
            span.remaining -= 1;
            span.remaining > 0
        });

        let mut col = 0;
        for td in row_cells(tr) {
            while is_taken(&current, col) {
                col += 1;
            }

            let colspan = span_attr(td, "colspan", MAX_COLSPAN);
            let rowspan = span_attr(td, "rowspan", MAX_ROWSPAN);
            let cell = GridCell {
                source: td,
                row: row_index,
                col,
            };

            for offset in 0..colspan {
                place(&mut current, col + offset, cell);
                if rowspan > 1 {
                    pending.insert(
                        col + offset,
                        PendingSpan {
                            cell,
                            remaining: rowspan - 1,
                        },
                    );
                }
            }

            col += colspan;
        }

        rows.push(current);
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let height = rows.len();
    let row_widths = rows.iter().map(Vec::len).collect();

    let mut cells = Vec::with_capacity(width * height);
    for mut row in rows {
        row.resize(width, None);
        cells.extend(row);
    }

    TableGrid {
        cells,
        row_widths,
        width,
        height,
    }
}

// ── Header / day ranges ───────────────────────────────────────────────────────

/// A header date and the grid columns it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayRange {
    pub date: String,
    pub weekday: Option<String>,
    pub start_column: usize,
    pub column_span: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HeaderOptions {
    pub max_scan_rows: usize,
    pub min_days: usize,
    pub today: NaiveDate,
}

fn cell_label(cell: &GridCell<'_>, today: NaiveDate) -> Option<DayLabel> {
    parse_day_label(&cell.text(), today)
}

/// Index of the row listing the most distinct consecutive day labels.
pub fn find_header_row(grid: &TableGrid<'_>, opts: &HeaderOptions) -> Option<usize> {
    let mut best: Option<usize> = None;
    let mut best_score = 0usize;

    for row in 0..grid.height.min(opts.max_scan_rows) {
        let mut score = 0;
        let mut last_day: Option<String> = None;

        for col in 0..grid.row_width(row) {
            let Some(label) = grid.get(row, col).and_then(|c| cell_label(c, opts.today)) else {
                continue;
            };
            if last_day.as_deref() != Some(label.date.as_str()) {
                score += 1;
                last_day = Some(label.date);
            }
        }

        if score > best_score {
            best_score = score;
            best = Some(row);
        }
    }

    if best_score < opts.min_days {
        return None;
    }
    best
}

/// Group header columns into one range per day.
///
/// Columns of the same header cell, and unlabeled filler columns after it,
/// belong to that day.
pub fn day_ranges(grid: &TableGrid<'_>, header_row: usize, today: NaiveDate) -> Vec<DayRange> {
    let width = grid.row_width(header_row);
    let mut ranges = Vec::new();
    let mut col = 0;

    while col < width {
        let Some(cell) = grid.get(header_row, col) else {
            col += 1;
            continue;
        };
        let Some(label) = cell_label(cell, today) else {
            col += 1;
            continue;
        };

        let mut span = 1;
        while col + span < width
            && grid
                .get(header_row, col + span)
                .is_some_and(|next| next.same_source(cell))
        {
            span += 1;
        }

        while col + span < width {
            match grid.get(header_row, col + span) {
                None => span += 1,
                Some(next) if cell_label(next, today).is_some() => break,
                Some(_) => span += 1,
            }
        }

        ranges.push(DayRange {
            date: label.date,
            weekday: label.weekday,
            start_column: col,
            column_span: span,
        });

        col += span;
    }

    ranges
}

/// Header row and day ranges of a timetable table, or `None` for any other table.
pub fn locate_days(grid: &TableGrid<'_>, opts: &HeaderOptions) -> Option<(usize, Vec<DayRange>)> {
    let header_row = find_header_row(grid, opts)?;
    let ranges = day_ranges(grid, header_row, opts.today);
    if ranges.len() < opts.min_days {
        return None;
    }
    Some((header_row, ranges))
}
