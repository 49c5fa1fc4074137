use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, XlsxError};

use crate::calc::{self, Aggregate};
use crate::sheet::{ParsedSheet, ReservedHeader, StudentRow, RESULT_HEADERS};
use crate::template::{
    alt_row_fill, centered_bordered, header_format, sheet_title, subtitle_format, title_format,
    SheetContext, FILL_FAIL, FILL_PASS,
};

/// Result sheets download under one fixed name.
pub const RESULT_FILENAME: &str = "marksheet_result.xlsx";

#[derive(Debug, Clone)]
pub struct StudentResult {
    pub position: usize,
    pub name: String,
    pub roll_no: String,
    pub otp: Option<String>,
    /// Parallel to the parsed sheet's subject columns.
    pub marks: Vec<i64>,
    pub aggregate: Aggregate,
    pub rank: usize,
}

impl StudentResult {
    fn from_row(row: &StudentRow, full_mark: i64, pass_mark: i64, rank: usize) -> Self {
        StudentResult {
            position: row.position,
            name: row.name.clone(),
            roll_no: row.roll_no.clone(),
            otp: row.otp.clone(),
            marks: row.marks.clone(),
            aggregate: calc::aggregate_marks(&row.marks, full_mark, pass_mark),
            rank,
        }
    }
}

fn sheet_totals(parsed: &ParsedSheet) -> Vec<(usize, i64)> {
    parsed
        .rows
        .iter()
        .map(|r| (r.position, r.marks.iter().sum()))
        .collect()
}

/// Aggregates and ranks for every parsed student row.
///
/// Ranking runs over the complete total set before any per-row record is
/// built, so ranks never depend on row order.
pub fn compute_results(parsed: &ParsedSheet, full_mark: i64, pass_mark: i64) -> Vec<StudentResult> {
    let ranks = calc::dense_rank(&sheet_totals(parsed));

    parsed
        .rows
        .iter()
        .map(|row| {
            let rank = ranks.get(&row.position).copied().unwrap_or(0);
            StudentResult::from_row(row, full_mark, pass_mark, rank)
        })
        .collect()
}

fn left_aligned_bordered() -> Format {
    Format::new()
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin)
}

/// Styled result sheet: banners from the resolved context, the original
/// header plus the five computed columns, pass/fail coloring per subject
/// cell, ordinal ranks.
pub fn result_sheet(
    ctx: &SheetContext,
    parsed: &ParsedSheet,
    results: &[StudentResult],
    pass_mark: i64,
) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_title(&format!("{}-{}", ctx.class_grade, ctx.term)))?;

    let has_otp = parsed.otp_col.is_some();
    let mut headers: Vec<String> = vec![
        ReservedHeader::SerialNo.title().to_string(),
        ReservedHeader::StudentName.title().to_string(),
        ReservedHeader::RollNo.title().to_string(),
    ];
    if has_otp {
        headers.push(ReservedHeader::Otp.title().to_string());
    }
    headers.extend(parsed.subjects.iter().map(|s| s.name.clone()));
    headers.extend(RESULT_HEADERS.iter().map(|h| h.title().to_string()));
    let last_col = (headers.len() - 1) as u16;

    worksheet.merge_range(0, 0, 0, last_col, &ctx.school_banner(), &title_format())?;
    worksheet.merge_range(1, 0, 1, last_col, &ctx.class_banner(), &subtitle_format())?;
    // Row 2 spacer, as on the blank template.

    let header_fmt = header_format();
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(3, col as u16, header, &header_fmt)?;
    }

    let subject_base = if has_otp { 4u16 } else { 3u16 };
    let total_col = subject_base + parsed.subjects.len() as u16;
    let pass_fmt = centered_bordered().set_background_color(Color::RGB(FILL_PASS));
    let fail_fmt = centered_bordered().set_background_color(Color::RGB(FILL_FAIL));

    for result in results {
        let row = 3 + result.position as u32;
        let fill = Color::RGB(alt_row_fill(row + 1));
        let plain = centered_bordered().set_background_color(fill);
        let name_fmt = left_aligned_bordered().set_background_color(fill);

        worksheet.write_number_with_format(row, 0, result.position as f64, &plain)?;
        worksheet.write_string_with_format(row, 1, &result.name, &name_fmt)?;
        worksheet.write_string_with_format(row, 2, &result.roll_no, &plain)?;
        if has_otp {
            match &result.otp {
                Some(otp) => worksheet.write_string_with_format(row, 3, otp, &plain)?,
                None => worksheet.write_blank(row, 3, &plain)?,
            };
        }

        for (i, &mark) in result.marks.iter().enumerate() {
            let fmt = if mark < pass_mark { &fail_fmt } else { &pass_fmt };
            worksheet.write_number_with_format(row, subject_base + i as u16, mark as f64, fmt)?;
        }

        let agg = &result.aggregate;
        worksheet.write_number_with_format(row, total_col, agg.total as f64, &centered_bordered())?;
        worksheet.write_number_with_format(
            row,
            total_col + 1,
            agg.percentage,
            &left_aligned_bordered(),
        )?;
        worksheet.write_string_with_format(row, total_col + 2, agg.grade, &centered_bordered())?;
        let result_fmt = centered_bordered()
            .set_bold()
            .set_background_color(Color::RGB(if agg.passed { FILL_PASS } else { FILL_FAIL }));
        worksheet.write_string_with_format(row, total_col + 3, agg.result_label(), &result_fmt)?;
        worksheet.write_string_with_format(
            row,
            total_col + 4,
            &calc::ordinal(result.rank),
            &centered_bordered(),
        )?;
    }

    apply_result_widths(worksheet, &headers, results)?;
    worksheet.set_freeze_panes(4, 0)?;

    workbook.save_to_buffer()
}

fn apply_result_widths(
    worksheet: &mut rust_xlsxwriter::Worksheet,
    headers: &[String],
    results: &[StudentResult],
) -> Result<(), XlsxError> {
    for (col, header) in headers.iter().enumerate() {
        let mut max_len = header.chars().count();
        if col == 1 {
            for r in results {
                max_len = max_len.max(r.name.chars().count());
            }
        }
        let width = match col {
            0 => 5.0,
            1 => 25.0,
            _ => (max_len + 2) as f64,
        };
        worksheet.set_column_width(col as u16, width)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet;
    use calamine::{Data, Range, Reader, Xlsx};
    use std::io::Cursor;

    fn set(range: &mut Range<Data>, row: u32, col: u32, v: &str) {
        range.set_value((row, col), Data::String(v.to_string()));
    }

    fn two_student_grid() -> Range<Data> {
        let mut g = Range::new((0, 0), (5, 5));
        set(&mut g, 0, 0, "School: Hilltop Academy");
        set(&mut g, 1, 0, "Class: 8 | Section: B | Term: First Term");
        set(&mut g, 3, 0, "S.N.");
        set(&mut g, 3, 1, "Student Name");
        set(&mut g, 3, 2, "Roll No.");
        set(&mut g, 3, 3, "OTP");
        set(&mut g, 3, 4, "Math");
        set(&mut g, 3, 5, "Science");

        g.set_value((4, 0), Data::Int(1));
        set(&mut g, 4, 1, "Asha Rai");
        g.set_value((4, 2), Data::Int(1));
        set(&mut g, 4, 3, "482913");
        g.set_value((4, 4), Data::Int(40));
        g.set_value((4, 5), Data::Int(50));

        g.set_value((5, 0), Data::Int(2));
        set(&mut g, 5, 1, "Bikram Thapa");
        g.set_value((5, 2), Data::Int(2));
        set(&mut g, 5, 3, "771204");
        g.set_value((5, 4), Data::Int(20));
        g.set_value((5, 5), Data::Int(30));
        g
    }

    fn ctx() -> SheetContext {
        SheetContext {
            school: "Hilltop Academy".to_string(),
            class_grade: "8".to_string(),
            section: Some("B".to_string()),
            term: "First Term".to_string(),
        }
    }

    #[test]
    fn computes_the_import_scenario() {
        let parsed = sheet::parse_marksheet(&two_student_grid()).expect("parse");
        let results = compute_results(&parsed, 100, 33);
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.aggregate.total, 90);
        assert!((first.aggregate.percentage - 45.0).abs() < 1e-9);
        assert!(first.aggregate.passed);
        assert_eq!(first.aggregate.grade, "C");
        assert_eq!(first.rank, 1);

        let second = &results[1];
        assert_eq!(second.aggregate.total, 50);
        assert!(!second.aggregate.passed);
        assert_eq!(second.aggregate.grade, "-");
        assert_eq!(second.rank, 2);
    }

    #[test]
    fn tied_totals_share_rank_in_rendered_results() {
        let mut g = two_student_grid();
        // Bikram matches Asha's marks; both total 90.
        g.set_value((5, 4), Data::Int(40));
        g.set_value((5, 5), Data::Int(50));
        let parsed = sheet::parse_marksheet(&g).expect("parse");
        let results = compute_results(&parsed, 100, 33);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 1);
    }

    #[test]
    fn otp_located_row_carries_its_sheet_wide_rank() {
        let parsed = sheet::parse_marksheet(&two_student_grid()).expect("parse");
        let row = parsed.find_by_otp("771204").expect("match");
        let results = compute_results(&parsed, 100, 33);
        let record = results
            .iter()
            .find(|r| r.position == row.position)
            .expect("record");
        assert_eq!(record.rank, 2);
    }

    #[test]
    fn rendered_sheet_reparses_with_expected_cells() {
        let parsed = sheet::parse_marksheet(&two_student_grid()).expect("parse");
        let results = compute_results(&parsed, 100, 33);
        let bytes = result_sheet(&ctx(), &parsed, &results, 33).expect("render");

        let mut workbook = Xlsx::new(Cursor::new(bytes)).expect("open");
        let range = workbook
            .worksheet_range_at(0)
            .expect("sheet")
            .expect("readable");

        // Header gained the five computed columns after the subjects.
        assert_eq!(sheet::cell_text(&range, 3, 6), "Total");
        assert_eq!(sheet::cell_text(&range, 3, 10), "Rank");

        // First student: 90 total, 45%, PASS, C, 1st.
        assert_eq!(sheet::cell_text(&range, 4, 6), "90");
        assert_eq!(sheet::cell_text(&range, 4, 7), "45");
        assert_eq!(sheet::cell_text(&range, 4, 8), "C");
        assert_eq!(sheet::cell_text(&range, 4, 9), "PASS");
        assert_eq!(sheet::cell_text(&range, 4, 10), "1st");

        // Second student: failing row keeps the sentinel grade.
        assert_eq!(sheet::cell_text(&range, 5, 6), "50");
        assert_eq!(sheet::cell_text(&range, 5, 8), "-");
        assert_eq!(sheet::cell_text(&range, 5, 9), "FAIL");
        assert_eq!(sheet::cell_text(&range, 5, 10), "2nd");

        // And the whole thing still parses as a marksheet.
        let reparsed = sheet::parse_marksheet(&range).expect("reparse");
        assert_eq!(reparsed.subject_names(), vec!["Math", "Science"]);
        assert_eq!(reparsed.rows.len(), 2);
    }
}
