use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, XlsxError};

use crate::sheet::{
    ReservedHeader, CLASS_LABEL, SCHOOL_LABEL, SECTION_LABEL, SHEET_TITLE_MAX, TERM_LABEL,
};

pub const ACCENT: u32 = 0x4F81BD;
pub const FILL_PASS: u32 = 0xC6EFCE;
pub const FILL_FAIL: u32 = 0xFFC7CE;
const FILL_ALT_ODD: u32 = 0xF2F2F2;
const FILL_ALT_EVEN: u32 = 0xFFFFFF;

/// Everything needed to label a sheet: authoritative entity names, already
/// resolved by the caller.
#[derive(Debug, Clone)]
pub struct SheetContext {
    pub school: String,
    pub class_grade: String,
    pub section: Option<String>,
    pub term: String,
}

impl SheetContext {
    pub fn class_banner(&self) -> String {
        format!(
            "{} {} | {} {} | {} {}",
            CLASS_LABEL,
            self.class_grade,
            SECTION_LABEL,
            self.section.as_deref().unwrap_or("-"),
            TERM_LABEL,
            self.term
        )
    }

    pub fn school_banner(&self) -> String {
        format!("{} {}", SCHOOL_LABEL, self.school)
    }
}

/// Worksheet title stripped of the characters Excel rejects in sheet names,
/// truncated to the 31-character limit.
pub fn sheet_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(SHEET_TITLE_MAX)
        .collect();
    if cleaned.is_empty() {
        "Marksheet".to_string()
    } else {
        cleaned
    }
}

pub fn blank_filename(class_grade: &str, term: &str) -> String {
    format!("marksheet_{}_{}.xlsx", class_grade, term)
}

pub fn term_template_filename(term: &str, class_grade: &str, section: Option<&str>) -> String {
    match section {
        Some(s) => format!("{}_{}_{}_marksheet.xlsx", term, class_grade, s),
        None => format!("{}_{}_marksheet.xlsx", term, class_grade),
    }
}

pub(crate) fn title_format() -> Format {
    Format::new()
        .set_bold()
        .set_font_size(18)
        .set_font_color(Color::RGB(ACCENT))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
}

pub(crate) fn subtitle_format() -> Format {
    Format::new()
        .set_bold()
        .set_font_size(12)
        .set_font_color(Color::RGB(ACCENT))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
}

pub(crate) fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_font_color(Color::RGB(0xFFFFFF))
        .set_background_color(Color::RGB(ACCENT))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin)
}

pub(crate) fn centered_bordered() -> Format {
    Format::new()
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin)
}

pub(crate) fn alt_row_fill(sheet_row_1_based: u32) -> u32 {
    if sheet_row_1_based % 2 == 1 {
        FILL_ALT_ODD
    } else {
        FILL_ALT_EVEN
    }
}

fn fixed_leading_headers() -> [&'static str; 4] {
    [
        ReservedHeader::SerialNo.title(),
        ReservedHeader::StudentName.title(),
        ReservedHeader::RollNo.title(),
        ReservedHeader::Otp.title(),
    ]
}

/// Column widths: S.N. narrow, name wide, roll and OTP fixed, subject columns
/// sized to their header text.
fn apply_column_widths(
    worksheet: &mut rust_xlsxwriter::Worksheet,
    headers: &[String],
) -> Result<(), XlsxError> {
    for (col, header) in headers.iter().enumerate() {
        let width = match col {
            0 => 5.0,
            1 => 25.0,
            2 => 10.0,
            3 => 15.0,
            _ => (header.chars().count() + 2) as f64,
        };
        worksheet.set_column_width(col as u16, width)?;
    }
    Ok(())
}

/// Styled blank marksheet for manual entry: banner rows, bordered header,
/// `blank_rows` pre-filled serial/roll rows, header frozen.
pub fn blank_marksheet(
    ctx: &SheetContext,
    subjects: &[String],
    blank_rows: u32,
) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_title(&format!("{}-{}", ctx.class_grade, ctx.term)))?;

    let mut headers: Vec<String> = fixed_leading_headers()
        .iter()
        .map(|s| s.to_string())
        .collect();
    headers.extend(subjects.iter().cloned());
    let last_col = (headers.len() - 1) as u16;

    worksheet.merge_range(0, 0, 0, last_col, &ctx.school_banner(), &title_format())?;
    worksheet.merge_range(1, 0, 1, last_col, &ctx.class_banner(), &subtitle_format())?;
    // Row 2 stays empty as a spacer.

    let header_fmt = header_format();
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(3, col as u16, header, &header_fmt)?;
    }

    for i in 0..blank_rows {
        let row = 4 + i;
        let fill = alt_row_fill(row + 1);
        let fmt = centered_bordered().set_background_color(Color::RGB(fill));
        worksheet.write_number_with_format(row, 0, (i + 1) as f64, &fmt)?;
        worksheet.write_blank(row, 1, &fmt)?;
        worksheet.write_number_with_format(row, 2, (i + 1) as f64, &fmt)?;
        worksheet.write_blank(row, 3, &fmt)?;
        for col in 4..headers.len() {
            worksheet.write_blank(row, col as u16, &fmt)?;
        }
    }

    apply_column_widths(worksheet, &headers)?;
    worksheet.set_freeze_panes(4, 0)?;

    workbook.save_to_buffer()
}

/// Plain pre-fill template: header at row 1, serial numbers only, no styling.
/// Used where the admin wants a bare grid rather than the branded sheet.
pub fn term_template(
    ctx: &SheetContext,
    subjects: &[String],
    rows: u32,
) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_title(&format!("{} Marksheet", ctx.term)))?;

    let mut headers: Vec<String> = fixed_leading_headers()
        .iter()
        .map(|s| s.to_string())
        .collect();
    headers.extend(subjects.iter().cloned());
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string(0, col as u16, header)?;
    }

    for i in 0..rows {
        worksheet.write_number(1 + i, 0, (i + 1) as f64)?;
    }

    workbook.save_to_buffer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet;
    use calamine::{Reader, Xlsx};
    use std::io::Cursor;

    fn parse_buffer(bytes: Vec<u8>) -> calamine::Range<calamine::Data> {
        let mut workbook = Xlsx::new(Cursor::new(bytes)).expect("open generated xlsx");
        workbook
            .worksheet_range_at(0)
            .expect("sheet exists")
            .expect("sheet readable")
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
    fn sheet_title_strips_illegal_chars_and_truncates() {
        assert_eq!(sheet_title("8-First Term"), "8-First Term");
        assert_eq!(sheet_title("a[b]c:d*e?f/g\\h"), "abcdefgh");
        let long = "x".repeat(40);
        assert_eq!(sheet_title(&long).chars().count(), 31);
        assert_eq!(sheet_title(":*?"), "Marksheet");
    }

    #[test]
    fn filenames_derive_from_grade_and_term() {
        assert_eq!(blank_filename("8", "First Term"), "marksheet_8_First Term.xlsx");
        assert_eq!(
            term_template_filename("First Term", "8", Some("B")),
            "First Term_8_B_marksheet.xlsx"
        );
        assert_eq!(
            term_template_filename("First Term", "8", None),
            "First Term_8_marksheet.xlsx"
        );
    }

    #[test]
    fn blank_template_round_trips_through_the_parser() {
        let subjects = vec!["Math".to_string(), "Science".to_string()];
        let bytes = blank_marksheet(&ctx(), &subjects, 5).expect("generate");
        let range = parse_buffer(bytes);

        let parsed = sheet::parse_marksheet(&range).expect("parse");
        assert_eq!(parsed.subject_names(), vec!["Math", "Science"]);
        assert!(parsed.rows.is_empty());
        assert_eq!(parsed.meta.school, "Hilltop Academy");
        assert_eq!(parsed.meta.class_grade, "8");
        assert_eq!(parsed.meta.section, "B");
        assert_eq!(parsed.meta.term, "First Term");
    }

    #[test]
    fn blank_template_prefills_serial_and_roll() {
        let subjects = vec!["Math".to_string()];
        let bytes = blank_marksheet(&ctx(), &subjects, 3).expect("generate");
        let range = parse_buffer(bytes);

        for i in 0..3u32 {
            assert_eq!(sheet::cell_text(&range, 4 + i, 0), (i + 1).to_string());
            assert_eq!(sheet::cell_text(&range, 4 + i, 2), (i + 1).to_string());
        }
        // No fourth pre-filled row.
        assert_eq!(sheet::cell_text(&range, 7, 0), "");
    }

    #[test]
    fn term_template_has_flat_header_and_serials() {
        let subjects = vec!["Math".to_string(), "Science".to_string()];
        let bytes = term_template(&ctx(), &subjects, 4).expect("generate");
        let range = parse_buffer(bytes);

        assert_eq!(sheet::cell_text(&range, 0, 0), "S.N.");
        assert_eq!(sheet::cell_text(&range, 0, 3), "OTP");
        assert_eq!(sheet::cell_text(&range, 0, 4), "Math");
        assert_eq!(sheet::cell_text(&range, 0, 5), "Science");
        assert_eq!(sheet::cell_text(&range, 1, 0), "1");
        assert_eq!(sheet::cell_text(&range, 4, 0), "4");
    }
}
