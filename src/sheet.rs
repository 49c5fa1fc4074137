use std::fmt;
use std::path::Path;

use anyhow::Context;
use calamine::{open_workbook, Data, Range, Reader, Xlsx};

/// 0-based row of the column header line. Rows 0..=2 hold the school banner,
/// the class/section/term banner and a spacer.
pub const HEADER_ROW: u32 = 3;

/// Excel's hard limit on worksheet title length.
pub const SHEET_TITLE_MAX: usize = 31;

pub const SCHOOL_LABEL: &str = "School:";
pub const CLASS_LABEL: &str = "Class:";
pub const SECTION_LABEL: &str = "Section:";
pub const TERM_LABEL: &str = "Term:";

/// Header names with fixed meaning. Everything else in the header row is a
/// subject column. One table for every code path that classifies columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedHeader {
    SerialNo,
    StudentName,
    RollNo,
    Otp,
    Total,
    Percentage,
    Grade,
    Result,
    Rank,
}

impl ReservedHeader {
    pub fn match_header(raw: &str) -> Option<ReservedHeader> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "S.N." | "SN" => Some(ReservedHeader::SerialNo),
            "STUDENT NAME" | "NAME" => Some(ReservedHeader::StudentName),
            "ROLL NO." | "ROLL NO" => Some(ReservedHeader::RollNo),
            "OTP" => Some(ReservedHeader::Otp),
            "TOTAL" => Some(ReservedHeader::Total),
            "PERCENTAGE" => Some(ReservedHeader::Percentage),
            "GRADE" => Some(ReservedHeader::Grade),
            "RESULT" => Some(ReservedHeader::Result),
            "RANK" => Some(ReservedHeader::Rank),
            _ => None,
        }
    }

    /// Canonical header text used when generating sheets.
    pub fn title(self) -> &'static str {
        match self {
            ReservedHeader::SerialNo => "S.N.",
            ReservedHeader::StudentName => "Student Name",
            ReservedHeader::RollNo => "Roll No.",
            ReservedHeader::Otp => "OTP",
            ReservedHeader::Total => "Total",
            ReservedHeader::Percentage => "Percentage",
            ReservedHeader::Grade => "Grade",
            ReservedHeader::Result => "Result",
            ReservedHeader::Rank => "Rank",
        }
    }
}

/// The five computed columns appended to a result sheet, in order.
pub const RESULT_HEADERS: [ReservedHeader; 5] = [
    ReservedHeader::Total,
    ReservedHeader::Percentage,
    ReservedHeader::Grade,
    ReservedHeader::Result,
    ReservedHeader::Rank,
];

#[derive(Debug, Clone)]
pub struct SheetError {
    pub code: &'static str,
    pub message: String,
}

impl SheetError {
    pub fn not_found(message: impl Into<String>) -> Self {
        SheetError {
            code: "not_found",
            message: message.into(),
        }
    }

    pub fn bad_sheet(message: impl Into<String>) -> Self {
        SheetError {
            code: "bad_sheet",
            message: message.into(),
        }
    }
}

impl fmt::Display for SheetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SheetError {}

/// Free-text metadata from the banner rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetMeta {
    pub school: String,
    pub class_grade: String,
    pub section: String,
    pub term: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectColumn {
    pub col: u32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    /// 1-based order within the parsed sheet.
    pub position: usize,
    /// Absolute sheet row the record came from.
    pub row: u32,
    pub name: String,
    pub roll_no: String,
    pub otp: Option<String>,
    /// Parallel to `ParsedSheet::subjects`.
    pub marks: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct ParsedSheet {
    pub meta: SheetMeta,
    pub subjects: Vec<SubjectColumn>,
    pub otp_col: Option<u32>,
    pub rows: Vec<StudentRow>,
}

impl ParsedSheet {
    pub fn subject_names(&self) -> Vec<String> {
        self.subjects.iter().map(|s| s.name.clone()).collect()
    }

    /// Locate a student row by OTP token, exact match after trimming.
    /// The column check happens before any row is scanned.
    pub fn find_by_otp(&self, token: &str) -> Result<&StudentRow, SheetError> {
        if self.otp_col.is_none() {
            return Err(SheetError::not_found("OTP column not found in sheet"));
        }
        let wanted = token.trim();
        self.rows
            .iter()
            .find(|r| r.otp.as_deref().map(str::trim) == Some(wanted))
            .ok_or_else(|| SheetError::not_found("no student matched the supplied OTP"))
    }
}

/// First worksheet of an xlsx file as a cell range.
pub fn read_sheet_range(path: &Path) -> anyhow::Result<Range<Data>> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("failed to open workbook {}", path.to_string_lossy()))?;
    let range = workbook
        .worksheet_range_at(0)
        .context("workbook has no sheets")?
        .context("failed to read first worksheet")?;
    Ok(range)
}

fn cell_at<'a>(range: &'a Range<Data>, row: u32, col: u32) -> Option<&'a Data> {
    range.get_value((row, col))
}

/// Cell content as trimmed text. Integral floats render without a decimal
/// point so numeric roll and OTP cells compare cleanly against strings.
pub fn cell_text(range: &Range<Data>, row: u32, col: u32) -> String {
    match cell_at(range, row, col) {
        None | Some(Data::Empty) => String::new(),
        Some(Data::String(s)) => s.trim().to_string(),
        Some(Data::Int(i)) => i.to_string(),
        Some(Data::Float(f)) => {
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Some(Data::Bool(b)) => b.to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Integer mark with silent recovery: numeric cells truncate toward zero,
/// integer-looking strings parse, anything else counts as 0.
pub fn mark_value(range: &Range<Data>, row: u32, col: u32) -> i64 {
    match cell_at(range, row, col) {
        Some(Data::Int(i)) => *i,
        Some(Data::Float(f)) => *f as i64,
        Some(Data::String(s)) => s.trim().parse::<i64>().unwrap_or(0),
        Some(Data::Bool(b)) => *b as i64,
        _ => 0,
    }
}

fn strip_label(value: &str, label: &str) -> Option<String> {
    let t = value.trim();
    match t.get(..label.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(label) => {
            Some(t[label.len()..].trim().to_string())
        }
        _ => None,
    }
}

/// Banner metadata from the fixed rows. Row 1 may carry the combined
/// `Class: .. | Section: .. | Term: ..` cell or the three values in separate
/// cells; both layouts produce the same result.
pub fn read_meta(range: &Range<Data>) -> SheetMeta {
    let school = {
        let raw = cell_text(range, 0, 0);
        strip_label(&raw, SCHOOL_LABEL).unwrap_or(raw)
    };

    let combined = (0..3)
        .map(|c| cell_text(range, 1, c))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("|");

    let mut class_grade = String::new();
    let mut section = String::new();
    let mut term = String::new();
    for part in combined.split('|') {
        if let Some(v) = strip_label(part, CLASS_LABEL) {
            class_grade = v;
        } else if let Some(v) = strip_label(part, SECTION_LABEL) {
            section = v;
        } else if let Some(v) = strip_label(part, TERM_LABEL) {
            term = v;
        } else if class_grade.is_empty() {
            // Unlabeled first cell is still the class, as older sheets wrote it.
            class_grade = part.trim().to_string();
        }
    }

    SheetMeta {
        school,
        class_grade,
        section,
        term,
    }
}

/// Parse a marksheet grid into semantic records.
///
/// Pure over the input range: classifies header columns through
/// [`ReservedHeader`], then walks the data rows. A data row is a student row
/// iff both its name and roll cells are non-empty; other rows (pre-filled
/// template leftovers, spacers) are skipped.
pub fn parse_marksheet(range: &Range<Data>) -> Result<ParsedSheet, SheetError> {
    let Some((end_row, end_col)) = range.end() else {
        return Err(SheetError::bad_sheet("worksheet is empty"));
    };

    let mut subjects = Vec::new();
    let mut name_col = None;
    let mut roll_col = None;
    let mut otp_col = None;
    for col in 0..=end_col {
        let header = cell_text(range, HEADER_ROW, col);
        if header.is_empty() {
            continue;
        }
        match ReservedHeader::match_header(&header) {
            Some(ReservedHeader::StudentName) => name_col = Some(col),
            Some(ReservedHeader::RollNo) => roll_col = Some(col),
            Some(ReservedHeader::Otp) => otp_col = Some(col),
            // Serial numbers are dropped entirely; computed columns from a
            // previously generated result sheet pass through unclassified.
            Some(_) => {}
            None => subjects.push(SubjectColumn { col, name: header }),
        }
    }

    let Some(name_col) = name_col else {
        return Err(SheetError::not_found("student name column not found in sheet"));
    };
    let Some(roll_col) = roll_col else {
        return Err(SheetError::not_found("roll number column not found in sheet"));
    };

    let mut rows = Vec::new();
    for row in (HEADER_ROW + 1)..=end_row {
        let name = cell_text(range, row, name_col);
        let roll_no = cell_text(range, row, roll_col);
        if name.is_empty() || roll_no.is_empty() {
            continue;
        }
        let otp = otp_col.map(|c| cell_text(range, row, c)).filter(|s| !s.is_empty());
        let marks = subjects
            .iter()
            .map(|s| mark_value(range, row, s.col))
            .collect();
        rows.push(StudentRow {
            position: rows.len() + 1,
            row,
            name,
            roll_no,
            otp,
            marks,
        });
    }

    Ok(ParsedSheet {
        meta: read_meta(range),
        subjects,
        otp_col,
        rows,
    })
}
