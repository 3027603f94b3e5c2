//! Prompt extraction from uploaded files.
//!
//! Three formats are accepted, chosen by file extension:
//!
//! | Extension | Format | Rule |
//! |-----------|--------|------|
//! | `.txt` | [`PromptFormat::Text`] | one prompt per line |
//! | `.csv` | [`PromptFormat::Csv`] | every cell, row-major |
//! | `.xlsx` | [`PromptFormat::Spreadsheet`] | every cell of the first sheet, row-major |
//!
//! Each line or cell is trimmed and empty ones are dropped; order is kept.
//! A table that cannot be decoded fails as a whole with
//! [`PromptSourceError::Parse`]; no partial prompt list is returned.

use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};

use crate::models::Prompt;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum non-empty cells in a sheet; larger sheets are rejected.
const MAX_CELLS: usize = 100_000;

const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, thiserror::Error)]
pub enum PromptSourceError {
    #[error("unsupported file type '{0}': expected .txt, .csv, or .xlsx")]
    UnsupportedFormat(String),
    #[error("could not read prompts from the file: {0}")]
    Parse(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptFormat {
    Text,
    Csv,
    Spreadsheet,
}

impl PromptFormat {
    /// Match a file extension, case-insensitively and with or without the dot.
    pub fn from_extension(ext: &str) -> Result<Self, PromptSourceError> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "txt" => Ok(PromptFormat::Text),
            "csv" => Ok(PromptFormat::Csv),
            "xlsx" => Ok(PromptFormat::Spreadsheet),
            other => Err(PromptSourceError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, PromptSourceError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_extension(ext)
    }
}

/// Read `path` and extract its prompts.
///
/// The format is checked before the file is read, so an unsupported
/// extension fails without touching the disk.
pub async fn load_prompts(path: &Path) -> Result<Vec<Prompt>, PromptSourceError> {
    let format = PromptFormat::from_path(path)?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| PromptSourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_prompts(&bytes, format)
}

/// Extract prompts from file contents already in memory.
pub fn parse_prompts(bytes: &[u8], format: PromptFormat) -> Result<Vec<Prompt>, PromptSourceError> {
    match format {
        PromptFormat::Text => Ok(parse_text(&String::from_utf8_lossy(bytes))),
        PromptFormat::Csv => parse_csv(bytes).map(flatten_grid),
        PromptFormat::Spreadsheet => parse_xlsx(bytes).map(flatten_grid),
    }
}

/// One prompt per line; blank lines are dropped.
pub fn parse_text(text: &str) -> Vec<Prompt> {
    text.trim_start_matches(UTF8_BOM)
        .split('\n')
        .filter_map(Prompt::new)
        .collect()
}

/// Row-major flatten of a cell grid, dropping empty cells.
pub fn flatten_grid(grid: Vec<Vec<String>>) -> Vec<Prompt> {
    grid.into_iter().flatten().filter_map(Prompt::new).collect()
}

// ============ CSV ============

fn parse_csv(bytes: &[u8]) -> Result<Vec<Vec<String>>, PromptSourceError> {
    let bytes = bytes.strip_prefix(UTF8_BOM.as_bytes()).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| PromptSourceError::Parse(e.to_string()))?;
        grid.push(record.iter().map(str::to_string).collect());
    }
    Ok(grid)
}

// ============ XLSX ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn parse_xlsx(bytes: &[u8]) -> Result<Vec<Vec<String>>, PromptSourceError> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| parse_error(&e))?;
    let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheet = first_worksheet_name(&mut archive)?;
    let xml = read_zip_entry_bounded(&mut archive, &sheet, MAX_XML_ENTRY_BYTES)?;
    read_sheet_rows(&xml, &shared_strings)
}

fn parse_error(e: &dyn std::fmt::Display) -> PromptSourceError {
    PromptSourceError::Parse(e.to_string())
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, PromptSourceError> {
    let entry = archive.by_name(name).map_err(|e| parse_error(&e))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| parse_error(&e))?;
    if out.len() as u64 >= max_bytes {
        return Err(PromptSourceError::Parse(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// The first sheet in workbook order, resolved through the workbook
/// relationships. Falls back to the lowest-numbered `sheetN.xml`.
fn first_worksheet_name(archive: &mut Archive<'_>) -> Result<String, PromptSourceError> {
    if let Some(name) = first_sheet_from_workbook(archive)? {
        if has_entry(archive, &name) {
            return Ok(name);
        }
    }

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
        .into_iter()
        .next()
        .ok_or_else(|| PromptSourceError::Parse("workbook has no worksheets".to_string()))
}

fn first_sheet_from_workbook(
    archive: &mut Archive<'_>,
) -> Result<Option<String>, PromptSourceError> {
    if !has_entry(archive, "xl/workbook.xml") || !has_entry(archive, "xl/_rels/workbook.xml.rels")
    {
        return Ok(None);
    }

    let workbook = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let Some(rel_id) = first_element_attr(&workbook, b"sheet", b"id")? else {
        return Ok(None);
    };

    let rels = read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)?;
    let mut reader = quick_xml::Reader::from_reader(rels.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if attr_value(&e, b"Id").as_deref() == Some(rel_id.as_str()) {
                    return Ok(attr_value(&e, b"Target").map(|t| resolve_target(&t)));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(parse_error(&e)),
            _ => {}
        }
        buf.clear();
    }
}

fn first_element_attr(
    xml: &[u8],
    element: &[u8],
    attr: &[u8],
) -> Result<Option<String>, PromptSourceError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == element => {
                return Ok(attr_value(&e, attr));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(parse_error(&e)),
            _ => {}
        }
        buf.clear();
    }
}

/// Relationship targets are relative to `xl/` unless absolute.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, PromptSourceError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    // Phonetic runs (<rPh>) repeat the text in another script.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(|e| parse_error(&e))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(&e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell type from the `t` attribute of `<c>`.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CellKind {
    SharedString,
    Boolean,
    Literal,
}

fn read_sheet_rows(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<Vec<Vec<String>>, PromptSourceError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut kind = CellKind::Literal;
    let mut value: Option<String> = None;
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => rows.push(Vec::new()),
                b"c" => {
                    kind = match attr_value(&e, b"t").as_deref() {
                        Some("s") => CellKind::SharedString,
                        Some("b") => CellKind::Boolean,
                        _ => CellKind::Literal,
                    };
                    value = None;
                }
                // <v> holds the value; <t> holds inline string text inside <is>.
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let text = te.unescape().map_err(|e| parse_error(&e))?;
                value.get_or_insert_with(String::new).push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(raw) = value.take() {
                        if cell_count >= MAX_CELLS {
                            return Err(PromptSourceError::Parse(format!(
                                "sheet exceeds {} cells",
                                MAX_CELLS
                            )));
                        }
                        let cell = cell_text(kind, &raw, shared_strings)?;
                        match rows.last_mut() {
                            Some(row) => row.push(cell),
                            None => rows.push(vec![cell]),
                        }
                        cell_count += 1;
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(&e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn cell_text(
    kind: CellKind,
    raw: &str,
    shared_strings: &[String],
) -> Result<String, PromptSourceError> {
    match kind {
        CellKind::SharedString => {
            let index: usize = raw
                .trim()
                .parse()
                .map_err(|_| PromptSourceError::Parse(format!("bad shared string index: {}", raw)))?;
            shared_strings.get(index).cloned().ok_or_else(|| {
                PromptSourceError::Parse(format!("shared string index out of range: {}", index))
            })
        }
        CellKind::Boolean => Ok(if raw.trim() == "1" { "true" } else { "false" }.to_string()),
        CellKind::Literal => Ok(raw.to_string()),
    }
}
