// ==========================================
// 价目表归一化管道 - 表格提取器
// ==========================================
// 支持: CSV (.csv) / Excel (.xlsx) / PDF (.pdf)
// 输出: TabularRow {row_number, cells, headers}；全空行丢弃
// 红线: 矩阵格式直接拒绝，不做猜测解析
// ==========================================

use crate::config::NormalizationConfig;
use crate::domain::types::SourceType;
use crate::importer::decoder::decode_text;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use csv::ReaderBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;
use tracing::{debug, info, warn};

// 尺寸列表头，如 "60см 10"
static MATRIX_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\d{2,3}\s*(см|cm)\s*\d+").unwrap());

// PDF 单元格分隔: 制表符或 ≥2 个空白
static PDF_CELL_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t|\s{2,}").unwrap());

// ==========================================
// 行模型
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct TabularRow {
    pub row_number: usize, // 源文件物理行号（1 起）
    pub cells: Vec<String>,
    pub headers: Vec<String>,
}

impl TabularRow {
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(|s| s.as_str())
    }

    /// 原始文本（单元格以 " | " 拼接）
    pub fn raw_text(&self) -> String {
        self.cells.join(" | ")
    }
}

/// 提取结果
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Rows(Vec<TabularRow>),
    /// PDF 无表格时的逐页文本，交由 AI 文本提取
    PageText(Vec<String>),
}

/// 解析参数（由 NormalizationConfig 派生）
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub header_keywords: Vec<String>,
    pub header_scan_rows: usize,
    pub delimiter_sniff_bytes: usize,
}

impl ParseOptions {
    pub fn from_config(config: &NormalizationConfig) -> Self {
        Self {
            header_keywords: config.header_keywords.iter().map(|k| k.to_lowercase()).collect(),
            header_scan_rows: config.limits.header_scan_rows,
            delimiter_sniff_bytes: config.limits.delimiter_sniff_bytes,
        }
    }
}

// ==========================================
// TabularParser Trait
// ==========================================
pub trait TabularParser {
    fn parse(&self, bytes: &[u8], options: &ParseOptions) -> ImportResult<Extraction>;
}

// ==========================================
// 表头启发式
// ==========================================

/// 表头得分: 含任一关键词的单元格数
pub fn score_header(cells: &[String], keywords: &[String]) -> usize {
    cells
        .iter()
        .filter(|cell| {
            let lower = cell.trim().to_lowercase();
            !lower.is_empty() && keywords.iter().any(|k| lower.contains(k.as_str()))
        })
        .count()
}

/// 在前 scan_rows 行中选择表头行
///
/// - 得分最高者胜出，并列取靠前者
/// - 无任何行得分 ≥1 时取第一行
pub fn find_header_index(rows: &[Vec<String>], keywords: &[String], scan_rows: usize) -> usize {
    let mut best_index = 0;
    let mut best_score = 0;
    for (index, cells) in rows.iter().take(scan_rows).enumerate() {
        let score = score_header(cells, keywords);
        if score > best_score {
            best_score = score;
            best_index = index;
        }
    }
    best_index
}

/// 统计矩阵尺寸列
pub fn count_matrix_headers(headers: &[String]) -> usize {
    headers
        .iter()
        .filter(|h| MATRIX_HEADER_RE.is_match(h.trim()))
        .count()
}

fn is_blank(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}

/// 物理行 → TabularRow
///
/// 丢弃空行、丢弃表头之前的行；表头去首尾空白
fn build_rows(physical: Vec<(usize, Vec<String>)>, options: &ParseOptions) -> ImportResult<Vec<TabularRow>> {
    let rows: Vec<(usize, Vec<String>)> = physical
        .into_iter()
        .filter(|(_, cells)| !is_blank(cells))
        .collect();
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let cells_only: Vec<Vec<String>> = rows.iter().map(|(_, c)| c.clone()).collect();
    let header_index = find_header_index(&cells_only, &options.header_keywords, options.header_scan_rows);
    let headers: Vec<String> = rows[header_index].1.iter().map(|h| h.trim().to_string()).collect();

    let matrix_columns = count_matrix_headers(&headers);
    if matrix_columns >= 2 {
        return Err(ImportError::MatrixFormat { columns: matrix_columns });
    }

    debug!(header_row = rows[header_index].0, headers = ?headers, "表头识别完成");

    Ok(rows
        .into_iter()
        .skip(header_index + 1)
        .map(|(row_number, cells)| TabularRow {
            row_number,
            cells: cells.into_iter().map(|c| c.trim().to_string()).collect(),
            headers: headers.clone(),
        })
        .collect())
}

// ==========================================
// CSV Parser 实现
// ==========================================

/// 分隔符嗅探: 比较前 N 字节中 ',' 与 ';' 的数量，平局取逗号；
/// 两者均为 0 且存在制表符时取制表符
pub fn detect_delimiter(text: &str, sniff_bytes: usize) -> u8 {
    let mut end = sniff_bytes.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let sample = &text[..end];
    let commas = sample.matches(',').count();
    let semicolons = sample.matches(';').count();
    let tabs = sample.matches('\t').count();

    if commas == 0 && semicolons == 0 && tabs > 0 {
        b'\t'
    } else if semicolons > commas {
        b';'
    } else {
        b','
    }
}

pub struct CsvParser;

impl TabularParser for CsvParser {
    fn parse(&self, bytes: &[u8], options: &ParseOptions) -> ImportResult<Extraction> {
        let decoded = decode_text(bytes)?;
        let delimiter = detect_delimiter(&decoded.text, options.delimiter_sniff_bytes);
        info!(
            encoding = decoded.encoding.as_str(),
            delimiter = %(delimiter as char).escape_default(),
            "CSV 解码完成"
        );

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .delimiter(delimiter)
            .from_reader(decoded.text.as_bytes());

        let mut physical = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = result?;
            let row_number = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(index + 1);
            physical.push((row_number, record.iter().map(|v| v.to_string()).collect()));
        }

        Ok(Extraction::Rows(build_rows(physical, options)?))
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================

/// 单元格去类型化；整数值浮点不带 ".0"
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

pub struct XlsxParser;

impl TabularParser for XlsxParser {
    fn parse(&self, bytes: &[u8], options: &ParseOptions) -> ImportResult<Extraction> {
        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))?;

        // 读取第一个 sheet
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ImportError::NoTableData("Excel 文件无工作表".to_string()))??;

        let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
        let physical: Vec<(usize, Vec<String>)> = range
            .rows()
            .enumerate()
            .map(|(index, row)| (first_row + index + 1, row.iter().map(cell_to_string).collect()))
            .collect();

        Ok(Extraction::Rows(build_rows(physical, options)?))
    }
}

// ==========================================
// PDF Parser 实现
// ==========================================

/// 逐页文本 → 表格行
///
/// - 一页中连续 ≥2 行且每行 ≥2 个单元格构成一张表
/// - 首张表按表头启发式确定规范表头，后续页重复表头丢弃（跨页拼接）
pub fn tables_from_pages(pages: &[String], options: &ParseOptions) -> ImportResult<Vec<TabularRow>> {
    let mut tables: Vec<Vec<(usize, Vec<String>)>> = Vec::new();
    let mut line_number = 0;

    for page in pages {
        let mut current: Vec<(usize, Vec<String>)> = Vec::new();
        for line in page.lines() {
            line_number += 1;
            let trimmed = line.trim();
            let cells: Vec<String> = if trimmed.is_empty() {
                Vec::new()
            } else {
                PDF_CELL_SPLIT_RE
                    .split(trimmed)
                    .map(|c| c.trim().to_string())
                    .collect()
            };

            if cells.len() >= 2 {
                current.push((line_number, cells));
            } else {
                if current.len() >= 2 {
                    tables.push(std::mem::take(&mut current));
                }
                current.clear();
            }
        }
        if current.len() >= 2 {
            tables.push(current);
        }
    }

    let mut tables = tables.into_iter();
    let first = match tables.next() {
        Some(t) => t,
        None => return Ok(Vec::new()),
    };

    let mut rows = build_rows(first, options)?;
    let headers = match rows.first() {
        Some(r) => r.headers.clone(),
        None => return Ok(rows),
    };
    let header_key: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();

    for table in tables {
        for (row_number, cells) in table {
            let cells: Vec<String> = cells.into_iter().map(|c| c.trim().to_string()).collect();
            let is_repeated_header = cells.len() == header_key.len()
                && cells.iter().zip(&header_key).all(|(c, h)| c.to_lowercase() == *h);
            if is_repeated_header || is_blank(&cells) {
                continue;
            }
            rows.push(TabularRow {
                row_number,
                cells,
                headers: headers.clone(),
            });
        }
    }

    Ok(rows)
}

pub struct PdfParser;

impl TabularParser for PdfParser {
    fn parse(&self, bytes: &[u8], options: &ParseOptions) -> ImportResult<Extraction> {
        let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| ImportError::Pdf(e.to_string()))?;
        let pages: Vec<String> = text.split('\u{000C}').map(|p| p.to_string()).collect();

        let rows = tables_from_pages(&pages, options)?;
        if !rows.is_empty() {
            return Ok(Extraction::Rows(rows));
        }

        let page_text: Vec<String> = pages
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if page_text.is_empty() {
            return Err(ImportError::NoTableData("PDF 无可提取文本".to_string()));
        }
        warn!(pages = page_text.len(), "PDF 未识别到表格，转为页面文本");
        Ok(Extraction::PageText(page_text))
    }
}

// ==========================================
// 通用文件解析器（按来源类型选择）
// ==========================================
pub struct UniversalFileParser;

impl UniversalFileParser {
    pub fn parse(&self, source_type: SourceType, bytes: &[u8], options: &ParseOptions) -> ImportResult<Extraction> {
        match source_type {
            SourceType::Csv => CsvParser.parse(bytes, options),
            SourceType::Xlsx => XlsxParser.parse(bytes, options),
            SourceType::Pdf => PdfParser.parse(bytes, options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ParseOptions {
        ParseOptions::from_config(&NormalizationConfig::default())
    }

    fn rows(extraction: Extraction) -> Vec<TabularRow> {
        match extraction {
            Extraction::Rows(rows) => rows,
            Extraction::PageText(_) => panic!("expected rows"),
        }
    }

    #[test]
    fn test_delimiter_sniffing() {
        assert_eq!(detect_delimiter("a;b;c\n1,5;2;3", 1024), b';');
        assert_eq!(detect_delimiter("a;b,c", 1024), b',');
        assert_eq!(detect_delimiter("a\tb\tc", 1024), b'\t');
        assert_eq!(detect_delimiter("абв", 3), b',');
    }

    #[test]
    fn test_csv_header_row_detected_after_preamble() {
        let csv = "ООО Флора Опт\nПрайс на 01.03\n\nНаименование;Цена;Кол-во\nРоза Explorer 60см;95-99;10\n;;\nТюльпан Strong Gold;45;\n";
        let rows = rows(CsvParser.parse(csv.as_bytes(), &options()).unwrap());

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].headers, vec!["Наименование", "Цена", "Кол-во"]);
        assert_eq!(rows[0].row_number, 5);
        assert_eq!(rows[0].cell(1), Some("95-99"));
        assert_eq!(rows[1].row_number, 7);
    }

    #[test]
    fn test_header_falls_back_to_first_row() {
        let rows = vec![
            vec!["foo".to_string(), "bar".to_string()],
            vec!["1".to_string(), "2".to_string()],
        ];
        assert_eq!(find_header_index(&rows, &options().header_keywords, 20), 0);
    }

    #[test]
    fn test_matrix_format_rejected() {
        let csv = "Наименование,60см 10,70см 10,80 cm 5\nРоза Explorer,95,105,120\n";
        let err = CsvParser.parse(csv.as_bytes(), &options()).unwrap_err();
        assert!(matches!(err, ImportError::MatrixFormat { columns: 3 }));
    }

    #[test]
    fn test_excel_float_cells_render_without_fraction() {
        assert_eq!(cell_to_string(&Data::Float(120.0)), "120");
        assert_eq!(cell_to_string(&Data::Float(99.5)), "99.5");
        assert_eq!(cell_to_string(&Data::String("  Роза ".to_string())), "Роза");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn test_xlsx_header_after_preamble_and_row_numbers() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "ООО Флора Опт").unwrap();
        sheet.write_string(2, 0, "Наименование").unwrap();
        sheet.write_string(2, 1, "Цена").unwrap();
        sheet.write_string(2, 2, "Длина").unwrap();
        sheet.write_string(3, 0, "Роза Explorer").unwrap();
        sheet.write_number(3, 1, 95.0).unwrap();
        sheet.write_number(3, 2, 60.0).unwrap();
        sheet.write_string(5, 0, "Роза Vendela").unwrap();
        sheet.write_number(5, 1, 80.5).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let rows = rows(XlsxParser.parse(&bytes, &options()).unwrap());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].headers, vec!["Наименование", "Цена", "Длина"]);
        assert_eq!(rows[0].row_number, 4);
        assert_eq!(rows[0].cell(1), Some("95"));
        assert_eq!(rows[0].cell(2), Some("60"));
        assert_eq!(rows[1].row_number, 6);
        assert_eq!(rows[1].cell(1), Some("80.5"));
    }

    #[test]
    fn test_pdf_pages_stitch_repeated_headers() {
        let pages = vec![
            "Прайс-лист\nНаименование    Цена    Страна\nРоза Explorer 60см    95    Эквадор\nРоза Freedom 50см    80    Кения\n".to_string(),
            "Наименование    Цена    Страна\nТюльпан Strong Gold    45    Нидерланды\nХризантема Baltica    60    Колумбия\n".to_string(),
        ];
        let rows = tables_from_pages(&pages, &options()).unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].headers, vec!["Наименование", "Цена", "Страна"]);
        assert_eq!(rows[2].cells[0], "Тюльпан Strong Gold");
    }

    #[test]
    fn test_pdf_without_tables_yields_nothing() {
        let pages = vec!["Уважаемые клиенты!\nЦены уточняйте у менеджера.".to_string()];
        assert!(tables_from_pages(&pages, &options()).unwrap().is_empty());
    }
}
