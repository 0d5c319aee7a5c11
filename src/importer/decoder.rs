// ==========================================
// 价目表归一化管道 - 文本解码
// ==========================================
// 顺序: UTF-8（去 BOM）→ Windows-1251（结果含西里尔字母才采纳）→ UTF-8 有损替换
// 红线: 最后一级永不失败
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use encoding_rs::WINDOWS_1251;
use tracing::debug;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// 实际采用的编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Windows1251,
    Utf8Lossy,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Windows1251 => "windows-1251",
            TextEncoding::Utf8Lossy => "utf-8-lossy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: TextEncoding,
}

fn has_cyrillic(text: &str) -> bool {
    text.chars().any(|c| matches!(c, '\u{0400}'..='\u{04FF}'))
}

/// 解码原始字节
///
/// 仅空文件返回 Decode 错误；其余输入总能得到文本。
pub fn decode_text(bytes: &[u8]) -> ImportResult<DecodedText> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ImportError::Decode("文件为空".to_string()));
    }

    if let Ok(text) = std::str::from_utf8(body) {
        return Ok(DecodedText {
            text: text.to_string(),
            encoding: TextEncoding::Utf8,
        });
    }

    let (cp1251, had_errors) = WINDOWS_1251.decode_without_bom_handling(body);
    if !had_errors && has_cyrillic(&cp1251) {
        debug!("UTF-8 解码失败，采用 Windows-1251");
        return Ok(DecodedText {
            text: cp1251.into_owned(),
            encoding: TextEncoding::Windows1251,
        });
    }

    debug!("UTF-8 / Windows-1251 均不适用，采用有损 UTF-8");
    Ok(DecodedText {
        text: String::from_utf8_lossy(body).into_owned(),
        encoding: TextEncoding::Utf8Lossy,
    })
}
