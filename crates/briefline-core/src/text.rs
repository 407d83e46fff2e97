//! Cleanup of model output before it is shown or handed to the next stage.

use chrono::{DateTime, Local, TimeZone};
use thiserror::Error;
use tracing::warn;

/// Marker the final report must carry.
pub const GENERATED_AT_MARKER: &str = "Generated at:";

/// Timestamp layout used for the `Generated at:` line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscapeError {
    #[error("trailing backslash at byte {0}")]
    TrailingBackslash(usize),
    #[error("truncated \\{kind} escape at byte {position}")]
    Truncated { kind: char, position: usize },
    #[error("escape at byte {position} is not a valid character: {code:#x}")]
    InvalidCodePoint { position: usize, code: u32 },
}

pub fn format_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn local_timestamp() -> String {
    format_timestamp(&Local::now())
}

/// Cleanup applied to research and analysis output: literal `\n` becomes a real
/// newline, every remaining backslash is dropped, surrounding whitespace trimmed.
pub fn clean_stage_text(text: &str) -> String {
    text.replace("\\n", "\n").replace('\\', "").trim().to_string()
}

/// Decode Python-style backslash escapes (`\n`, `\t`, `\\`, `\'`, `\"`, `\a`, `\b`,
/// `\f`, `\v`, `\r`, octal `\ooo`, `\xhh`, `\uhhhh`, `\Uhhhhhhhh`, line
/// continuations). Unknown escapes are kept verbatim and non-ASCII text passes
/// through untouched.
pub fn decode_unicode_escapes(input: &str) -> Result<String, EscapeError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((position, ch)) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }

        let Some((_, escape)) = chars.next() else {
            return Err(EscapeError::TrailingBackslash(position));
        };

        match escape {
            '\n' => {}
            '\\' => output.push('\\'),
            '\'' => output.push('\''),
            '"' => output.push('"'),
            'a' => output.push('\u{07}'),
            'b' => output.push('\u{08}'),
            'f' => output.push('\u{0c}'),
            'n' => output.push('\n'),
            'r' => output.push('\r'),
            't' => output.push('\t'),
            'v' => output.push('\u{0b}'),
            '0'..='7' => {
                let mut code = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|(_, next)| next.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                output.push(code_point(code, position)?);
            }
            'x' | 'u' | 'U' => {
                let width = match escape {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let mut code: u32 = 0;
                for _ in 0..width {
                    let digit = chars
                        .next()
                        .and_then(|(_, next)| next.to_digit(16))
                        .ok_or(EscapeError::Truncated {
                            kind: escape,
                            position,
                        })?;
                    code = code.checked_mul(16).map(|c| c + digit).ok_or(
                        EscapeError::InvalidCodePoint { position, code },
                    )?;
                }
                output.push(code_point(code, position)?);
            }
            other => {
                output.push('\\');
                output.push(other);
            }
        }
    }

    Ok(output)
}

fn code_point(code: u32, position: usize) -> Result<char, EscapeError> {
    char::from_u32(code).ok_or(EscapeError::InvalidCodePoint { position, code })
}

/// Normalize summary output: decode escapes, convert any remaining literal `\n`
/// and `\t`, trim, and make sure a `Generated at:` line closes the report.
pub fn normalize_summary_text(text: &str, generated_at: &str) -> String {
    let decoded = match decode_unicode_escapes(text) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(error = %err, "summary escape decoding failed; keeping raw text");
            text.to_string()
        }
    };

    let mut cleaned = decoded
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .trim()
        .to_string();

    if !cleaned.contains(GENERATED_AT_MARKER) {
        cleaned.push_str(&format!("\n\n{GENERATED_AT_MARKER} {generated_at}"));
    }
    cleaned
}
