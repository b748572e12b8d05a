// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text value decoding: control codes, unicode escapes and MTEXT formatting.

/// Resolves `%%c`, `%%d`, `%%p`, `%%%`, `\U+XXXX` and `\M+nXXXX` in a
/// single-line TEXT value. Underline/overline toggles (`%%u`, `%%o`) are
/// dropped.
pub fn decode_text(raw: &str) -> String {
    decode_control_codes(&decode_escapes(raw))
}

/// Plain-text rendering of an MTEXT value.
///
/// Paragraph breaks become newlines, inline formatting groups and braces are
/// stripped, stacked fractions render as `a/b`.
pub fn mtext_plain_text(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' | '}' => {}
            '\\' => match chars.next() {
                Some('P' | 'N' | 'X') => result.push('\n'),
                Some('~') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('{') => result.push('{'),
                Some('}') => result.push('}'),
                Some('S') => {
                    let mut stacked = String::new();
                    for next in chars.by_ref() {
                        if next == ';' {
                            break;
                        }
                        stacked.push(next);
                    }
                    result.push_str(&render_stack(&stacked));
                }
                Some('U') | Some('u') if chars.peek() == Some(&'+') => {
                    chars.next();
                    let hex: String = chars.by_ref().take(4).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) => result.push(decoded),
                        None => {
                            result.push_str("\\U+");
                            result.push_str(&hex);
                        }
                    }
                }
                Some('M') | Some('m') if chars.peek() == Some(&'+') => {
                    chars.next();
                    let code: String = chars.by_ref().take(5).collect();
                    match decode_multibyte(&code) {
                        Some(decoded) => result.push_str(&decoded),
                        None => {
                            result.push_str("\\M+");
                            result.push_str(&code);
                        }
                    }
                }
                Some('f' | 'F' | 'H' | 'h' | 'C' | 'c' | 'T' | 't' | 'Q' | 'q' | 'W' | 'w'
                | 'A' | 'a' | 'p') => {
                    for next in chars.by_ref() {
                        if next == ';' {
                            break;
                        }
                    }
                }
                Some('L' | 'l' | 'O' | 'o' | 'K' | 'k') => {}
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            },
            _ => result.push(ch),
        }
    }

    decode_control_codes(&result)
}

fn render_stack(stacked: &str) -> String {
    for sep in ['^', '/', '#'] {
        if let Some((top, bottom)) = stacked.split_once(sep) {
            let top = top.trim();
            let bottom = bottom.trim();
            if top.is_empty() {
                return bottom.to_string();
            }
            if bottom.is_empty() {
                return top.to_string();
            }
            return format!("{}/{}", top, bottom);
        }
    }
    stacked.to_string()
}

/// Decodes the `nXXXX` part of a `\M+nXXXX` escape: a codepage index and
/// the hex bytes of one double-byte character.
fn decode_multibyte(code: &str) -> Option<String> {
    let mut chars = code.chars();
    let encoding = match chars.next()? {
        '1' => encoding_rs::SHIFT_JIS,
        '2' => encoding_rs::BIG5,
        '3' => encoding_rs::EUC_KR,
        '5' => encoding_rs::GBK,
        _ => return None,
    };
    let hex = chars.as_str();
    if hex.len() != 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let bytes = u16::from_str_radix(hex, 16).ok()?.to_be_bytes();
    let (text, had_errors) = encoding.decode_without_bom_handling(&bytes);
    (!had_errors).then(|| text.into_owned())
}

/// Decoded character and byte length of an escape at the start of `tail`.
fn escape_at(tail: &str) -> Option<(String, usize)> {
    let prefix = tail.get(..3)?;
    if prefix.eq_ignore_ascii_case("\\U+") {
        let hex = tail.get(3..7)?;
        let ch = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)?;
        Some((ch.to_string(), 7))
    } else if prefix.eq_ignore_ascii_case("\\M+") {
        Some((decode_multibyte(tail.get(3..8)?)?, 8))
    } else {
        None
    }
}

fn decode_escapes(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let mut result = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('\\') {
        result.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        match escape_at(tail) {
            Some((decoded, len)) => {
                result.push_str(&decoded);
                rest = &tail[len..];
            }
            None => {
                result.push('\\');
                rest = &tail[1..];
            }
        }
    }
    result.push_str(rest);
    result
}

fn decode_control_codes(raw: &str) -> String {
    if !raw.contains("%%") {
        return raw.to_string();
    }
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '%' && chars.peek() == Some(&'%') {
            chars.next();
            match chars.next() {
                Some('c' | 'C') => result.push('⌀'),
                Some('d' | 'D') => result.push('°'),
                Some('p' | 'P') => result.push('±'),
                Some('%') => result.push('%'),
                Some('u' | 'U' | 'o' | 'O' | 'k' | 'K') => {}
                Some(other) => {
                    result.push_str("%%");
                    result.push(other);
                }
                None => result.push_str("%%"),
            }
        } else {
            result.push(ch);
        }
    }
    result
}
