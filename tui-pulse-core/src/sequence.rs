//! Terminal input sequence decoding
//!
//! Stateless functions turning a byte window into a key description:
//!
//! - Control bytes `0x00..=0x1F` and `0x7F` via a fixed table
//! - CSI sequences (`ESC [ params final`) for arrows, home/end and `~` keys
//! - OSC sequences (`ESC ] ... BEL`), consumed and discarded
//! - SS3 sequences (`ESC O P..S`) for F1-F4 and home/end
//! - `ESC <byte>` as Alt+key
//! - Literal UTF-8 characters
//!
//! Every failure path returns `None`. Use [`is_partial_sequence`] to tell
//! "wait for more bytes" apart from "not a recognized sequence".

use serde_json::json;

use crate::event::{KeyEvent, Modifiers};

/// Escape byte that introduces every multi-byte sequence
pub const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;
const DEL: u8 = 0x7F;

/// Static description of a control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCharacter {
    /// Canonical key name
    pub key: &'static str,
    /// The raw control character
    pub raw: char,
    /// Whether the key is reported with the ctrl modifier
    pub ctrl: bool,
    /// ASCII mnemonic
    pub name: Option<&'static str>,
}

const fn ctl(key: &'static str, byte: u8, ctrl: bool, name: &'static str) -> ControlCharacter {
    ControlCharacter {
        key,
        raw: byte as char,
        ctrl,
        name: Some(name),
    }
}

/// Entries 0..=31 followed by DEL (127) at index 32.
static CONTROL_CHARACTERS: [ControlCharacter; 33] = [
    ctl("@", 0, true, "NUL"),
    ctl("a", 1, true, "SOH"),
    ctl("b", 2, true, "STX"),
    ctl("c", 3, true, "ETX"),
    ctl("d", 4, true, "EOT"),
    ctl("e", 5, true, "ENQ"),
    ctl("f", 6, true, "ACK"),
    ctl("g", 7, true, "BEL"),
    ctl("backspace", 8, false, "BS"),
    ctl("tab", 9, false, "HT"),
    ctl("enter", 10, false, "LF"),
    ctl("k", 11, true, "VT"),
    ctl("l", 12, true, "FF"),
    ctl("enter", 13, false, "CR"),
    ctl("n", 14, true, "SO"),
    ctl("o", 15, true, "SI"),
    ctl("p", 16, true, "DLE"),
    ctl("q", 17, true, "DC1"),
    ctl("r", 18, true, "DC2"),
    ctl("s", 19, true, "DC3"),
    ctl("t", 20, true, "DC4"),
    ctl("u", 21, true, "NAK"),
    ctl("v", 22, true, "SYN"),
    ctl("w", 23, true, "ETB"),
    ctl("x", 24, true, "CAN"),
    ctl("y", 25, true, "EM"),
    ctl("z", 26, true, "SUB"),
    ctl("escape", 27, false, "ESC"),
    ctl("\\", 28, true, "FS"),
    ctl("]", 29, true, "GS"),
    ctl("^", 30, true, "RS"),
    ctl("_", 31, true, "US"),
    ctl("backspace", DEL, false, "DEL"),
];

/// Look up a control byte.
pub fn control_character(byte: u8) -> Option<&'static ControlCharacter> {
    match byte {
        0..=31 => CONTROL_CHARACTERS.get(usize::from(byte)),
        DEL => CONTROL_CHARACTERS.last(),
        _ => None,
    }
}

/// Result of decoding one escape sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSequence {
    /// Resolved key; `None` for recognized-but-keyless sequences such as OSC
    pub key: Option<String>,
    pub modifiers: Modifiers,
    /// The raw sequence text
    pub raw: String,
    /// Bytes consumed from the input
    pub consumed: usize,
}

/// One decoded input unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Control(&'static ControlCharacter),
    Sequence(ParsedSequence),
    /// A literal character and its UTF-8 length
    Char { ch: char, len: usize },
}

impl Decoded {
    /// Number of input bytes this unit spans.
    pub fn consumed(&self) -> usize {
        match self {
            Decoded::Control(_) => 1,
            Decoded::Sequence(seq) => seq.consumed,
            Decoded::Char { len, .. } => *len,
        }
    }

    /// Build the key event for this unit, if it names a key.
    pub fn to_key_event(&self) -> Option<KeyEvent> {
        match self {
            Decoded::Control(cc) => {
                let modifiers = if cc.ctrl {
                    Modifiers::CTRL
                } else {
                    Modifiers::empty()
                };
                let mut event = KeyEvent::new(cc.key, modifiers);
                if let Some(name) = cc.name {
                    event = event.with_metadata(json!({ "control": name }));
                }
                Some(event)
            }
            Decoded::Sequence(seq) => {
                let key = seq.key.as_ref()?;
                Some(
                    KeyEvent::new(key.clone(), seq.modifiers)
                        .with_metadata(json!({ "sequence": seq.raw })),
                )
            }
            Decoded::Char { ch, .. } => {
                let (key, upper) = normalize_char(*ch);
                let modifiers = if upper {
                    Modifiers::SHIFT
                } else {
                    Modifiers::empty()
                };
                Some(KeyEvent::new(key, modifiers))
            }
        }
    }
}

/// Decode the unit starting at `offset`.
pub fn decode(input: &[u8], offset: usize) -> Option<Decoded> {
    let rest = input.get(offset..)?;
    let first = *rest.first()?;

    if first == ESC {
        return decode_escape(rest);
    }
    if let Some(cc) = control_character(first) {
        return Some(Decoded::Control(cc));
    }
    decode_char(rest)
}

/// Whether `rest` could still become a decodable unit once more bytes arrive.
pub fn is_partial_sequence(rest: &[u8]) -> bool {
    let Some(&first) = rest.first() else {
        return false;
    };

    if first == ESC {
        return match rest.get(1) {
            None => true,
            Some(b'[') => rest[2..].iter().all(|b| (0x20..=0x3F).contains(b)),
            Some(b']') => !osc_terminated(rest),
            Some(b'O') => rest.len() == 2,
            Some(&b) => utf8_width(b).is_some_and(|w| rest.len() < 1 + w),
        };
    }

    match utf8_width(first) {
        Some(width) if width > 1 => {
            rest.len() < width && rest[1..].iter().all(|b| b & 0xC0 == 0x80)
        }
        _ => false,
    }
}

/// Length of the complete CSI sequence at the start of `rest`: parameter
/// and intermediate bytes (0x20-0x3F) up to a final byte (0x40-0x7E).
///
/// Covers sequences [`decode`] does not recognize, such as mouse reports,
/// so callers can skip them in one step. `None` if `rest` does not start
/// with a finished CSI.
pub fn csi_length(rest: &[u8]) -> Option<usize> {
    if !rest.starts_with(&[ESC, b'[']) {
        return None;
    }
    for (i, &byte) in rest.iter().enumerate().skip(2) {
        match byte {
            0x20..=0x3F => continue,
            0x40..=0x7E => return Some(i + 1),
            _ => return None,
        }
    }
    None
}

fn decode_escape(rest: &[u8]) -> Option<Decoded> {
    match rest.get(1) {
        None => control_character(ESC).map(Decoded::Control),
        Some(b'[') => decode_csi(rest),
        Some(b']') => decode_osc(rest),
        Some(b'O') => decode_ss3(rest),
        Some(_) => decode_alt(rest),
    }
}

fn decode_csi(rest: &[u8]) -> Option<Decoded> {
    let mut params: Vec<u16> = Vec::new();
    let mut current: Option<u16> = None;

    for (i, &byte) in rest.iter().enumerate().skip(2) {
        match byte {
            b'0'..=b'9' => {
                let digit = u16::from(byte - b'0');
                current = Some(current.unwrap_or(0).saturating_mul(10).saturating_add(digit));
            }
            b';' => params.push(current.take().unwrap_or(0)),
            b'~' | b'A'..=b'Z' | b'a'..=b'z' => {
                if let Some(n) = current.take() {
                    params.push(n);
                }
                return Some(Decoded::Sequence(csi_sequence(&rest[..=i], &params, byte)));
            }
            _ => return None,
        }
    }

    None
}

fn csi_sequence(raw: &[u8], params: &[u16], terminator: u8) -> ParsedSequence {
    // Only the second parameter carries modifiers; the rest are ignored.
    let mut modifiers = params
        .get(1)
        .map(|&p| Modifiers::from_csi_param(p))
        .unwrap_or_default();

    let key = match terminator {
        b'A' => Some("up"),
        b'B' => Some("down"),
        b'C' => Some("right"),
        b'D' => Some("left"),
        b'H' => Some("home"),
        b'F' => Some("end"),
        b'Z' => {
            modifiers |= Modifiers::SHIFT;
            Some("tab")
        }
        b'~' => Some(tilde_key(params.first().copied().unwrap_or(0))),
        _ => None,
    };

    ParsedSequence {
        key: key.map(str::to_string),
        modifiers,
        raw: String::from_utf8_lossy(raw).into_owned(),
        consumed: raw.len(),
    }
}

fn tilde_key(code: u16) -> &'static str {
    match code {
        1 => "home",
        2 => "insert",
        3 => "delete",
        4 => "end",
        5 => "pageup",
        6 => "pagedown",
        15 => "f5",
        17 => "f6",
        18 => "f7",
        19 => "f8",
        20 => "f9",
        21 => "f10",
        23 => "f11",
        24 => "f12",
        _ => "unknown",
    }
}

fn osc_terminated(rest: &[u8]) -> bool {
    osc_end(rest).is_some()
}

/// Index one past the terminator (BEL or `ESC \`).
fn osc_end(rest: &[u8]) -> Option<usize> {
    let mut i = 2;
    while i < rest.len() {
        match rest[i] {
            BEL => return Some(i + 1),
            ESC if rest.get(i + 1) == Some(&b'\\') => return Some(i + 2),
            _ => i += 1,
        }
    }
    None
}

fn decode_osc(rest: &[u8]) -> Option<Decoded> {
    let end = osc_end(rest)?;
    Some(Decoded::Sequence(ParsedSequence {
        key: None,
        modifiers: Modifiers::empty(),
        raw: String::from_utf8_lossy(&rest[..end]).into_owned(),
        consumed: end,
    }))
}

fn decode_ss3(rest: &[u8]) -> Option<Decoded> {
    let key = match rest.get(2)? {
        b'P' => "f1",
        b'Q' => "f2",
        b'R' => "f3",
        b'S' => "f4",
        b'H' => "home",
        b'F' => "end",
        _ => return None,
    };
    Some(Decoded::Sequence(ParsedSequence {
        key: Some(key.to_string()),
        modifiers: Modifiers::empty(),
        raw: String::from_utf8_lossy(&rest[..3]).into_owned(),
        consumed: 3,
    }))
}

fn decode_alt(rest: &[u8]) -> Option<Decoded> {
    let next = rest[1];

    let (key, modifiers, consumed) = if let Some(cc) = control_character(next) {
        let mut modifiers = Modifiers::ALT;
        if cc.ctrl {
            modifiers |= Modifiers::CTRL;
        }
        (cc.key.to_string(), modifiers, 2)
    } else {
        let Decoded::Char { ch, len } = decode_char(&rest[1..])? else {
            return None;
        };
        let (key, _) = normalize_char(ch);
        (key, Modifiers::ALT, 1 + len)
    };

    Some(Decoded::Sequence(ParsedSequence {
        key: Some(key),
        modifiers,
        raw: String::from_utf8_lossy(&rest[..consumed]).into_owned(),
        consumed,
    }))
}

fn decode_char(rest: &[u8]) -> Option<Decoded> {
    let width = utf8_width(*rest.first()?)?;
    let bytes = rest.get(..width)?;
    let ch = std::str::from_utf8(bytes).ok()?.chars().next()?;
    Some(Decoded::Char { ch, len: width })
}

fn utf8_width(first: u8) -> Option<usize> {
    match first {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

/// Lowercase key name for a literal character, plus whether it was uppercase.
fn normalize_char(ch: char) -> (String, bool) {
    if ch == ' ' {
        return ("space".to_string(), false);
    }
    let upper = ch.is_uppercase();
    (ch.to_lowercase().collect(), upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(decoded: Option<Decoded>) -> ParsedSequence {
        match decoded {
            Some(Decoded::Sequence(s)) => s,
            other => panic!("Expected sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_every_control_byte_round_trips() {
        for code in (0u8..=31).chain(std::iter::once(127)) {
            let cc = control_character(code).expect("control byte");
            assert_eq!(cc.raw as u32, u32::from(code));

            assert_eq!(decode(&[code], 0), Some(Decoded::Control(cc)));
        }
    }

    #[test]
    fn test_lone_escape() {
        let decoded = decode(&[ESC], 0).unwrap();
        assert_eq!(decoded.consumed(), 1);
        assert_eq!(decoded.to_key_event().unwrap().key, "escape");
    }

    #[test]
    fn test_arrow_keys() {
        for (byte, name) in [(b'A', "up"), (b'B', "down"), (b'C', "right"), (b'D', "left")] {
            let s = seq(decode(&[ESC, b'[', byte], 0));
            assert_eq!(s.key.as_deref(), Some(name));
            assert_eq!(s.modifiers, Modifiers::empty());
            assert_eq!(s.consumed, 3);
        }
    }

    #[test]
    fn test_modifier_mask_mapping() {
        for n in 1u16..=16 {
            let input = format!("\x1b[1;{}A", n);
            let s = seq(decode(input.as_bytes(), 0));
            let mask = (n - 1) as u8;
            assert_eq!(s.modifiers.contains(Modifiers::SHIFT), mask & 1 != 0);
            assert_eq!(s.modifiers.contains(Modifiers::ALT), mask & 2 != 0);
            assert_eq!(s.modifiers.contains(Modifiers::CTRL), mask & 4 != 0);
            assert_eq!(s.modifiers.contains(Modifiers::META), mask & 8 != 0);
            assert_eq!(s.consumed, input.len());
        }
    }

    #[test]
    fn test_extra_params_ignored() {
        let s = seq(decode(b"\x1b[1;5;9C", 0));
        assert_eq!(s.key.as_deref(), Some("right"));
        assert_eq!(s.modifiers, Modifiers::CTRL);
    }

    #[test]
    fn test_tilde_keys() {
        let cases: [(&[u8], &str); 6] = [
            (b"\x1b[3~", "delete"),
            (b"\x1b[5~", "pageup"),
            (b"\x1b[15~", "f5"),
            (b"\x1b[24~", "f12"),
            (b"\x1b[1~", "home"),
            (b"\x1b[99~", "unknown"),
        ];
        for (input, name) in cases {
            let s = seq(decode(input, 0));
            assert_eq!(s.key.as_deref(), Some(name), "input {:?}", input);
            assert_eq!(s.consumed, input.len());
        }
    }

    #[test]
    fn test_tilde_with_modifier() {
        let s = seq(decode(b"\x1b[3;5~", 0));
        assert_eq!(s.key.as_deref(), Some("delete"));
        assert_eq!(s.modifiers, Modifiers::CTRL);
    }

    #[test]
    fn test_unknown_csi_letter_consumes_without_key() {
        let s = seq(decode(b"\x1b[2Jx", 0));
        assert_eq!(s.key, None);
        assert_eq!(s.consumed, 4);
    }

    #[test]
    fn test_incomplete_csi_is_none() {
        assert_eq!(decode(b"\x1b[1;5", 0), None);
        assert!(is_partial_sequence(b"\x1b[1;5"));
    }

    #[test]
    fn test_csi_length_spans_private_sequences() {
        assert_eq!(csi_length(b"\x1b[<0;12;5Mrest"), Some(10));
        assert_eq!(csi_length(b"\x1b[?1u"), Some(5));
        assert_eq!(csi_length(b"\x1b[<0;12"), None);
        assert_eq!(csi_length(b"\x1bOP"), None);
        assert!(is_partial_sequence(b"\x1b[<0;12"));
        assert!(!is_partial_sequence(b"\x1b[<0;12;5M"));
    }

    #[test]
    fn test_osc_requires_terminator() {
        assert_eq!(decode(b"\x1b]0;title", 0), None);
        assert!(is_partial_sequence(b"\x1b]0;title"));

        let s = seq(decode(b"\x1b]0;title\x07a", 0));
        assert_eq!(s.key, None);
        assert_eq!(s.consumed, 10);

        let s = seq(decode(b"\x1b]0;t\x1b\\", 0));
        assert_eq!(s.consumed, 7);
    }

    #[test]
    fn test_ss3_keys() {
        assert_eq!(seq(decode(b"\x1bOP", 0)).key.as_deref(), Some("f1"));
        assert_eq!(seq(decode(b"\x1bOS", 0)).key.as_deref(), Some("f4"));
        assert_eq!(seq(decode(b"\x1bOH", 0)).key.as_deref(), Some("home"));
        assert_eq!(decode(b"\x1bOZ", 0), None);
        assert!(!is_partial_sequence(b"\x1bOZ"));
        assert!(is_partial_sequence(b"\x1bO"));
    }

    #[test]
    fn test_alt_key() {
        let s = seq(decode(b"\x1bX", 0));
        assert_eq!(s.key.as_deref(), Some("x"));
        assert_eq!(s.modifiers, Modifiers::ALT);
        assert_eq!(s.consumed, 2);

        let s = seq(decode(b"\x1b\x7f", 0));
        assert_eq!(s.key.as_deref(), Some("backspace"));
        assert_eq!(s.modifiers, Modifiers::ALT);
    }

    #[test]
    fn test_literal_chars() {
        let d = decode(b"a", 0).unwrap();
        let ev = d.to_key_event().unwrap();
        assert_eq!(ev.key, "a");
        assert!(ev.modifiers.is_empty());

        let ev = decode(b"Q", 0).unwrap().to_key_event().unwrap();
        assert_eq!(ev.key, "q");
        assert!(ev.shift());

        let ev = decode(b" ", 0).unwrap().to_key_event().unwrap();
        assert_eq!(ev.key, "space");
    }

    #[test]
    fn test_utf8_pass_through() {
        let input = "é".as_bytes();
        let d = decode(input, 0).unwrap();
        assert_eq!(d, Decoded::Char { ch: 'é', len: 2 });

        assert_eq!(decode(&input[..1], 0), None);
        assert!(is_partial_sequence(&input[..1]));
    }

    #[test]
    fn test_invalid_byte_is_not_partial() {
        assert_eq!(decode(&[0xFF], 0), None);
        assert!(!is_partial_sequence(&[0xFF]));
    }

    #[test]
    fn test_offset_past_end() {
        assert_eq!(decode(b"ab", 2), None);
        assert_eq!(decode(b"ab", 5), None);
    }
}
