//! Method bodies: header decoding and a linear scan of CIL opcodes for the
//! member tokens a body invokes.

use super::MetadataError;
use super::tables::Token;
use scroll::{LE, Pread};

const CALL: u8 = 0x28;
const CALLVIRT: u8 = 0x6F;
const NEWOBJ: u8 = 0x73;
const PREFIX: u8 = 0xFE;
const LDFTN: u8 = 0x06;
const LDVIRTFTN: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    None,
    Bytes(usize),
    Token,
    Switch,
}

fn operand(opcode: u8) -> Option<Operand> {
    let operand = match opcode {
        0x00..=0x0D
        | 0x14..=0x1E
        | 0x25
        | 0x26
        | 0x2A
        | 0x46..=0x6E
        | 0x76
        | 0x7A
        | 0x82..=0x8B
        | 0x8E
        | 0x90..=0xA2
        | 0xB3..=0xBA
        | 0xC3
        | 0xD1..=0xDC
        | 0xDF
        | 0xE0 => Operand::None,
        0x0E..=0x13 | 0x1F | 0x2B..=0x37 | 0xDE => Operand::Bytes(1),
        0x20 | 0x22 | 0x38..=0x44 | 0xDD => Operand::Bytes(4),
        0x21 | 0x23 => Operand::Bytes(8),
        0x27..=0x29
        | 0x6F..=0x75
        | 0x79
        | 0x7B..=0x81
        | 0x8C
        | 0x8D
        | 0x8F
        | 0xA3..=0xA5
        | 0xC2
        | 0xC6
        | 0xD0 => Operand::Token,
        0x45 => Operand::Switch,
        _ => return None,
    };
    Some(operand)
}

fn prefixed_operand(opcode: u8) -> Option<Operand> {
    let operand = match opcode {
        0x00..=0x05 | 0x0F | 0x11 | 0x13 | 0x14 | 0x17 | 0x18 | 0x1A | 0x1D | 0x1E => {
            Operand::None
        }
        0x06 | 0x07 | 0x15 | 0x16 | 0x1C => Operand::Token,
        0x09..=0x0E => Operand::Bytes(2),
        0x12 | 0x19 => Operand::Bytes(1),
        _ => return None,
    };
    Some(operand)
}

/// The IL bytes of the method body starting at `offset` in `image`.
pub fn method_code(image: &[u8], offset: usize) -> Result<&[u8], MetadataError> {
    let first: u8 = image.pread_with(offset, LE)?;
    let (start, size) = match first & 0b11 {
        0b10 => (offset + 1, usize::from(first >> 2)),
        0b11 => {
            let flags_size: u16 = image.pread_with(offset, LE)?;
            let header = usize::from(flags_size >> 12) * 4;
            let size: u32 = image.pread_with(offset + 4, LE)?;
            (offset + header, size as usize)
        }
        _ => return Err(MetadataError::BadMethodHeader(offset)),
    };
    image
        .get(start..start.saturating_add(size))
        .ok_or(MetadataError::Truncated("method body"))
}

/// Tokens of every `call`, `callvirt`, `newobj`, `ldftn` and `ldvirtftn`
/// operand, in first-seen order without repeats.
pub fn call_tokens(code: &[u8]) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut at = 0;

    while at < code.len() {
        let opcode = code[at];
        at += 1;
        let (kind, invokes) = if opcode == PREFIX {
            let Some(&second) = code.get(at) else { break };
            at += 1;
            (
                prefixed_operand(second),
                second == LDFTN || second == LDVIRTFTN,
            )
        } else {
            (
                operand(opcode),
                matches!(opcode, CALL | CALLVIRT | NEWOBJ),
            )
        };

        let Some(kind) = kind else {
            tracing::trace!("Unknown opcode 0x{:02X} at IL offset {}, stopping scan", opcode, at - 1);
            break;
        };

        match kind {
            Operand::None => {}
            Operand::Bytes(n) => at += n,
            Operand::Token => {
                let Ok(raw) = code.pread_with::<u32>(at, LE) else { break };
                at += 4;
                let token = Token::from_raw(raw);
                if invokes && !tokens.contains(&token) {
                    tokens.push(token);
                }
            }
            Operand::Switch => {
                let Ok(count) = code.pread_with::<u32>(at, LE) else { break };
                at = at.saturating_add(4).saturating_add(count as usize * 4);
            }
        }
    }

    tokens
}
