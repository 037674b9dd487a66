//! Signature blobs: compressed integers, type encodings, and the field,
//! property and method signatures built from them.

use super::MetadataError;
use super::tables::{TYPE_DEF, TYPE_REF, TYPE_SPEC, Token};

/// Deepest type nesting followed before giving up.
pub const MAX_NESTING: usize = 32;

const ELEMENT_VOID: u8 = 0x01;
const ELEMENT_PTR: u8 = 0x0F;
const ELEMENT_BYREF: u8 = 0x10;
const ELEMENT_VALUETYPE: u8 = 0x11;
const ELEMENT_CLASS: u8 = 0x12;
const ELEMENT_VAR: u8 = 0x13;
const ELEMENT_ARRAY: u8 = 0x14;
const ELEMENT_GENERICINST: u8 = 0x15;
const ELEMENT_FNPTR: u8 = 0x1B;
const ELEMENT_SZARRAY: u8 = 0x1D;
const ELEMENT_MVAR: u8 = 0x1E;
const ELEMENT_CMOD_REQD: u8 = 0x1F;
const ELEMENT_CMOD_OPT: u8 = 0x20;
const ELEMENT_SENTINEL: u8 = 0x41;
const ELEMENT_PINNED: u8 = 0x45;

const SIG_GENERIC: u8 = 0x10;
const SIG_FIELD: u8 = 0x06;
const SIG_PROPERTY: u8 = 0x08;

fn primitive(element: u8) -> Option<&'static str> {
    let name = match element {
        0x02 => "System.Boolean",
        0x03 => "System.Char",
        0x04 => "System.SByte",
        0x05 => "System.Byte",
        0x06 => "System.Int16",
        0x07 => "System.UInt16",
        0x08 => "System.Int32",
        0x09 => "System.UInt32",
        0x0A => "System.Int64",
        0x0B => "System.UInt64",
        0x0C => "System.Single",
        0x0D => "System.Double",
        0x0E => "System.String",
        0x16 => "System.TypedReference",
        0x18 => "System.IntPtr",
        0x19 => "System.UIntPtr",
        0x1C => "System.Object",
        _ => return None,
    };
    Some(name)
}

/// Forward-only cursor over one blob.
#[derive(Debug, Clone)]
pub struct BlobReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BlobReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BlobReader { data, offset: 0 }
    }

    pub fn u8(&mut self) -> Result<u8, MetadataError> {
        let byte = *self
            .data
            .get(self.offset)
            .ok_or(MetadataError::Truncated("signature"))?;
        self.offset += 1;
        Ok(byte)
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], MetadataError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(MetadataError::Truncated("blob"))?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    /// ECMA-335 compressed unsigned integer (1, 2 or 4 bytes).
    pub fn compressed(&mut self) -> Result<u32, MetadataError> {
        let first = self.u8()?;
        if first & 0x80 == 0 {
            return Ok(u32::from(first));
        }
        if first & 0xC0 == 0x80 {
            let second = self.u8()?;
            return Ok((u32::from(first & 0x3F) << 8) | u32::from(second));
        }
        if first & 0xE0 == 0xC0 {
            let rest = self.take(3)?;
            return Ok((u32::from(first & 0x1F) << 24)
                | (u32::from(rest[0]) << 16)
                | (u32::from(rest[1]) << 8)
                | u32::from(rest[2]));
        }
        Err(MetadataError::BadCompressedInteger)
    }

    /// Signed compressed integer: the low bit carries the sign.
    fn compressed_signed(&mut self) -> Result<(), MetadataError> {
        self.compressed().map(|_| ())
    }

    /// TypeDefOrRefOrSpecEncoded token.
    pub fn type_def_or_ref(&mut self) -> Result<Token, MetadataError> {
        let value = self.compressed()?;
        let table = match value & 0b11 {
            0 => TYPE_DEF,
            1 => TYPE_REF,
            2 => TYPE_SPEC,
            _ => return Err(MetadataError::BadCodedIndex(value)),
        };
        Ok(Token {
            table,
            rid: value >> 2,
        })
    }
}

/// Resolves type tokens met inside a signature to display names.
pub trait TypeNames {
    /// `Ok(None)` when the token names nothing the graph can show.
    fn type_name(&self, token: Token, depth: usize) -> Result<Option<String>, MetadataError>;
}

/// Decode one encoded type. `generics` names the type parameters of the
/// enclosing type (`!0`, `!1`). Method type parameters and function
/// pointers render as `None`.
pub fn decode_type<N: TypeNames + ?Sized>(
    reader: &mut BlobReader<'_>,
    names: &N,
    generics: &[String],
    depth: usize,
) -> Result<Option<String>, MetadataError> {
    if depth > MAX_NESTING {
        return Err(MetadataError::TooDeep);
    }
    let element = reader.u8()?;
    if let Some(name) = primitive(element) {
        return Ok(Some(name.to_string()));
    }
    match element {
        ELEMENT_VOID => Ok(Some("System.Void".to_string())),
        ELEMENT_PTR => Ok(decode_type(reader, names, generics, depth + 1)?.map(|t| t + "*")),
        ELEMENT_BYREF => Ok(decode_type(reader, names, generics, depth + 1)?.map(|t| t + "&")),
        ELEMENT_VALUETYPE | ELEMENT_CLASS => {
            let token = reader.type_def_or_ref()?;
            names.type_name(token, depth + 1)
        }
        ELEMENT_VAR => {
            let number = reader.compressed()? as usize;
            Ok(Some(
                generics
                    .get(number)
                    .cloned()
                    .unwrap_or_else(|| format!("!{number}")),
            ))
        }
        ELEMENT_MVAR => {
            reader.compressed()?;
            Ok(None)
        }
        ELEMENT_ARRAY => {
            let inner = decode_type(reader, names, generics, depth + 1)?;
            let rank = reader.compressed()?;
            let sizes = reader.compressed()?;
            for _ in 0..sizes {
                reader.compressed()?;
            }
            let bounds = reader.compressed()?;
            for _ in 0..bounds {
                reader.compressed_signed()?;
            }
            let commas = ",".repeat(rank.saturating_sub(1) as usize);
            Ok(inner.map(|t| format!("{t}[{commas}]")))
        }
        ELEMENT_GENERICINST => {
            let _class_or_value = reader.u8()?;
            let head = names.type_name(reader.type_def_or_ref()?, depth + 1)?;
            let count = reader.compressed()?;
            let mut arguments = Vec::new();
            for _ in 0..count {
                if let Some(argument) = decode_type(reader, names, generics, depth + 1)? {
                    arguments.push(argument);
                }
            }
            Ok(head.map(|head| {
                if arguments.is_empty() {
                    head
                } else {
                    format!("{head}<{}>", arguments.join(", "))
                }
            }))
        }
        ELEMENT_FNPTR => {
            method_signature(reader, names, generics, depth + 1)?;
            Ok(None)
        }
        ELEMENT_SZARRAY => {
            Ok(decode_type(reader, names, generics, depth + 1)?.map(|t| t + "[]"))
        }
        ELEMENT_CMOD_REQD | ELEMENT_CMOD_OPT => {
            reader.type_def_or_ref()?;
            decode_type(reader, names, generics, depth + 1)
        }
        ELEMENT_PINNED | ELEMENT_SENTINEL => decode_type(reader, names, generics, depth + 1),
        other => Err(MetadataError::BadElementType(other)),
    }
}

/// Parameter and return types of a method signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSignature {
    pub parameters: Vec<String>,
    /// `None` for `void`.
    pub return_type: Option<String>,
}

pub fn method_signature<N: TypeNames + ?Sized>(
    reader: &mut BlobReader<'_>,
    names: &N,
    generics: &[String],
    depth: usize,
) -> Result<MethodSignature, MetadataError> {
    let flags = reader.u8()?;
    if flags & SIG_GENERIC != 0 {
        reader.compressed()?;
    }
    let count = reader.compressed()?;

    let return_type = if reader.peek() == Some(ELEMENT_VOID) {
        reader.u8()?;
        None
    } else {
        decode_type(reader, names, generics, depth)?
    };

    let mut parameters = Vec::new();
    for _ in 0..count {
        if reader.peek() == Some(ELEMENT_SENTINEL) {
            reader.u8()?;
        }
        if let Some(parameter) = decode_type(reader, names, generics, depth)? {
            parameters.push(parameter);
        }
    }

    Ok(MethodSignature {
        parameters,
        return_type,
    })
}

pub fn field_type<N: TypeNames + ?Sized>(
    blob: &[u8],
    names: &N,
    generics: &[String],
) -> Result<Option<String>, MetadataError> {
    let mut reader = BlobReader::new(blob);
    let lead = reader.u8()?;
    if lead != SIG_FIELD {
        return Err(MetadataError::BadSignature(u32::from(lead)));
    }
    decode_type(&mut reader, names, generics, 0)
}

pub fn property_type<N: TypeNames + ?Sized>(
    blob: &[u8],
    names: &N,
    generics: &[String],
) -> Result<Option<String>, MetadataError> {
    let mut reader = BlobReader::new(blob);
    let lead = reader.u8()?;
    if lead & SIG_PROPERTY == 0 {
        return Err(MetadataError::BadSignature(u32::from(lead)));
    }
    reader.compressed()?;
    decode_type(&mut reader, names, generics, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl TypeNames for Fixed {
        fn type_name(&self, token: Token, _: usize) -> Result<Option<String>, MetadataError> {
            Ok(match (token.table, token.rid) {
                (TYPE_DEF, 2) => Some("Shapes.List`1".to_string()),
                (TYPE_REF, 1) => Some("System.Object".to_string()),
                _ => None,
            })
        }
    }

    fn render(bytes: &[u8]) -> Option<String> {
        let generics = vec!["T".to_string()];
        decode_type(&mut BlobReader::new(bytes), &Fixed, &generics, 0).unwrap()
    }

    #[test]
    fn test_compressed_integers() {
        let mut reader = BlobReader::new(&[0x03, 0x80, 0x80, 0xC0, 0x00, 0x40, 0x00, 0xFF]);
        assert_eq!(reader.compressed().unwrap(), 3);
        assert_eq!(reader.compressed().unwrap(), 0x80);
        assert_eq!(reader.compressed().unwrap(), 0x4000);
        assert!(reader.compressed().is_err());
    }

    #[test]
    fn test_type_encodings() {
        assert_eq!(render(&[0x08]).as_deref(), Some("System.Int32"));
        assert_eq!(render(&[0x1D, 0x0E]).as_deref(), Some("System.String[]"));
        assert_eq!(render(&[0x10, 0x0D]).as_deref(), Some("System.Double&"));
        assert_eq!(render(&[0x13, 0x00]).as_deref(), Some("T"));
        assert_eq!(render(&[0x1E, 0x00]), None);
        assert_eq!(
            render(&[0x14, 0x08, 0x02, 0x00, 0x00]).as_deref(),
            Some("System.Int32[,]")
        );
        // List<object, !!0> drops the method type parameter
        assert_eq!(
            render(&[0x15, 0x12, 0x08, 0x02, 0x12, 0x05, 0x1E, 0x00]).as_deref(),
            Some("Shapes.List`1<System.Object>")
        );
        // modreq(Object) int
        assert_eq!(render(&[0x1F, 0x05, 0x08]).as_deref(), Some("System.Int32"));
        assert!(
            decode_type(&mut BlobReader::new(&[0x50]), &Fixed, &[], 0).is_err(),
            "unknown element type"
        );
    }

    #[test]
    fn test_nesting_is_bounded() {
        let deep = vec![ELEMENT_SZARRAY; MAX_NESTING + 4];
        let err = decode_type(&mut BlobReader::new(&deep), &Fixed, &[], 0).unwrap_err();
        assert!(matches!(err, MetadataError::TooDeep));
    }

    #[test]
    fn test_member_signatures() {
        let method = method_signature(
            &mut BlobReader::new(&[0x20, 0x02, 0x0E, 0x08, 0x1D, 0x12, 0x05]),
            &Fixed,
            &[],
            0,
        )
        .unwrap();
        assert_eq!(method.return_type.as_deref(), Some("System.String"));
        assert_eq!(method.parameters, vec!["System.Int32", "System.Object[]"]);

        let void = method_signature(&mut BlobReader::new(&[0x00, 0x00, 0x01]), &Fixed, &[], 0)
            .unwrap();
        assert_eq!(void, MethodSignature::default());

        assert_eq!(
            field_type(&[0x06, 0x0C], &Fixed, &[]).unwrap().as_deref(),
            Some("System.Single")
        );
        assert!(field_type(&[0x07, 0x0C], &Fixed, &[]).is_err());
        assert_eq!(
            property_type(&[0x28, 0x00, 0x0D], &Fixed, &[]).unwrap().as_deref(),
            Some("System.Double")
        );
    }
}
