//! The `#~` table stream and the string and blob heaps

use super::MetadataError;
use scroll::{LE, Pread};
use std::ops::Range;

pub const MODULE: usize = 0x00;
pub const TYPE_REF: usize = 0x01;
pub const TYPE_DEF: usize = 0x02;
pub const FIELD: usize = 0x04;
pub const METHOD_DEF: usize = 0x06;
pub const PARAM: usize = 0x08;
pub const INTERFACE_IMPL: usize = 0x09;
pub const MEMBER_REF: usize = 0x0A;
pub const DECL_SECURITY: usize = 0x0E;
pub const STAND_ALONE_SIG: usize = 0x11;
pub const EVENT: usize = 0x14;
pub const PROPERTY_MAP: usize = 0x15;
pub const PROPERTY: usize = 0x17;
pub const MODULE_REF: usize = 0x1A;
pub const TYPE_SPEC: usize = 0x1B;
pub const ASSEMBLY: usize = 0x20;
pub const ASSEMBLY_REF: usize = 0x23;
pub const FILE: usize = 0x26;
pub const EXPORTED_TYPE: usize = 0x27;
pub const MANIFEST_RESOURCE: usize = 0x28;
pub const NESTED_CLASS: usize = 0x29;
pub const GENERIC_PARAM: usize = 0x2A;
pub const METHOD_SPEC: usize = 0x2B;
pub const GENERIC_PARAM_CONSTRAINT: usize = 0x2C;

const TABLE_COUNT: usize = 0x2D;

/// Target tables of a coded index, in tag order. `None` marks unused tags.
pub type CodedIndex = &'static [Option<usize>];

pub const TYPE_DEF_OR_REF: CodedIndex = &[Some(TYPE_DEF), Some(TYPE_REF), Some(TYPE_SPEC)];
const HAS_CONSTANT: CodedIndex = &[Some(FIELD), Some(PARAM), Some(PROPERTY)];
const HAS_CUSTOM_ATTRIBUTE: CodedIndex = &[
    Some(METHOD_DEF),
    Some(FIELD),
    Some(TYPE_REF),
    Some(TYPE_DEF),
    Some(PARAM),
    Some(INTERFACE_IMPL),
    Some(MEMBER_REF),
    Some(MODULE),
    Some(DECL_SECURITY),
    Some(PROPERTY),
    Some(EVENT),
    Some(STAND_ALONE_SIG),
    Some(MODULE_REF),
    Some(TYPE_SPEC),
    Some(ASSEMBLY),
    Some(ASSEMBLY_REF),
    Some(FILE),
    Some(EXPORTED_TYPE),
    Some(MANIFEST_RESOURCE),
    Some(GENERIC_PARAM),
    Some(GENERIC_PARAM_CONSTRAINT),
    Some(METHOD_SPEC),
];
const HAS_FIELD_MARSHAL: CodedIndex = &[Some(FIELD), Some(PARAM)];
const HAS_DECL_SECURITY: CodedIndex = &[Some(TYPE_DEF), Some(METHOD_DEF), Some(ASSEMBLY)];
pub const MEMBER_REF_PARENT: CodedIndex = &[
    Some(TYPE_DEF),
    Some(TYPE_REF),
    Some(MODULE_REF),
    Some(METHOD_DEF),
    Some(TYPE_SPEC),
];
const HAS_SEMANTICS: CodedIndex = &[Some(EVENT), Some(PROPERTY)];
pub const METHOD_DEF_OR_REF: CodedIndex = &[Some(METHOD_DEF), Some(MEMBER_REF)];
const MEMBER_FORWARDED: CodedIndex = &[Some(FIELD), Some(METHOD_DEF)];
const IMPLEMENTATION: CodedIndex = &[Some(FILE), Some(ASSEMBLY_REF), Some(EXPORTED_TYPE)];
const CUSTOM_ATTRIBUTE_TYPE: CodedIndex = &[None, None, Some(METHOD_DEF), Some(MEMBER_REF), None];
pub const RESOLUTION_SCOPE: CodedIndex = &[
    Some(MODULE),
    Some(MODULE_REF),
    Some(ASSEMBLY_REF),
    Some(TYPE_REF),
];
pub const TYPE_OR_METHOD_DEF: CodedIndex = &[Some(TYPE_DEF), Some(METHOD_DEF)];

#[derive(Debug, Clone, Copy)]
enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Index(usize),
    Coded(CodedIndex),
}

use Column::*;

/// Column layout of every table, indexed by table id.
const SCHEMA: [&[Column]; TABLE_COUNT] = [
    /* 0x00 Module */ &[U16, Str, Guid, Guid, Guid],
    /* 0x01 TypeRef */ &[Coded(RESOLUTION_SCOPE), Str, Str],
    /* 0x02 TypeDef */
    &[U32, Str, Str, Coded(TYPE_DEF_OR_REF), Index(FIELD), Index(METHOD_DEF)],
    /* 0x03 FieldPtr */ &[Index(FIELD)],
    /* 0x04 Field */ &[U16, Str, Blob],
    /* 0x05 MethodPtr */ &[Index(METHOD_DEF)],
    /* 0x06 MethodDef */ &[U32, U16, U16, Str, Blob, Index(PARAM)],
    /* 0x07 ParamPtr */ &[Index(PARAM)],
    /* 0x08 Param */ &[U16, U16, Str],
    /* 0x09 InterfaceImpl */ &[Index(TYPE_DEF), Coded(TYPE_DEF_OR_REF)],
    /* 0x0A MemberRef */ &[Coded(MEMBER_REF_PARENT), Str, Blob],
    /* 0x0B Constant */ &[U16, Coded(HAS_CONSTANT), Blob],
    /* 0x0C CustomAttribute */
    &[Coded(HAS_CUSTOM_ATTRIBUTE), Coded(CUSTOM_ATTRIBUTE_TYPE), Blob],
    /* 0x0D FieldMarshal */ &[Coded(HAS_FIELD_MARSHAL), Blob],
    /* 0x0E DeclSecurity */ &[U16, Coded(HAS_DECL_SECURITY), Blob],
    /* 0x0F ClassLayout */ &[U16, U32, Index(TYPE_DEF)],
    /* 0x10 FieldLayout */ &[U32, Index(FIELD)],
    /* 0x11 StandAloneSig */ &[Blob],
    /* 0x12 EventMap */ &[Index(TYPE_DEF), Index(EVENT)],
    /* 0x13 EventPtr */ &[Index(EVENT)],
    /* 0x14 Event */ &[U16, Str, Coded(TYPE_DEF_OR_REF)],
    /* 0x15 PropertyMap */ &[Index(TYPE_DEF), Index(PROPERTY)],
    /* 0x16 PropertyPtr */ &[Index(PROPERTY)],
    /* 0x17 Property */ &[U16, Str, Blob],
    /* 0x18 MethodSemantics */ &[U16, Index(METHOD_DEF), Coded(HAS_SEMANTICS)],
    /* 0x19 MethodImpl */
    &[Index(TYPE_DEF), Coded(METHOD_DEF_OR_REF), Coded(METHOD_DEF_OR_REF)],
    /* 0x1A ModuleRef */ &[Str],
    /* 0x1B TypeSpec */ &[Blob],
    /* 0x1C ImplMap */ &[U16, Coded(MEMBER_FORWARDED), Str, Index(MODULE_REF)],
    /* 0x1D FieldRVA */ &[U32, Index(FIELD)],
    /* 0x1E EncLog */ &[U32, U32],
    /* 0x1F EncMap */ &[U32],
    /* 0x20 Assembly */ &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
    /* 0x21 AssemblyProcessor */ &[U32],
    /* 0x22 AssemblyOS */ &[U32, U32, U32],
    /* 0x23 AssemblyRef */ &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
    /* 0x24 AssemblyRefProcessor */ &[U32, Index(ASSEMBLY_REF)],
    /* 0x25 AssemblyRefOS */ &[U32, U32, U32, Index(ASSEMBLY_REF)],
    /* 0x26 File */ &[U32, Str, Blob],
    /* 0x27 ExportedType */ &[U32, U32, Str, Str, Coded(IMPLEMENTATION)],
    /* 0x28 ManifestResource */ &[U32, U32, Str, Coded(IMPLEMENTATION)],
    /* 0x29 NestedClass */ &[Index(TYPE_DEF), Index(TYPE_DEF)],
    /* 0x2A GenericParam */ &[U16, U16, Coded(TYPE_OR_METHOD_DEF), Str],
    /* 0x2B MethodSpec */ &[Coded(METHOD_DEF_OR_REF), Blob],
    /* 0x2C GenericParamConstraint */ &[Index(GENERIC_PARAM), Coded(TYPE_DEF_OR_REF)],
];

/// A row in one table. Row ids start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    pub table: usize,
    pub rid: u32,
}

impl Token {
    /// Split a 4-byte metadata token (table in the high byte).
    pub fn from_raw(raw: u32) -> Self {
        Token {
            table: (raw >> 24) as usize,
            rid: raw & 0x00FF_FFFF,
        }
    }
}

/// Bits needed to hold a tag for `targets`.
fn tag_bits(targets: CodedIndex) -> u32 {
    usize::BITS - (targets.len() - 1).leading_zeros()
}

/// Decode a coded index. `Ok(None)` is the null index.
pub fn decode_coded(value: u32, targets: CodedIndex) -> Result<Option<Token>, MetadataError> {
    let bits = tag_bits(targets);
    let tag = (value & ((1 << bits) - 1)) as usize;
    let rid = value >> bits;
    if rid == 0 {
        return Ok(None);
    }
    match targets.get(tag).copied().flatten() {
        Some(table) => Ok(Some(Token { table, rid })),
        None => Err(MetadataError::BadCodedIndex(value)),
    }
}

#[derive(Debug)]
pub struct Tables<'a> {
    data: &'a [u8],
    rows: [u32; TABLE_COUNT],
    start: [usize; TABLE_COUNT],
    row_size: [usize; TABLE_COUNT],
    /// Per table: (offset in row, width) of every column.
    columns: Vec<Vec<(usize, usize)>>,
}

impl<'a> Tables<'a> {
    pub fn parse(stream: &'a [u8]) -> Result<Self, MetadataError> {
        let mut offset = 6; // reserved, major, minor
        let heap_sizes: u8 = stream.gread_with(&mut offset, LE)?;
        offset += 1;
        let valid: u64 = stream.gread_with(&mut offset, LE)?;
        offset += 8; // sorted

        if let Some(unknown) = (TABLE_COUNT..64).find(|bit| valid & (1 << bit) != 0) {
            return Err(MetadataError::UnknownTable(unknown));
        }

        let mut rows = [0u32; TABLE_COUNT];
        for (id, count) in rows.iter_mut().enumerate() {
            if valid & (1 << id) != 0 {
                *count = stream.gread_with(&mut offset, LE)?;
            }
        }
        if heap_sizes & 0x40 != 0 {
            offset += 4;
        }

        let widths = HeapWidths {
            string: if heap_sizes & 0x01 != 0 { 4 } else { 2 },
            guid: if heap_sizes & 0x02 != 0 { 4 } else { 2 },
            blob: if heap_sizes & 0x04 != 0 { 4 } else { 2 },
        };

        let mut columns = Vec::with_capacity(TABLE_COUNT);
        let mut row_size = [0usize; TABLE_COUNT];
        for (id, schema) in SCHEMA.iter().enumerate() {
            let mut at = 0;
            let layout = schema
                .iter()
                .map(|column| {
                    let width = column_width(*column, &rows, &widths);
                    let cell = (at, width);
                    at += width;
                    cell
                })
                .collect();
            row_size[id] = at;
            columns.push(layout);
        }

        let mut start = [0usize; TABLE_COUNT];
        for id in 0..TABLE_COUNT {
            start[id] = offset;
            offset += row_size[id] * rows[id] as usize;
        }
        if offset > stream.len() {
            return Err(MetadataError::Truncated("metadata tables"));
        }

        Ok(Tables {
            data: stream,
            rows,
            start,
            row_size,
            columns,
        })
    }

    pub fn rows(&self, table: usize) -> u32 {
        self.rows.get(table).copied().unwrap_or(0)
    }

    /// Raw value of one cell.
    pub fn cell(&self, table: usize, rid: u32, column: usize) -> Result<u32, MetadataError> {
        if rid == 0 || rid > self.rows(table) {
            return Err(MetadataError::BadRow { table, rid });
        }
        let (at, width) = self.columns[table][column];
        let offset = self.start[table] + (rid as usize - 1) * self.row_size[table] + at;
        let value = match width {
            2 => u32::from(self.data.pread_with::<u16>(offset, LE)?),
            _ => self.data.pread_with::<u32>(offset, LE)?,
        };
        Ok(value)
    }

    pub fn coded(
        &self,
        table: usize,
        rid: u32,
        column: usize,
        targets: CodedIndex,
    ) -> Result<Option<Token>, MetadataError> {
        decode_coded(self.cell(table, rid, column)?, targets)
    }

    /// Rows of `target` owned by `rid`: from its list column up to the next
    /// row's list, or to the end of `target`.
    pub fn list(
        &self,
        table: usize,
        rid: u32,
        column: usize,
        target: usize,
    ) -> Result<Range<u32>, MetadataError> {
        let end_of_target = self.rows(target) + 1;
        let first = self.cell(table, rid, column)?.clamp(1, end_of_target);
        let last = if rid < self.rows(table) {
            self.cell(table, rid + 1, column)?.min(end_of_target)
        } else {
            end_of_target
        };
        Ok(first..last.max(first))
    }
}

struct HeapWidths {
    string: usize,
    guid: usize,
    blob: usize,
}

fn column_width(column: Column, rows: &[u32; TABLE_COUNT], heaps: &HeapWidths) -> usize {
    match column {
        U16 => 2,
        U32 => 4,
        Str => heaps.string,
        Guid => heaps.guid,
        Blob => heaps.blob,
        Index(table) => {
            if rows[table] < 0x1_0000 {
                2
            } else {
                4
            }
        }
        Coded(targets) => {
            let largest = targets.iter().flatten().map(|&t| rows[t]).max().unwrap_or(0);
            if largest < (1 << (16 - tag_bits(targets))) {
                2
            } else {
                4
            }
        }
    }
}

/// The `#Strings` and `#Blob` heaps.
#[derive(Debug, Clone, Copy)]
pub struct Heaps<'a> {
    pub strings: &'a [u8],
    pub blobs: &'a [u8],
}

impl<'a> Heaps<'a> {
    pub fn string(&self, index: u32) -> Result<&'a str, MetadataError> {
        let bytes = self
            .strings
            .get(index as usize..)
            .ok_or(MetadataError::BadHeapIndex {
                heap: "#Strings",
                index,
            })?;
        let end = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(MetadataError::Truncated("#Strings"))?;
        std::str::from_utf8(&bytes[..end]).map_err(|_| MetadataError::BadString(index))
    }

    pub fn blob(&self, index: u32) -> Result<&'a [u8], MetadataError> {
        if index as usize >= self.blobs.len() {
            return Err(MetadataError::BadHeapIndex {
                heap: "#Blob",
                index,
            });
        }
        let mut reader = super::blob::BlobReader::new(&self.blobs[index as usize..]);
        let len = reader.compressed()? as usize;
        reader.take(len)
    }
}
