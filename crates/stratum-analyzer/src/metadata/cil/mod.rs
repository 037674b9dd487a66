//! Reader for ECMA-335 metadata in managed PE modules
//!
//! goblin locates the CLI header. The metadata root, the table stream and the
//! heaps are decoded here and mapped onto [`ModuleImage`]: type definitions
//! with their base types, interfaces, fields, properties and methods, and for
//! every method body the members it invokes.

pub mod blob;
pub mod il;
pub mod tables;

use super::{
    LoadError, MemberDef, MethodDef, ModuleImage, ModuleKind, ModuleReader, Runtime, TypeDef,
    structural_causes,
};
use blob::{BlobReader, MAX_NESTING, TypeNames};
use goblin::pe::PE;
use goblin::pe::options::{ParseMode, ParseOptions};
use goblin::pe::section_table::SectionTable;
use scroll::{LE, Pread};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use tables::{
    ASSEMBLY, ASSEMBLY_REF, FIELD, GENERIC_PARAM, Heaps, INTERFACE_IMPL, MEMBER_REF,
    MEMBER_REF_PARENT, METHOD_DEF, METHOD_DEF_OR_REF, METHOD_SPEC, MODULE, MODULE_REF,
    NESTED_CLASS, PROPERTY, PROPERTY_MAP, RESOLUTION_SCOPE, TYPE_DEF, TYPE_DEF_OR_REF,
    TYPE_OR_METHOD_DEF, TYPE_REF, TYPE_SPEC, Tables, Token,
};
use thiserror::Error;

/// Format tag of images decoded from binary modules.
pub const FORMAT_TAG: &str = "ecma-335";

/// "BSJB"
const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// File extensions that may carry a module name in the Module table.
const MODULE_FILE_EXTENSIONS: &[&str] = &["dll", "exe", "netmodule"];

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("read out of bounds: {0}")]
    Read(#[from] scroll::Error),
    #[error("missing {0} stream")]
    MissingStream(&'static str),
    #[error("bad signature 0x{0:X}")]
    BadSignature(u32),
    #[error("unknown metadata table 0x{0:02X}")]
    UnknownTable(usize),
    #[error("row {rid} out of range in table 0x{table:02X}")]
    BadRow { table: usize, rid: u32 },
    #[error("index {index} out of range in {heap} heap")]
    BadHeapIndex { heap: &'static str, index: u32 },
    #[error("string at {0} is not UTF-8")]
    BadString(u32),
    #[error("RVA 0x{0:X} is outside every section")]
    UnmappedRva(u32),
    #[error("unknown element type 0x{0:02X}")]
    BadElementType(u8),
    #[error("invalid compressed integer")]
    BadCompressedInteger,
    #[error("invalid coded index 0x{0:X}")]
    BadCodedIndex(u32),
    #[error("type nesting too deep")]
    TooDeep,
    #[error("invalid method header at offset 0x{0:X}")]
    BadMethodHeader(usize),
    #[error("truncated {0}")]
    Truncated(&'static str),
}

#[derive(Debug, Clone)]
pub struct CilModuleReader {
    extensions: Vec<&'static str>,
}

impl CilModuleReader {
    pub fn new() -> Self {
        CilModuleReader {
            extensions: vec!["dll", "exe"],
        }
    }

    fn decode(&self, bytes: &[u8], fallback_name: &str) -> Result<ModuleImage, LoadError> {
        let pe = parse_pe(bytes)?;
        let clr = pe
            .clr_data
            .as_ref()
            .filter(|clr| clr.is_valid())
            .ok_or(LoadError::Native)?;

        let directory = clr.cor20_header.metadata;
        let start = rva_to_offset(&pe.sections, directory.virtual_address)?;
        let root = bytes
            .get(start..start.saturating_add(directory.size as usize))
            .ok_or(MetadataError::Truncated("metadata root"))?;
        let metadata = Metadata::parse(root)?;

        let kind = if pe.is_lib {
            ModuleKind::Library
        } else {
            ModuleKind::Executable
        };
        let decoder = Decoder::new(&metadata, bytes, &pe.sections)?;
        Ok(decoder.image(kind, fallback_name)?)
    }
}

impl Default for CilModuleReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleReader for CilModuleReader {
    fn extensions(&self) -> &[&str] {
        &self.extensions
    }

    fn probe(&self, path: &Path) -> bool {
        if !path.is_file() || !self.has_module_extension(path) {
            return false;
        }
        match std::fs::read(path) {
            Ok(bytes) => parse_pe(&bytes)
                .is_ok_and(|pe| pe.clr_data.as_ref().is_some_and(|clr| clr.is_valid())),
            Err(_) => false,
        }
    }

    fn read(&self, path: &Path) -> Result<ModuleImage, LoadError> {
        let bytes = std::fs::read(path)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let image = self.decode(&bytes, stem)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let causes = structural_causes(&image, dir, &self.extensions);
        if !causes.is_empty() {
            return Err(LoadError::TypeLoad(causes));
        }

        tracing::debug!(
            "Decoded module {} ({} types, {} references) from {}",
            image.name,
            image.types.len(),
            image.references.len(),
            path.display()
        );
        Ok(image)
    }
}

fn parse_pe(bytes: &[u8]) -> Result<PE<'_>, LoadError> {
    let options = ParseOptions::default()
        .with_parse_mode(ParseMode::Permissive)
        .with_parse_imports(false)
        .with_parse_resources(false)
        .with_parse_tls_data(false);
    PE::parse_with_opts(bytes, &options).map_err(|e| LoadError::NotAModule(e.to_string()))
}

/// File offset of an RVA, from the section that contains it.
fn rva_to_offset(sections: &[SectionTable], rva: u32) -> Result<usize, MetadataError> {
    sections
        .iter()
        .find_map(|section| {
            let extent = section.virtual_size.max(section.size_of_raw_data);
            let delta = rva.checked_sub(section.virtual_address)?;
            (delta < extent).then(|| section.pointer_to_raw_data as usize + delta as usize)
        })
        .ok_or(MetadataError::UnmappedRva(rva))
}

/// The streams of one metadata root.
#[derive(Debug)]
struct Metadata<'a> {
    tables: Tables<'a>,
    heaps: Heaps<'a>,
}

impl<'a> Metadata<'a> {
    fn parse(root: &'a [u8]) -> Result<Self, MetadataError> {
        let signature: u32 = root.pread_with(0, LE)?;
        if signature != METADATA_SIGNATURE {
            return Err(MetadataError::BadSignature(signature));
        }
        let version_len: u32 = root.pread_with(12, LE)?;
        let mut offset = 16 + version_len as usize + 2; // version, flags
        let count: u16 = root.gread_with(&mut offset, LE)?;

        let (mut table_stream, mut strings, mut blobs) = (None, None, None);
        for _ in 0..count {
            let start: u32 = root.gread_with(&mut offset, LE)?;
            let size: u32 = root.gread_with(&mut offset, LE)?;
            let rest = root
                .get(offset..)
                .ok_or(MetadataError::Truncated("stream header"))?;
            let len = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(MetadataError::Truncated("stream name"))?;
            let name = &rest[..len];
            offset += (len + 4) & !3;

            let data = root
                .get(start as usize..(start as usize).saturating_add(size as usize))
                .ok_or(MetadataError::Truncated("metadata stream"))?;
            match name {
                b"#~" | b"#-" => table_stream = Some(data),
                b"#Strings" => strings = Some(data),
                b"#Blob" => blobs = Some(data),
                _ => {}
            }
        }

        let table_stream = table_stream.ok_or(MetadataError::MissingStream("#~"))?;
        Ok(Metadata {
            tables: Tables::parse(table_stream)?,
            heaps: Heaps {
                strings: strings.ok_or(MetadataError::MissingStream("#Strings"))?,
                blobs: blobs.unwrap_or_default(),
            },
        })
    }
}

/// Maps decoded tables onto a [`ModuleImage`].
struct Decoder<'a> {
    metadata: &'a Metadata<'a>,
    bytes: &'a [u8],
    sections: &'a [SectionTable],
    /// Full names of TypeDef rows, by rid - 1.
    type_names: Vec<String>,
    /// Nested TypeDef rid -> enclosing TypeDef rid.
    enclosing: HashMap<u32, u32>,
    /// Generic parameter names of TypeDef rows, in declaration order.
    generics: HashMap<u32, Vec<String>>,
    /// Declaring TypeDef rid of every MethodDef, by rid - 1.
    method_owners: Vec<u32>,
}

impl<'a> Decoder<'a> {
    fn new(
        metadata: &'a Metadata<'a>,
        bytes: &'a [u8],
        sections: &'a [SectionTable],
    ) -> Result<Self, MetadataError> {
        let tables = &metadata.tables;

        let mut enclosing = HashMap::new();
        for row in 1..=tables.rows(NESTED_CLASS) {
            enclosing.insert(
                tables.cell(NESTED_CLASS, row, 0)?,
                tables.cell(NESTED_CLASS, row, 1)?,
            );
        }

        let mut numbered: HashMap<u32, Vec<(u32, String)>> = HashMap::new();
        for row in 1..=tables.rows(GENERIC_PARAM) {
            if let Some(Token { table: TYPE_DEF, rid }) =
                tables.coded(GENERIC_PARAM, row, 2, TYPE_OR_METHOD_DEF)?
            {
                let number = tables.cell(GENERIC_PARAM, row, 0)?;
                let name = metadata.heaps.string(tables.cell(GENERIC_PARAM, row, 3)?)?;
                numbered.entry(rid).or_default().push((number, name.to_string()));
            }
        }
        let generics = numbered
            .into_iter()
            .map(|(rid, mut params)| {
                params.sort_by_key(|(number, _)| *number);
                (rid, params.into_iter().map(|(_, name)| name).collect())
            })
            .collect();

        let mut method_owners = vec![0; tables.rows(METHOD_DEF) as usize];
        for rid in 1..=tables.rows(TYPE_DEF) {
            for method in tables.list(TYPE_DEF, rid, 5, METHOD_DEF)? {
                method_owners[method as usize - 1] = rid;
            }
        }

        let mut decoder = Decoder {
            metadata,
            bytes,
            sections,
            type_names: Vec::new(),
            enclosing,
            generics,
            method_owners,
        };
        let type_names = (1..=tables.rows(TYPE_DEF))
            .map(|rid| decoder.type_def_name(rid, 0))
            .collect::<Result<_, _>>()?;
        decoder.type_names = type_names;
        Ok(decoder)
    }

    fn tables(&self) -> &'a Tables<'a> {
        &self.metadata.tables
    }

    fn string(&self, table: usize, rid: u32, column: usize) -> Result<&'a str, MetadataError> {
        self.metadata
            .heaps
            .string(self.tables().cell(table, rid, column)?)
    }

    fn blob(&self, table: usize, rid: u32, column: usize) -> Result<&'a [u8], MetadataError> {
        self.metadata.heaps.blob(self.tables().cell(table, rid, column)?)
    }

    fn type_def_name(&self, rid: u32, depth: usize) -> Result<String, MetadataError> {
        if depth > MAX_NESTING {
            return Err(MetadataError::TooDeep);
        }
        let name = self.string(TYPE_DEF, rid, 1)?;
        match self.enclosing.get(&rid) {
            Some(&outer) => Ok(format!("{}+{}", self.type_def_name(outer, depth + 1)?, name)),
            None => Ok(qualify(self.string(TYPE_DEF, rid, 2)?, name)),
        }
    }

    fn type_ref_name(&self, rid: u32, depth: usize) -> Result<String, MetadataError> {
        if depth > MAX_NESTING {
            return Err(MetadataError::TooDeep);
        }
        let name = self.string(TYPE_REF, rid, 1)?;
        match self.tables().coded(TYPE_REF, rid, 0, RESOLUTION_SCOPE)? {
            Some(Token {
                table: TYPE_REF,
                rid: outer,
            }) => Ok(format!("{}+{}", self.type_ref_name(outer, depth + 1)?, name)),
            _ => Ok(qualify(self.string(TYPE_REF, rid, 2)?, name)),
        }
    }

    fn full_name(&self, rid: u32) -> Result<&str, MetadataError> {
        (rid as usize)
            .checked_sub(1)
            .and_then(|index| self.type_names.get(index))
            .map(String::as_str)
            .ok_or(MetadataError::BadRow {
                table: TYPE_DEF,
                rid,
            })
    }

    /// Full name of a TypeDef, or `None` for `<Module>` and compiler-generated types.
    fn visible_type(&self, rid: u32) -> Result<Option<String>, MetadataError> {
        let name = self.full_name(rid)?;
        Ok((!name.contains('<')).then(|| name.to_string()))
    }

    fn method_owner(&self, rid: u32) -> Result<Option<String>, MetadataError> {
        let owner = (rid as usize)
            .checked_sub(1)
            .and_then(|index| self.method_owners.get(index))
            .copied()
            .ok_or(MetadataError::BadRow {
                table: METHOD_DEF,
                rid,
            })?;
        if owner == 0 {
            return Ok(None);
        }
        self.visible_type(owner)
    }

    fn image(&self, kind: ModuleKind, fallback_name: &str) -> Result<ModuleImage, MetadataError> {
        let tables = self.tables();

        let mut interfaces: HashMap<u32, Vec<Token>> = HashMap::new();
        for row in 1..=tables.rows(INTERFACE_IMPL) {
            let class = tables.cell(INTERFACE_IMPL, row, 0)?;
            if let Some(interface) = tables.coded(INTERFACE_IMPL, row, 1, TYPE_DEF_OR_REF)? {
                interfaces.entry(class).or_default().push(interface);
            }
        }

        let mut properties: HashMap<u32, Range<u32>> = HashMap::new();
        for row in 1..=tables.rows(PROPERTY_MAP) {
            properties.insert(
                tables.cell(PROPERTY_MAP, row, 0)?,
                tables.list(PROPERTY_MAP, row, 1, PROPERTY)?,
            );
        }

        let mut types = Vec::new();
        for rid in 1..=tables.rows(TYPE_DEF) {
            if self.visible_type(rid)?.is_none() {
                continue;
            }
            let implemented = interfaces.get(&rid).map(Vec::as_slice).unwrap_or_default();
            let property_rows = properties.get(&rid).cloned().unwrap_or(0..0);
            types.push(self.type_def(rid, implemented, property_rows)?);
        }

        let references = (1..=tables.rows(ASSEMBLY_REF))
            .map(|row| self.string(ASSEMBLY_REF, row, 6).map(str::to_string))
            .collect::<Result<_, _>>()?;

        Ok(ModuleImage {
            format: FORMAT_TAG.to_string(),
            name: self.module_name(fallback_name)?,
            kind,
            runtime: Runtime::Managed,
            references,
            types,
        })
    }

    /// Assembly name, else the Module name without its file extension.
    fn module_name(&self, fallback_name: &str) -> Result<String, MetadataError> {
        let tables = self.tables();
        if tables.rows(ASSEMBLY) > 0 {
            return Ok(self.string(ASSEMBLY, 1, 7)?.to_string());
        }
        if tables.rows(MODULE) > 0 {
            let name = self.string(MODULE, 1, 1)?;
            let stem = name
                .rsplit_once('.')
                .filter(|(_, ext)| {
                    MODULE_FILE_EXTENSIONS
                        .iter()
                        .any(|known| known.eq_ignore_ascii_case(ext))
                })
                .map_or(name, |(stem, _)| stem);
            if !stem.is_empty() {
                return Ok(stem.to_string());
            }
        }
        Ok(fallback_name.to_string())
    }

    fn type_def(
        &self,
        rid: u32,
        implemented: &[Token],
        property_rows: Range<u32>,
    ) -> Result<TypeDef, MetadataError> {
        let tables = self.tables();
        let generics = self.generics.get(&rid).map(Vec::as_slice).unwrap_or_default();
        let scope = Scope {
            decoder: self,
            generics,
        };

        let declaring_type = match self.enclosing.get(&rid) {
            Some(&outer) => Some(self.full_name(outer)?.to_string()),
            None => None,
        };
        let base = match tables.coded(TYPE_DEF, rid, 3, TYPE_DEF_OR_REF)? {
            Some(token) => scope.type_name(token, 0)?,
            None => None,
        };
        let mut interfaces = Vec::new();
        for token in implemented {
            interfaces.extend(scope.type_name(*token, 0)?);
        }

        let mut fields = Vec::new();
        for row in tables.list(TYPE_DEF, rid, 4, FIELD)? {
            let signature = self.blob(FIELD, row, 2)?;
            if let Some(type_name) = blob::field_type(signature, &scope, generics)? {
                fields.push(MemberDef {
                    name: self.string(FIELD, row, 1)?.to_string(),
                    type_name,
                });
            }
        }

        let mut properties = Vec::new();
        for row in property_rows {
            let signature = self.blob(PROPERTY, row, 2)?;
            if let Some(type_name) = blob::property_type(signature, &scope, generics)? {
                properties.push(MemberDef {
                    name: self.string(PROPERTY, row, 1)?.to_string(),
                    type_name,
                });
            }
        }

        let methods = tables
            .list(TYPE_DEF, rid, 5, METHOD_DEF)?
            .map(|row| self.method(row, &scope))
            .collect::<Result<_, _>>()?;

        Ok(TypeDef {
            namespace: self.string(TYPE_DEF, rid, 2)?.to_string(),
            name: self.string(TYPE_DEF, rid, 1)?.to_string(),
            declaring_type,
            generic_parameters: generics.to_vec(),
            base,
            interfaces,
            generic_arguments: Vec::new(),
            fields,
            properties,
            methods,
        })
    }

    fn method(&self, rid: u32, scope: &Scope<'_, 'a>) -> Result<MethodDef, MetadataError> {
        let mut reader = BlobReader::new(self.blob(METHOD_DEF, rid, 4)?);
        let signature = blob::method_signature(&mut reader, scope, scope.generics, 0)?;

        let mut calls = Vec::new();
        let rva = self.tables().cell(METHOD_DEF, rid, 0)?;
        if rva != 0 {
            let code = il::method_code(self.bytes, rva_to_offset(self.sections, rva)?)?;
            for token in il::call_tokens(code) {
                if let Some(target) = self.call_target(token, scope)?
                    && !calls.contains(&target)
                {
                    calls.push(target);
                }
            }
        }

        Ok(MethodDef {
            name: self.string(METHOD_DEF, rid, 3)?.to_string(),
            parameters: signature.parameters,
            return_type: signature.return_type,
            calls,
        })
    }

    /// `Declaring.Type::Member` for an invoked method token.
    fn call_target(&self, token: Token, scope: &Scope<'_, 'a>) -> Result<Option<String>, MetadataError> {
        let tables = self.tables();
        let (owner, name) = match token.table {
            METHOD_DEF => (
                self.method_owner(token.rid)?,
                self.string(METHOD_DEF, token.rid, 3)?,
            ),
            MEMBER_REF => {
                let owner = match tables.coded(MEMBER_REF, token.rid, 0, MEMBER_REF_PARENT)? {
                    Some(Token {
                        table: METHOD_DEF,
                        rid,
                    }) => self.method_owner(rid)?,
                    Some(Token {
                        table: MODULE_REF, ..
                    })
                    | None => None,
                    Some(parent) => scope.type_name(parent, 0)?,
                };
                (owner, self.string(MEMBER_REF, token.rid, 1)?)
            }
            METHOD_SPEC => {
                return match tables.coded(METHOD_SPEC, token.rid, 0, METHOD_DEF_OR_REF)? {
                    Some(method) => self.call_target(method, scope),
                    None => Ok(None),
                };
            }
            _ => return Ok(None),
        };
        Ok(owner.map(|owner| format!("{owner}::{name}")))
    }
}

/// Type name resolution with the generic parameters of one type in scope.
struct Scope<'d, 'a> {
    decoder: &'d Decoder<'a>,
    generics: &'d [String],
}

impl TypeNames for Scope<'_, '_> {
    fn type_name(&self, token: Token, depth: usize) -> Result<Option<String>, MetadataError> {
        if depth > MAX_NESTING {
            return Err(MetadataError::TooDeep);
        }
        match token.table {
            TYPE_DEF => self.decoder.visible_type(token.rid),
            TYPE_REF => self.decoder.type_ref_name(token.rid, depth).map(Some),
            TYPE_SPEC => {
                let signature = self.decoder.blob(TYPE_SPEC, token.rid, 0)?;
                blob::decode_type(&mut BlobReader::new(signature), self, self.generics, depth)
            }
            _ => Ok(None),
        }
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}
