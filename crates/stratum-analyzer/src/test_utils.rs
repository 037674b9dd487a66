//! Fixture builders writing metadata images into temporary directories

use crate::metadata::json::FORMAT_TAG;
use crate::metadata::cil::tables::{
    ASSEMBLY, ASSEMBLY_REF, FIELD, GENERIC_PARAM, INTERFACE_IMPL, MEMBER_REF, METHOD_DEF, MODULE,
    NESTED_CLASS, PROPERTY, PROPERTY_MAP, TYPE_DEF, TYPE_REF, TYPE_SPEC,
};
use crate::metadata::{
    JsonModuleReader, MemberDef, MethodDef, ModuleImage, ModuleKind, ModuleReader, Runtime,
    TypeDef,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn json_reader() -> Arc<dyn ModuleReader> {
    Arc::new(JsonModuleReader::new())
}

pub fn module(name: &str) -> ModuleImage {
    ModuleImage {
        format: FORMAT_TAG.to_string(),
        name: name.to_string(),
        kind: ModuleKind::Library,
        runtime: Runtime::Managed,
        references: vec![],
        types: vec![],
    }
}

pub fn executable(name: &str) -> ModuleImage {
    ModuleImage {
        kind: ModuleKind::Executable,
        ..module(name)
    }
}

/// A type from its full name, split at the last dot.
pub fn class(full_name: &str) -> TypeDef {
    let (namespace, name) = full_name.rsplit_once('.').unwrap_or(("", full_name));
    TypeDef {
        namespace: namespace.to_string(),
        name: name.to_string(),
        declaring_type: None,
        generic_parameters: vec![],
        base: None,
        interfaces: vec![],
        generic_arguments: vec![],
        fields: vec![],
        properties: vec![],
        methods: vec![],
    }
}

pub fn derives(mut ty: TypeDef, base: &str) -> TypeDef {
    ty.base = Some(base.to_string());
    ty
}

pub fn implements(mut ty: TypeDef, interface: &str) -> TypeDef {
    ty.interfaces.push(interface.to_string());
    ty
}

pub fn field(mut ty: TypeDef, type_name: &str) -> TypeDef {
    ty.fields.push(MemberDef {
        name: format!("field{}", ty.fields.len()),
        type_name: type_name.to_string(),
    });
    ty
}

pub fn calls(mut ty: TypeDef, target: &str) -> TypeDef {
    ty.methods.push(MethodDef {
        name: format!("Run{}", ty.methods.len()),
        parameters: vec![],
        return_type: None,
        calls: vec![target.to_string()],
    });
    ty
}

pub fn with_types(mut image: ModuleImage, types: Vec<TypeDef>) -> ModuleImage {
    image.types = types;
    image
}

/// Serialize the image to `dir/file` and return the path.
pub fn write_module(dir: &Path, file: &str, image: &ModuleImage) -> PathBuf {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, serde_json::to_vec_pretty(image).unwrap()).unwrap();
    path
}

/// Two packages: Core (library) and UI (executable). UI types use Core types;
/// Core types only use each other.
pub fn create_core_ui_fixture(dir: &Path) {
    let core = with_types(
        module("Core"),
        vec![
            class("Core.A"),
            field(class("Core.B"), "Core.A"),
            implements(class("Core.Service"), "Core.IService"),
            class("Core.IService"),
        ],
    );
    let ui = with_types(
        executable("UI"),
        vec![
            derives(class("UI.View"), "Core.A"),
            calls(class("UI.Presenter"), "Core.B::Load"),
            field(class("UI.Shell"), "UI.View"),
        ],
    );
    write_module(dir, "Core.dll", &core);
    write_module(dir, "UI.exe", &ui);
}

// ── Binary modules ──────────────────────────────────────

/// RVA of the single `.text` section.
const TEXT_RVA: u32 = 0x2000;
const COR20_SIZE: u32 = 72;
const FILE_ALIGNMENT: usize = 0x200;
const SECTION_ALIGNMENT: usize = 0x2000;

/// One cell of a table row. Heaps and tables stay small, so every index is
/// two bytes wide.
#[derive(Debug, Clone, Copy)]
pub enum Cell {
    Short(u16),
    Long(u32),
}

/// Collects table rows, heap entries and method bodies and lays them out as
/// the `.text` section of a managed module.
#[derive(Debug)]
pub struct MetadataBuilder {
    strings: Vec<u8>,
    blobs: Vec<u8>,
    tables: BTreeMap<usize, Vec<Vec<Cell>>>,
    code: Vec<u8>,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        MetadataBuilder {
            strings: vec![0],
            blobs: vec![0],
            tables: BTreeMap::new(),
            code: Vec::new(),
        }
    }

    pub fn string(&mut self, value: &str) -> Cell {
        if value.is_empty() {
            return Cell::Short(0);
        }
        let index = self.strings.len() as u16;
        self.strings.extend(value.as_bytes());
        self.strings.push(0);
        Cell::Short(index)
    }

    pub fn blob(&mut self, bytes: &[u8]) -> Cell {
        assert!(bytes.len() < 0x80);
        let index = self.blobs.len() as u16;
        self.blobs.push(bytes.len() as u8);
        self.blobs.extend(bytes);
        Cell::Short(index)
    }

    /// Append a method body with a tiny header and return its RVA.
    pub fn method_body(&mut self, code: &[u8]) -> Cell {
        assert!(code.len() < 0x40);
        let rva = TEXT_RVA + COR20_SIZE + self.code.len() as u32;
        self.code.push(((code.len() as u8) << 2) | 0b10);
        self.code.extend(code);
        Cell::Long(rva)
    }

    pub fn row(&mut self, table: usize, cells: Vec<Cell>) -> &mut Self {
        self.tables.entry(table).or_default().push(cells);
        self
    }

    fn table_stream(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(0u32.to_le_bytes());
        out.extend([2u8, 0, 0, 1]); // major, minor, heap sizes, reserved
        let valid = self.tables.keys().fold(0u64, |mask, &table| mask | (1 << table));
        out.extend(valid.to_le_bytes());
        out.extend(0u64.to_le_bytes());
        for rows in self.tables.values() {
            out.extend((rows.len() as u32).to_le_bytes());
        }
        for cell in self.tables.values().flatten().flatten() {
            match *cell {
                Cell::Short(value) => out.extend(value.to_le_bytes()),
                Cell::Long(value) => out.extend(value.to_le_bytes()),
            }
        }
        padded(out)
    }

    fn metadata_root(&self) -> Vec<u8> {
        let version = b"v4.0.30319\0\0";
        let streams: [(&[u8], Vec<u8>); 3] = [
            (b"#~\0\0", self.table_stream()),
            (b"#Strings\0\0\0\0", padded(self.strings.clone())),
            (b"#Blob\0\0\0", padded(self.blobs.clone())),
        ];
        let header_len = 16
            + version.len()
            + 4
            + streams.iter().map(|(name, _)| 8 + name.len()).sum::<usize>();

        let mut root = Vec::new();
        root.extend(0x424A_5342u32.to_le_bytes());
        root.extend(1u16.to_le_bytes());
        root.extend(1u16.to_le_bytes());
        root.extend(0u32.to_le_bytes());
        root.extend((version.len() as u32).to_le_bytes());
        root.extend(version);
        root.extend(0u16.to_le_bytes());
        root.extend((streams.len() as u16).to_le_bytes());

        let mut offset = header_len;
        for (name, data) in &streams {
            root.extend((offset as u32).to_le_bytes());
            root.extend((data.len() as u32).to_le_bytes());
            root.extend(*name);
            offset += data.len();
        }
        assert_eq!(root.len(), header_len);
        for (_, data) in streams {
            root.extend(data);
        }
        root
    }

    /// CLI header, method bodies and metadata root, in that order.
    pub fn text_section(&self) -> Vec<u8> {
        let metadata_offset = (COR20_SIZE as usize + self.code.len()).next_multiple_of(4);
        let root = self.metadata_root();

        let mut section = vec![0u8; metadata_offset];
        put_u32(&mut section, 0, COR20_SIZE);
        put_u16(&mut section, 4, 2);
        put_u16(&mut section, 6, 5);
        put_u32(&mut section, 8, TEXT_RVA + metadata_offset as u32);
        put_u32(&mut section, 12, root.len() as u32);
        put_u32(&mut section, 16, 1); // IL only
        let code_start = COR20_SIZE as usize;
        section[code_start..code_start + self.code.len()].copy_from_slice(&self.code);
        section.extend(root);
        section
    }
}

fn padded(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.resize(bytes.len().next_multiple_of(4), 0);
    bytes
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// A PE32 file with one `.text` section holding `section`. With `cli_header`
/// the CLR data directory points at the start of the section.
pub fn pe_image(section: &[u8], cli_header: bool, library: bool) -> Vec<u8> {
    let raw_size = section.len().max(1).next_multiple_of(FILE_ALIGNMENT);
    let mut image = vec![0u8; FILE_ALIGNMENT + raw_size];

    put_u16(&mut image, 0, 0x5A4D); // MZ
    put_u32(&mut image, 0x3C, 0x80);
    image[0x80..0x84].copy_from_slice(b"PE\0\0");

    // COFF header
    put_u16(&mut image, 0x84, 0x14C);
    put_u16(&mut image, 0x86, 1);
    put_u16(&mut image, 0x94, 224);
    put_u16(&mut image, 0x96, if library { 0x2102 } else { 0x0102 });

    // Optional header
    let opt = 0x98;
    put_u16(&mut image, opt, 0x10B);
    put_u32(&mut image, opt + 28, 0x40_0000);
    put_u32(&mut image, opt + 32, SECTION_ALIGNMENT as u32);
    put_u32(&mut image, opt + 36, FILE_ALIGNMENT as u32);
    put_u16(&mut image, opt + 40, 4);
    put_u16(&mut image, opt + 48, 4);
    let size_of_image = TEXT_RVA as usize + section.len().next_multiple_of(SECTION_ALIGNMENT);
    put_u32(&mut image, opt + 56, size_of_image as u32);
    put_u32(&mut image, opt + 60, FILE_ALIGNMENT as u32);
    put_u16(&mut image, opt + 68, 3);
    put_u32(&mut image, opt + 92, 16);
    if cli_header {
        let clr = opt + 96 + 14 * 8;
        put_u32(&mut image, clr, TEXT_RVA);
        put_u32(&mut image, clr + 4, COR20_SIZE);
    }

    // Section table
    let header = opt + 224;
    image[header..header + 5].copy_from_slice(b".text");
    put_u32(&mut image, header + 8, section.len() as u32);
    put_u32(&mut image, header + 12, TEXT_RVA);
    put_u32(&mut image, header + 16, raw_size as u32);
    put_u32(&mut image, header + 20, FILE_ALIGNMENT as u32);
    put_u32(&mut image, header + 36, 0x6000_0020);

    image[FILE_ALIGNMENT..FILE_ALIGNMENT + section.len()].copy_from_slice(section);
    image
}

/// The "Shapes" assembly:
///
/// ```text
/// interface IShape<T>
/// abstract class Shape { abstract double Area(); }
/// class Circle : Shape, IShape<Circle> {
///     Point center;
///     double Radius { get; }
///     void Scale(double) { Area(); Console.WriteLine("..."); new Point(); }
///     class Builder {}
/// }
/// struct Point { Point() }
/// ```
pub fn shapes_assembly(library: bool) -> Vec<u8> {
    use Cell::{Long, Short};
    let mut md = MetadataBuilder::new();

    let row = md.string("Shapes.dll");
    md.row(MODULE, vec![Short(0), row, Short(0), Short(0), Short(0)]);

    // ResolutionScope 6: AssemblyRef 1
    for name in ["Object", "Console"] {
        let cells = vec![Short(6), md.string(name), md.string("System")];
        md.row(TYPE_REF, cells);
    }

    // TypeDefOrRef: 5 = TypeRef 1 (Object), 12 = TypeDef 3 (Shape)
    let types: [(u32, &str, &str, u16, u16, u16); 6] = [
        (0, "<Module>", "", 0, 1, 1),
        (0xA1, "IShape`1", "Shapes", 0, 1, 1),
        (0x81, "Shape", "Shapes", 5, 1, 1),
        (0x0010_0001, "Circle", "Shapes", 12, 1, 2),
        (0x0010_0109, "Point", "Shapes", 5, 2, 3),
        (0x0010_0002, "Builder", "", 5, 2, 4),
    ];
    for (flags, name, namespace, extends, fields, methods) in types {
        let cells = vec![
            Long(flags),
            md.string(name),
            md.string(namespace),
            Short(extends),
            Short(fields),
            Short(methods),
        ];
        md.row(TYPE_DEF, cells);
    }

    // center: class TypeDef 5
    let cells = vec![Short(1), md.string("center"), md.blob(&[0x06, 0x12, 0x14])];
    md.row(FIELD, cells);

    // ldarg.0; call Area; pop; ldstr; call WriteLine; newobj Point::.ctor; pop; ret
    let scale = md.method_body(&[
        0x02, 0x28, 0x01, 0x00, 0x00, 0x06, 0x26, 0x72, 0x01, 0x00, 0x00, 0x70, 0x28, 0x01, 0x00,
        0x00, 0x0A, 0x73, 0x03, 0x00, 0x00, 0x06, 0x26, 0x2A,
    ]);
    let methods: [(Cell, u16, &str, &[u8]); 3] = [
        (Long(0), 0x05C6, "Area", &[0x20, 0x00, 0x0D]),
        (scale, 0x0086, "Scale", &[0x20, 0x01, 0x01, 0x0D]),
        (Long(0), 0x1886, ".ctor", &[0x20, 0x00, 0x01]),
    ];
    for (rva, flags, name, signature) in methods {
        let cells = vec![
            rva,
            Short(0),
            Short(flags),
            md.string(name),
            md.blob(signature),
            Short(1),
        ];
        md.row(METHOD_DEF, cells);
    }

    // Circle implements TypeSpec 1
    md.row(INTERFACE_IMPL, vec![Short(4), Short(6)]);
    // MemberRefParent 17: TypeRef 2 (Console)
    let cells = vec![
        Short(17),
        md.string("WriteLine"),
        md.blob(&[0x00, 0x01, 0x01, 0x0E]),
    ];
    md.row(MEMBER_REF, cells);
    md.row(PROPERTY_MAP, vec![Short(4), Short(1)]);
    let cells = vec![Short(0), md.string("Radius"), md.blob(&[0x28, 0x00, 0x0D])];
    md.row(PROPERTY, cells);
    // IShape`1<Circle>
    let cells = vec![md.blob(&[0x15, 0x12, 0x08, 0x01, 0x12, 0x10])];
    md.row(TYPE_SPEC, cells);

    let cells = vec![
        Long(0x8004),
        Short(1),
        Short(0),
        Short(0),
        Short(0),
        Long(0),
        Short(0),
        md.string("Shapes"),
        Short(0),
    ];
    md.row(ASSEMBLY, cells);
    let cells = vec![
        Short(8),
        Short(0),
        Short(0),
        Short(0),
        Long(0),
        Short(0),
        md.string("System.Runtime"),
        Short(0),
        Short(0),
    ];
    md.row(ASSEMBLY_REF, cells);
    md.row(NESTED_CLASS, vec![Short(6), Short(4)]);
    // TypeOrMethodDef 4: TypeDef 2
    let cells = vec![Short(0), Short(0), Short(4), md.string("T")];
    md.row(GENERIC_PARAM, cells);

    pe_image(&md.text_section(), true, library)
}

pub fn write_bytes(dir: &Path, file: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(file);
    fs::write(&path, bytes).unwrap();
    path
}
