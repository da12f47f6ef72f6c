use hsaco::amdgpu::{
    HsaSegment, ELFOSABI_AMDGPU_HSA, EM_AMDGPU, R_AMDGPU_32_LOW, R_AMDGPU_64, SHF_AMDGPU_HSA_AGENT,
    SHF_AMDGPU_HSA_GLOBAL, STT_AMDGPU_HSA_KERNEL,
};
use hsaco::code::{
    Allocation, CodeAttribute, HsailNote, InfoValue, IsaNote, Linkage, ProducerNote, SegmentClass, SymbolAttribute,
    SymbolKind, VariableParams,
};
use hsaco::image::{Class, Image, ImageHeader, SectionParams, Symbol};
use hsaco::{CodeObject, Error, KernelCode, KernelInfo, QueryError, State};
use object::elf;

fn descriptor() -> KernelCode {
    KernelCode {
        kernarg_segment_byte_size: 64,
        kernarg_segment_alignment: 4,
        workgroup_group_segment_byte_size: 256,
        ..Default::default()
    }
}

/// Builds a code object with every note, two kernels, three variables and
/// one relocated table.
fn build(class: Class) -> CodeObject<'static, 'static> {
    let mut code = CodeObject::build(class, true).unwrap();
    code.add_note_version(1, 0).unwrap();
    code.add_note_hsail(&HsailNote {
        major: 1,
        minor: 0,
        profile: 1,
        machine_model: 1,
        default_float_round: 2,
    })
    .unwrap();
    code.add_note_isa(&IsaNote {
        vendor: "AMD".into(),
        architecture: "AMDGPU".into(),
        major: 8,
        minor: 0,
        stepping: 3,
    })
    .unwrap();
    code.add_note_producer(&ProducerNote {
        major: 2,
        minor: 1,
        name: "finalizer".into(),
    })
    .unwrap();
    code.add_note_producer_options("-O2").unwrap();

    code.add_kernel("foo", &descriptor(), &[0x00, 0x00, 0x81, 0xbf]).unwrap();
    let bar = KernelCode {
        kernel_code_properties: hsaco::kernel_code::KERNEL_CODE_PROPERTY_IS_DYNAMIC_CALLSTACK,
        workitem_private_segment_byte_size: 48,
        ..descriptor()
    };
    code.add_kernel("mod::bar", &bar, &[0x00, 0x00, 0x81, 0xbf]).unwrap();

    let gvar = code
        .add_variable(
            "gvar",
            VariableParams {
                allocation: Allocation::Program,
                segment: SegmentClass::Global,
                size: 8,
                align: 8,
                init: Some(vec![1, 2, 3]),
                ..Default::default()
            },
        )
        .unwrap();
    code.add_variable(
        "mod::lut",
        VariableParams {
            allocation: Allocation::Agent,
            segment: SegmentClass::Readonly,
            size: 4,
            align: 4,
            init: Some(vec![9, 9, 9, 9]),
            ..Default::default()
        },
    )
    .unwrap();
    code.add_variable(
        "ext",
        VariableParams {
            size: 32,
            align: 16,
            definition: false,
            ..Default::default()
        },
    )
    .unwrap();
    code.add_variable(
        "table",
        VariableParams {
            size: 16,
            align: 8,
            ..Default::default()
        },
    )
    .unwrap();
    let table = code.hsa_section(HsaSegment::GlobalAgent).unwrap();
    code.add_relocation(table, R_AMDGPU_64, gvar, 0, 8).unwrap();
    code.add_relocation(table, R_AMDGPU_32_LOW, gvar, 8, 0).unwrap();
    code.finalize().unwrap();
    code
}

fn amd_header(class: Class) -> ImageHeader {
    ImageHeader {
        class,
        e_type: elf::ET_EXEC,
        machine: EM_AMDGPU,
        os_abi: ELFOSABI_AMDGPU_HSA,
        abi_version: 1,
        flags: 0,
        entry: 0,
    }
}

/// A bare image with one accelerator data section and a single object
/// symbol of the given name, binding and type.
fn image_with_symbol(name: &str, binding: u8, kind: u8) -> Vec<u8> {
    let mut image = Image::new(amd_header(Class::Elf64));
    let strtab = image.add_string_table(".strtab").unwrap();
    image.add_symbol_table(".symtab", strtab).unwrap();
    let data = image
        .add_section(SectionParams {
            name: ".hsadata_global_agent".into(),
            sh_type: elf::SHT_PROGBITS,
            flags: u64::from(elf::SHF_ALLOC | elf::SHF_WRITE) | SHF_AMDGPU_HSA_GLOBAL | SHF_AMDGPU_HSA_AGENT,
            align: 8,
            ..Default::default()
        })
        .unwrap();
    image.section_mut(data).unwrap().add_zeroes(8, 8).unwrap();
    image.add_symbol(name, Symbol::new(0, 0, 8, kind, binding, data.0 as u16)).unwrap();
    image.finalize().unwrap().to_vec()
}

#[test]
fn finalize_then_load_round_trips() {
    for class in [Class::Elf32, Class::Elf64] {
        let built = build(class);
        assert_eq!(built.state(), State::Queryable);
        let loaded = CodeObject::load(built.raw_bytes()).unwrap();

        assert_eq!(loaded.image().class(), class);
        assert_eq!(loaded.image().segments(), built.image().segments());
        assert_eq!(loaded.image().sections().len(), built.image().sections().len());
        for (a, b) in built.image().sections().iter().zip(loaded.image().sections()) {
            assert_eq!(a.name(), b.name());
            assert_eq!(a.data(), b.data());
            assert_eq!(a.address(), b.address());
        }
        assert_eq!(loaded.symbols(), built.symbols());
        assert_eq!(loaded.data_segments(), built.data_segments());
        assert_eq!(loaded.data_sections(), built.data_sections());
        assert!(loaded.diagnostics().is_empty());
    }
}

#[test]
fn empty_section_keeps_its_segment_after_reload() {
    let mut code = CodeObject::build(Class::Elf64, false).unwrap();
    code.add_variable(
        "ext",
        VariableParams {
            allocation: Allocation::Program,
            size: 32,
            definition: false,
            ..Default::default()
        },
    )
    .unwrap();
    code.add_variable(
        "tbl",
        VariableParams {
            size: 16,
            align: 8,
            ..Default::default()
        },
    )
    .unwrap();
    code.finalize().unwrap();
    let loaded = CodeObject::load(code.raw_bytes()).unwrap();

    for name in ["ext", "tbl"] {
        let built = code.symbol("", name).unwrap();
        let reloaded = loaded.symbol("", name).unwrap();
        assert_eq!(loaded.symbol_segment(reloaded), code.symbol_segment(built), "{name}");
    }
    assert_eq!(
        loaded.symbol_segment(loaded.symbol("", "ext").unwrap()),
        Some(HsaSegment::GlobalProgram)
    );
    for (a, b) in code.image().sections().iter().zip(loaded.image().sections()) {
        assert_eq!(a.segment(), b.segment(), "{}", a.name());
    }
}

#[test]
fn linkage_follows_qualification() {
    let code = build(Class::Elf64);

    let foo = code.symbol("", "foo").unwrap();
    assert_eq!(foo.linkage(), Linkage::Program);
    assert_eq!(foo.module_name(), "");
    assert_eq!(code.symbol_info(foo, SymbolAttribute::ModuleNameLength), Ok(InfoValue::U32(0)));

    let bar = code.symbol("mod", "bar").unwrap();
    assert_eq!(bar.linkage(), Linkage::Module);
    assert_eq!(bar.name(), "bar");
    assert_eq!(bar.module_name(), "mod");
    assert_eq!(code.symbol_by_qualified_name("mod::bar").unwrap(), bar);

    let mut out = [0u8; 8];
    assert_eq!(code.symbol_info_raw(bar, 1, &mut out), Ok(4));
    assert_eq!(&out[..4], &3u32.to_le_bytes());
    assert_eq!(code.symbol_info_raw(bar, 2, &mut out), Ok(3));
    assert_eq!(&out[..3], b"bar");
    assert_eq!(code.symbol_info_raw(bar, 4, &mut out), Ok(3));
    assert_eq!(&out[..3], b"mod");

    assert_eq!(code.symbol("", "bar").unwrap_err(), QueryError::InvalidSymbolName);
    assert_eq!(code.symbol("other", "bar").unwrap_err(), QueryError::InvalidSymbolName);
}

#[test]
fn kernel_descriptor_is_decoded() {
    let code = build(Class::Elf64);
    let foo = code.symbol("", "foo").unwrap();
    assert_eq!(foo.kind(), SymbolKind::Kernel);
    assert_eq!(
        foo.kernel(),
        Some(&KernelInfo {
            kernarg_segment_size: 64,
            kernarg_segment_alignment: 16,
            group_segment_size: 256,
            private_segment_size: 0,
            is_dynamic_callstack: false,
        })
    );
    let bar = code.symbol("mod", "bar").unwrap();
    assert_eq!(code.symbol_info(bar, SymbolAttribute::KernelDynamicCallstack), Ok(InfoValue::Bool(true)));
    assert_eq!(code.symbol_info(bar, SymbolAttribute::KernelPrivateSegmentSize), Ok(InfoValue::U32(48)));

    let mut out = [0u8; 8];
    assert_eq!(code.symbol_info_raw(foo, 11, &mut out), Ok(8));
    assert_eq!(u64::from_le_bytes(out), 64);
    assert_eq!(code.symbol_info(foo, SymbolAttribute::VariableSize), Err(QueryError::InvalidArgument));
    assert_eq!(code.symbol_segment(foo), Some(HsaSegment::CodeAgent));
}

#[test]
fn variables_take_attributes_from_their_section() {
    let code = build(Class::Elf64);

    let gvar = code.symbol("", "gvar").unwrap();
    let info = gvar.variable().unwrap();
    assert_eq!(info.allocation, Allocation::Program);
    assert_eq!(info.segment, SegmentClass::Global);
    assert!(!info.is_const);
    assert_eq!(info.size, 8);
    assert!(gvar.is_definition());

    let lut = code.symbol("mod", "lut").unwrap();
    assert_eq!(code.symbol_info(lut, SymbolAttribute::VariableIsConst), Ok(InfoValue::Bool(true)));
    assert_eq!(code.symbol_info(lut, SymbolAttribute::VariableSegment), Ok(InfoValue::U32(1)));
    assert_eq!(code.symbol_segment(lut), Some(HsaSegment::ReadonlyAgent));

    let ext = code.symbol("", "ext").unwrap();
    assert!(!ext.is_definition());
    assert_eq!(code.symbol_info(ext, SymbolAttribute::VariableAlignment), Ok(InfoValue::U32(16)));
    assert_eq!(code.symbol_info(ext, SymbolAttribute::KernelGroupSegmentSize), Err(QueryError::InvalidArgument));

    let mut out = [0u8; 1];
    assert_eq!(code.symbol_info_raw(ext, 17, &mut out), Ok(1));
    assert_eq!(out[0], 0);
    assert_eq!(code.symbol_info_raw(ext, 99, &mut out), Err(QueryError::InvalidArgument));
}

#[test]
fn segments_and_sections_are_partitioned() {
    let code = build(Class::Elf64);
    let image = code.image();

    let kinds: Vec<_> = code
        .data_segments()
        .iter()
        .map(|&i| HsaSegment::from_p_type(image.segments()[i].kind()).unwrap())
        .collect();
    assert_eq!(
        kinds,
        [
            HsaSegment::CodeAgent,
            HsaSegment::GlobalProgram,
            HsaSegment::ReadonlyAgent,
            HsaSegment::GlobalAgent
        ]
    );

    let names: Vec<_> = code
        .data_sections()
        .iter()
        .map(|&i| image.section(i).unwrap().name())
        .collect();
    assert_eq!(
        names,
        [
            ".hsatext",
            ".hsadata_global_program",
            ".hsadata_readonly_agent",
            ".hsadata_global_agent"
        ]
    );

    assert_eq!(code.relocation_sections().len(), 1);
    let rela = image.section(code.relocation_sections()[0]).unwrap();
    assert_eq!(rela.name(), ".rela.hsadata_global_agent");
}

#[test]
fn notes_are_reported() {
    let code = build(Class::Elf64);
    assert_eq!(code.note_isa().unwrap().unwrap().to_string(), "AMD:AMDGPU:8:0:3");
    assert_eq!(code.note_version().unwrap().unwrap().to_string(), "1.0");
    assert_eq!(code.note_producer().unwrap().unwrap().name, "finalizer");
    assert_eq!(code.note_producer_options().unwrap().as_deref(), Some("-O2"));

    assert_eq!(code.info(CodeAttribute::Isa), Ok(InfoValue::Fixed("AMD:AMDGPU:8:0:3".into())));
    assert_eq!(code.info(CodeAttribute::Profile), Ok(InfoValue::U32(1)));
    assert_eq!(code.info(CodeAttribute::DefaultFloatRoundingMode), Ok(InfoValue::U32(2)));
    assert_eq!(code.info(CodeAttribute::Type), Ok(InfoValue::U32(0)));

    let mut out = [0xffu8; 64];
    assert_eq!(code.info_raw(0, &mut out), Ok(64));
    assert_eq!(&out[..4], b"1.0\0");
    assert_eq!(code.info_raw(6, &mut out), Err(QueryError::InvalidArgument));
    assert_eq!(code.info_raw(2, &mut out[..10]), Err(QueryError::InvalidArgument));
}

#[test]
fn missing_notes_are_absent() {
    let mut code = CodeObject::build(Class::Elf64, false).unwrap();
    assert_eq!(code.note_isa().unwrap(), None);
    assert_eq!(code.info(CodeAttribute::Version), Err(QueryError::InvalidCodeObject));
    code.finalize().unwrap();
    assert_eq!(code.note_version().unwrap(), None);
    assert_eq!(code.info(CodeAttribute::Isa), Err(QueryError::InvalidCodeObject));
    assert_eq!(code.info(CodeAttribute::MachineModel), Err(QueryError::InvalidCodeObject));
    assert_eq!(code.check_isa(&|_: &str| true), Err(QueryError::InvalidCodeObject));
    assert!(code.symbols().is_empty());
}

#[test]
fn isa_lookup() {
    let code = build(Class::Elf64);
    assert_eq!(code.check_isa(&|isa: &str| isa.starts_with("AMD:")).as_deref(), Ok("AMD:AMDGPU:8:0:3"));
    assert_eq!(code.check_isa(&|_: &str| false), Err(QueryError::InvalidCodeObject));
}

#[test]
fn iteration_stops_at_first_error() {
    let code = build(Class::Elf64);
    let mut seen = Vec::new();
    code.iterate_symbols(|_, s| {
        seen.push(s.qualified_name().to_string());
        Ok(())
    })
    .unwrap();
    // module-linkage symbols are local and come first
    assert_eq!(seen, ["mod::bar", "mod::lut", "foo", "gvar", "ext", "table"]);

    let mut visits = 0;
    let result = code.iterate_symbols(|_, _| {
        visits += 1;
        if visits == 2 {
            Err(QueryError::Error)
        } else {
            Ok(())
        }
    });
    assert_eq!(result, Err(QueryError::Error));
    assert_eq!(visits, 2);
}

#[test]
fn relocations_patch_section_copies() {
    let code = build(Class::Elf64);
    let (table, section) = code.image().section_by_name(".hsadata_global_agent").unwrap();
    let mut data = section.data().to_vec();
    let applied = code
        .apply_relocations(table, &mut data, |_, name| (name == "gvar").then_some(0x1000))
        .unwrap();
    assert_eq!(applied, 2);
    assert_eq!(u64::from_le_bytes(data[..8].try_into().unwrap()), 0x1008);
    assert_eq!(u32::from_le_bytes(data[8..12].try_into().unwrap()), 0x1000);

    let err = code.apply_relocations(table, &mut data, |_, _| None).unwrap_err();
    assert!(matches!(err, Error::Relocation(_)));
}

#[test]
fn corrupted_magic_is_a_format_error() {
    let code = build(Class::Elf64);
    let mut bytes = code.raw_bytes().to_vec();
    bytes[0] = 0;
    assert!(matches!(CodeObject::load(&bytes), Err(Error::Format(_))));
    assert!(matches!(CodeObject::load(&bytes[..10]), Err(Error::Format(_))));
}

#[test]
fn foreign_machine_is_rejected() {
    let mut header = amd_header(Class::Elf64);
    header.machine = elf::EM_X86_64;
    let mut image = Image::new(header);
    image.finalize().unwrap();
    let err = CodeObject::new(image).unwrap_err();
    assert!(err.to_string().contains("not AMDGPU"), "{err}");
}

#[test]
fn binding_must_match_qualification() {
    let bytes = image_with_symbol("m::x", elf::STB_GLOBAL, elf::STT_OBJECT);
    assert!(matches!(CodeObject::load(&bytes), Err(Error::Format(_))));

    let bytes = image_with_symbol("x", elf::STB_LOCAL, elf::STT_OBJECT);
    assert!(matches!(CodeObject::load(&bytes), Err(Error::Format(_))));

    let bytes = image_with_symbol("m::x", elf::STB_LOCAL, elf::STT_OBJECT);
    let code = CodeObject::load(&bytes).unwrap();
    assert_eq!(code.symbol("m", "x").unwrap().linkage(), Linkage::Module);
}

#[test]
fn unknown_symbol_types_are_logged_and_skipped() {
    let bytes = image_with_symbol("odd", elf::STB_GLOBAL, 7);
    let code = CodeObject::load(&bytes).unwrap();
    assert!(code.symbols().is_empty());
    assert_eq!(code.diagnostics().len(), 1);
    assert!(code.diagnostics()[0].contains("unknown type 7"));
}

#[test]
fn kernel_outside_its_section_is_rejected() {
    // a kernel symbol needs 256 descriptor bytes; the section only has 8
    let bytes = image_with_symbol("k", elf::STB_GLOBAL, STT_AMDGPU_HSA_KERNEL);
    let err = CodeObject::load(&bytes).unwrap_err();
    assert!(err.to_string().contains("descriptor"), "{err}");
}

#[test]
fn finalized_object_rejects_builder_calls() {
    let mut code = build(Class::Elf64);
    assert!(matches!(code.add_note_version(2, 0), Err(Error::Finalized)));
    assert!(matches!(code.add_kernel("late", &descriptor(), &[]), Err(Error::Finalized)));
    assert!(matches!(code.finalize(), Err(Error::Finalized)));
}

#[test]
fn queries_need_a_queryable_object() {
    let mut code = CodeObject::build(Class::Elf64, false).unwrap();
    code.add_kernel("k", &descriptor(), &[]).unwrap();
    assert_eq!(code.state(), State::Building);
    assert_eq!(code.symbol("", "k").unwrap_err(), QueryError::InvalidCodeObject);
    assert_eq!(code.iterate_symbols(|_, _| Ok(())), Err(QueryError::InvalidCodeObject));
}

#[test]
fn dump_mentions_every_part() {
    let code = build(Class::Elf64);
    let text = code.to_string();
    for needle in [
        "xnack on",
        "ISA: AMD:AMDGPU:8:0:3",
        "Producer: finalizer 2.1",
        "code/agent",
        ".hsatext",
        "R_AMDGPU_64",
        "mod::bar (Kernel)",
        "kernarg segment alignment: 16",
        "00 00 81 bf",
    ] {
        assert!(text.contains(needle), "missing {needle:?} in\n{text}");
    }
}

#[test]
fn save_and_load_file() {
    let code = build(Class::Elf32);
    let path = std::env::temp_dir().join(format!("hsaco-test-{}.co", std::process::id()));
    code.image().save_file(&path).unwrap();
    let loaded = CodeObject::load_file(&path).unwrap();
    assert_eq!(loaded.raw_bytes(), code.raw_bytes());
    assert_eq!(loaded.symbols().len(), 6);
    std::fs::remove_file(&path).unwrap();
}
