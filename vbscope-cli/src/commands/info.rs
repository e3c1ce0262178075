use std::path::Path;

use serde::Serialize;
use vbscope::metadata::packer::detect_packer;

use crate::app::GlobalOptions;
use crate::output::{print_output, rule, Align, TabWriter};

#[derive(Serialize)]
struct InfoReport {
    path: String,
    image_base: u32,
    entry_point: u32,
    is_dll: bool,
    sections: Vec<SectionReport>,
    imports: Vec<String>,
    vb: VbReport,
    packer: Option<String>,
}

#[derive(Serialize)]
struct SectionReport {
    name: String,
    virtual_address: u32,
    virtual_size: u32,
    raw_offset: u32,
    raw_size: u32,
}

#[derive(Serialize)]
struct VbReport {
    header_rva: u32,
    runtime_build: u16,
    project_name: Option<String>,
    sub_main: Option<u32>,
    thread_flags: String,
    form_count: u16,
    code_kind: String,
    objects: Vec<ObjectReport>,
}

#[derive(Serialize)]
struct ObjectReport {
    name: String,
    kind: String,
    method_names: Vec<String>,
    control_count: Option<u32>,
    event_count: Option<u16>,
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let image = super::load_image(path)?;
    let file = image.file();
    let header = image.header();

    let report = InfoReport {
        path: path.display().to_string(),
        image_base: file.image_base(),
        entry_point: file.entry_point(),
        is_dll: file.is_dll(),
        sections: file
            .sections()
            .iter()
            .map(|s| SectionReport {
                name: s.name.clone(),
                virtual_address: s.virtual_address,
                virtual_size: s.virtual_size,
                raw_offset: s.raw_offset,
                raw_size: s.raw_size,
            })
            .collect(),
        imports: file
            .imported_dlls()
            .into_iter()
            .map(str::to_string)
            .collect(),
        vb: VbReport {
            header_rva: image.header_rva(),
            runtime_build: header.runtime_build,
            project_name: image.project_name(),
            sub_main: header.has_sub_main().then_some(header.lp_sub_main),
            thread_flags: format!("{:?}", header.thread_flags()),
            form_count: header.form_count,
            code_kind: if image.is_pcode() { "P-Code" } else { "Native" }.to_string(),
            objects: image
                .objects()
                .iter()
                .map(|o| ObjectReport {
                    name: o.name.clone(),
                    kind: o.kind_name().to_string(),
                    method_names: o.method_names.clone(),
                    control_count: o.optional_info.as_ref().map(|i| i.control_count),
                    event_count: o.optional_info.as_ref().map(|i| i.event_count),
                })
                .collect(),
        },
        packer: detect_packer(file).map(|d| format!("{} ({})", d.packer.name(), d.method)),
    };

    print_output(&report, opts, display)
}

fn display(report: &InfoReport) {
    rule("PE");
    println!("File          {}", report.path);
    println!("Image base    0x{:08X}", report.image_base);
    println!("Entry point   0x{:08X}", report.entry_point);
    println!("Type          {}", if report.is_dll { "DLL/OCX" } else { "EXE" });

    let mut sections = TabWriter::new(vec![
        ("Section", Align::Left),
        ("VA", Align::Right),
        ("VSize", Align::Right),
        ("Raw", Align::Right),
        ("RawSize", Align::Right),
    ]);
    for section in &report.sections {
        sections.row(vec![
            section.name.clone(),
            format!("0x{:08X}", section.virtual_address),
            format!("0x{:X}", section.virtual_size),
            format!("0x{:X}", section.raw_offset),
            format!("0x{:X}", section.raw_size),
        ]);
    }
    sections.print();

    if !report.imports.is_empty() {
        rule("Imports");
        for dll in &report.imports {
            println!("{dll}");
        }
    }

    rule("VB5/6");
    println!("VB5! header   rva 0x{:08X}", report.vb.header_rva);
    println!("Runtime build {}", report.vb.runtime_build);
    if let Some(name) = &report.vb.project_name {
        println!("Project       {name}");
    }
    match report.vb.sub_main {
        Some(va) => println!("Startup       Sub Main at 0x{va:08X}"),
        None => println!("Startup       form load"),
    }
    println!("Thread flags  {}", report.vb.thread_flags);
    println!("Forms         {}", report.vb.form_count);
    println!("Code kind     {}", report.vb.code_kind);

    rule("Objects");
    let mut objects = TabWriter::new(vec![
        ("Object", Align::Left),
        ("Kind", Align::Left),
        ("Methods", Align::Right),
        ("Controls", Align::Right),
        ("Events", Align::Right),
    ]);
    for object in &report.vb.objects {
        objects.row(vec![
            object.name.clone(),
            object.kind.clone(),
            object.method_names.len().to_string(),
            object
                .control_count
                .map_or_else(|| "-".to_string(), |c| c.to_string()),
            object
                .event_count
                .map_or_else(|| "-".to_string(), |c| c.to_string()),
        ]);
    }
    objects.print();

    for object in &report.vb.objects {
        if object.method_names.is_empty() {
            continue;
        }
        println!("\n{} methods:", object.name);
        for name in &object.method_names {
            println!("  {name}");
        }
    }

    if let Some(packer) = &report.packer {
        rule("Packer");
        println!("{packer}");
    }
}
