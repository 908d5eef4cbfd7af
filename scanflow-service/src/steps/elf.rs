// ELF Inspection
// ELF header recognition for codebase files

use crate::error::StepError;
use crate::execution::context::StepContext;
use crate::models::status;
use crate::store::ResourceFilter;

use serde::Serialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElfClass {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElfType {
    Relocatable,
    Executable,
    SharedObject,
    Core,
    Other(u16),
}

/// The identifying part of an ELF header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElfHeader {
    pub class: ElfClass,
    pub endianness: Endianness,
    pub elf_type: ElfType,
    pub machine: u16,
}

impl ElfHeader {
    /// Parse the first bytes of a file; `None` when it is not ELF
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN || bytes[..4] != ELF_MAGIC {
            return None;
        }
        let class = match bytes[4] {
            1 => ElfClass::Elf32,
            2 => ElfClass::Elf64,
            _ => return None,
        };
        let endianness = match bytes[5] {
            1 => Endianness::Little,
            2 => Endianness::Big,
            _ => return None,
        };
        let half = |offset: usize| {
            let pair = [bytes[offset], bytes[offset + 1]];
            match endianness {
                Endianness::Little => u16::from_le_bytes(pair),
                Endianness::Big => u16::from_be_bytes(pair),
            }
        };
        let elf_type = match half(16) {
            1 => ElfType::Relocatable,
            2 => ElfType::Executable,
            3 => ElfType::SharedObject,
            4 => ElfType::Core,
            other => ElfType::Other(other),
        };

        Some(Self {
            class,
            endianness,
            elf_type,
            machine: half(18),
        })
    }

    pub fn machine_name(&self) -> &'static str {
        match self.machine {
            0x03 => "Intel 80386",
            0x08 => "MIPS",
            0x14 => "PowerPC",
            0x15 => "PowerPC64",
            0x28 => "ARM",
            0x3e => "x86-64",
            0xb7 => "ARM aarch64",
            0xf3 => "RISC-V",
            _ => "unknown machine",
        }
    }

    /// `file`-style description, e.g. "ELF 64-bit LSB shared object, x86-64"
    pub fn description(&self) -> String {
        let bits = match self.class {
            ElfClass::Elf32 => "32-bit",
            ElfClass::Elf64 => "64-bit",
        };
        let order = match self.endianness {
            Endianness::Little => "LSB",
            Endianness::Big => "MSB",
        };
        let kind = match self.elf_type {
            ElfType::Relocatable => "relocatable",
            ElfType::Executable => "executable",
            ElfType::SharedObject => "shared object",
            ElfType::Core => "core file",
            ElfType::Other(_) => "unknown type",
        };
        format!("ELF {} {} {}, {}", bits, order, kind, self.machine_name())
    }
}

pub fn read_elf_header(path: &Path) -> io::Result<Option<ElfHeader>> {
    let mut buffer = [0u8; HEADER_LEN];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(ElfHeader::parse(&buffer[..filled]))
}

/// Tag ELF files with their header details
pub fn find_elf_binaries(ctx: &StepContext) -> Result<(), StepError> {
    let scope = ctx.scope();
    let codebase = ctx.project().codebase_path();
    let mut found = 0;

    for resource in scope.query_resources(ResourceFilter::files().without_status()).iter() {
        let location = codebase.join(&resource.path);
        let Some(header) = ctx.save_errors(read_elf_header(&location), Some(&resource.path)).flatten() else {
            continue;
        };
        let details = serde_json::to_value(header)?;
        scope.modify_resource(&resource.path, |r| {
            r.file_type = Some(header.description());
            r.extra_data.insert("elf".to_string(), details);
            r.status = Some(status::ELF_BINARY.to_string());
        })?;
        found += 1;
    }

    ctx.log(format!("{} ELF binaries found", found));
    Ok(())
}
