//! Synthetic PE images for tests
//!
//! Lays everything out in a single `.rdata` section at RVA 0x1000 (file
//! offset 0x400). Extra named sections are added with no raw data so the
//! section probes have something to find.

const SECTION_RVA: u32 = 0x1000;
const RAW_OFFSET: usize = 0x400;
const FILE_ALIGNMENT: usize = 0x200;

#[derive(Debug, Default)]
pub(crate) struct PeBuilder {
    pe32: bool,
    sections: Vec<String>,
    imports: Vec<String>,
    exports: Vec<(String, Vec<u8>)>,
    version_strings: Vec<(String, String)>,
    with_version: bool,
}

impl PeBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Emit a 32-bit (PE32) optional header instead of PE32+
    pub(crate) fn pe32(mut self) -> Self {
        self.pe32 = true;
        self
    }

    pub(crate) fn section(mut self, name: &str) -> Self {
        self.sections.push(name.to_string());
        self
    }

    pub(crate) fn import(mut self, library: &str) -> Self {
        self.imports.push(library.to_string());
        self
    }

    pub(crate) fn export(mut self, name: &str, data: &[u8]) -> Self {
        self.exports.push((name.to_string(), data.to_vec()));
        self
    }

    /// Add a StringFileInfo entry (enables the version resource)
    pub(crate) fn version_string(mut self, key: &str, value: &str) -> Self {
        self.with_version = true;
        self.version_strings.push((key.to_string(), value.to_string()));
        self
    }

    pub(crate) fn product_version(self, version: &str) -> Self {
        self.version_string("ProductVersion", version)
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut content: Vec<u8> = Vec::new();
        let mut directories = [(0u32, 0u32); 16];

        if !self.exports.is_empty() {
            let data_rvas: Vec<u32> = self
                .exports
                .iter()
                .map(|(_, data)| place(&mut content, data))
                .collect();
            let name_rvas: Vec<u32> = self
                .exports
                .iter()
                .map(|(name, _)| place(&mut content, &cstr(name)))
                .collect();
            let module_name = place(&mut content, &cstr("module.dll"));

            let functions = place(&mut content, &u32s(&data_rvas));
            let names = place(&mut content, &u32s(&name_rvas));
            let ordinals: Vec<u8> = (0..self.exports.len() as u16)
                .flat_map(u16::to_le_bytes)
                .collect();
            let ordinals = place(&mut content, &ordinals);

            let count = self.exports.len() as u32;
            let mut directory = vec![0u8; 12];
            directory.extend(u32s(&[module_name, 1, count, count, functions, names, ordinals]));
            let directory_rva = place(&mut content, &directory);
            directories[0] = (directory_rva, directory.len() as u32);
        }

        if !self.imports.is_empty() {
            let thunks = place(&mut content, &[0u8; 16]);
            let name_rvas: Vec<u32> = self
                .imports
                .iter()
                .map(|name| place(&mut content, &cstr(name)))
                .collect();

            let mut table = Vec::new();
            for name_rva in name_rvas {
                table.extend(u32s(&[thunks, 0, 0, name_rva, thunks]));
            }
            table.extend([0u8; 20]);
            let table_rva = place(&mut content, &table);
            directories[1] = (table_rva, table.len() as u32);
        }

        if self.with_version {
            pad4(&mut content);
            let rsrc_rva = SECTION_RVA + content.len() as u32;
            let blob = self.version_blob();

            let mut rsrc = Vec::new();
            // root: RT_VERSION -> type directory
            rsrc.extend(resource_directory(16, 0x8000_0000 | 24));
            // type: id 1 -> language directory
            rsrc.extend(resource_directory(1, 0x8000_0000 | 48));
            // language: en-US -> data entry
            rsrc.extend(resource_directory(0x409, 72));
            rsrc.extend(u32s(&[rsrc_rva + 88, blob.len() as u32, 0, 0]));
            rsrc.extend(&blob);

            content.extend(&rsrc);
            directories[2] = (rsrc_rva, rsrc.len() as u32);
        }

        if content.is_empty() {
            content.push(0);
        }

        self.assemble(&content, &directories)
    }

    fn assemble(&self, content: &[u8], directories: &[(u32, u32); 16]) -> Vec<u8> {
        let raw_size = align(content.len(), FILE_ALIGNMENT);
        let mut image = vec![0u8; RAW_OFFSET + raw_size];

        image[0] = b'M';
        image[1] = b'Z';
        write_u32(&mut image, 0x3C, 0x80);
        image[0x80..0x84].copy_from_slice(b"PE\x00\x00");

        let coff = 0x84;
        let (machine, magic, optional_size, count_offset, directory_offset) = if self.pe32 {
            (0x14Cu16, 0x10Bu16, 224u16, 92usize, 96usize)
        } else {
            (0x8664u16, 0x20Bu16, 240u16, 108usize, 112usize)
        };
        let section_count = 1 + self.sections.len();
        write_u16(&mut image, coff, machine);
        write_u16(&mut image, coff + 2, section_count as u16);
        write_u16(&mut image, coff + 16, optional_size);
        write_u16(&mut image, coff + 18, 0x22);

        let optional = coff + 20;
        write_u16(&mut image, optional, magic);
        write_u32(&mut image, optional + count_offset, 16);
        for (i, (rva, size)) in directories.iter().enumerate() {
            write_u32(&mut image, optional + directory_offset + i * 8, *rva);
            write_u32(&mut image, optional + directory_offset + i * 8 + 4, *size);
        }

        let table = optional + optional_size as usize;
        write_section(&mut image, table, ".rdata", content.len() as u32, SECTION_RVA, raw_size as u32, RAW_OFFSET as u32);

        let mut next_rva = SECTION_RVA + align(content.len(), 0x1000) as u32;
        for (i, name) in self.sections.iter().enumerate() {
            write_section(&mut image, table + (i + 1) * 40, name, 0x1000, next_rva, 0, 0);
            next_rva += 0x1000;
        }

        image[RAW_OFFSET..RAW_OFFSET + content.len()].copy_from_slice(content);
        image
    }

    fn version_blob(&self) -> Vec<u8> {
        let strings: Vec<Vec<u8>> = self
            .version_strings
            .iter()
            .map(|(key, value)| {
                let mut text = utf16(value);
                text.extend([0, 0]);
                version_block(key, &text, value.encode_utf16().count() as u16 + 1, 1, &[])
            })
            .collect();
        let table = version_block("040904b0", &[], 0, 1, &strings);
        let string_info = version_block("StringFileInfo", &[], 0, 1, &[table]);
        let translation = version_block("Translation", &[0x09, 0x04, 0xB0, 0x04], 4, 0, &[]);
        let var_info = version_block("VarFileInfo", &[], 0, 1, &[translation]);

        let (ms, ls) = self
            .version_strings
            .iter()
            .find(|(key, _)| key == "ProductVersion")
            .map(|(_, value)| packed_fixed_version(value))
            .unwrap_or((0, 0));
        let fixed = u32s(&[0xFEEF_04BD, 0x0001_0000, ms, ls, ms, ls, 0x3F, 0, 0x4, 0x1, 0, 0, 0]);

        version_block("VS_VERSION_INFO", &fixed, fixed.len() as u16, 0, &[string_info, var_info])
    }
}

fn packed_fixed_version(value: &str) -> (u32, u32) {
    let parts: Vec<u32> = value
        .split('.')
        .map(|p| p.trim().parse::<u32>().unwrap_or(0) & 0xFFFF)
        .collect();
    let part = |i: usize| parts.get(i).copied().unwrap_or(0);
    ((part(0) << 16) | part(1), (part(2) << 16) | part(3))
}

fn version_block(key: &str, value: &[u8], value_length: u16, value_type: u16, children: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; 6];
    out[2..4].copy_from_slice(&value_length.to_le_bytes());
    out[4..6].copy_from_slice(&value_type.to_le_bytes());
    out.extend(utf16(key));
    out.extend([0, 0]);
    pad4(&mut out);
    out.extend(value);
    for child in children {
        pad4(&mut out);
        out.extend(child);
    }
    let length = out.len() as u16;
    out[0..2].copy_from_slice(&length.to_le_bytes());
    out
}

fn resource_directory(id: u32, target: u32) -> Vec<u8> {
    let mut out = vec![0u8; 16];
    out[14..16].copy_from_slice(&1u16.to_le_bytes());
    out.extend(u32s(&[id, target]));
    out
}

fn write_section(image: &mut [u8], at: usize, name: &str, virtual_size: u32, rva: u32, raw_size: u32, raw_ptr: u32) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(8);
    image[at..at + len].copy_from_slice(&bytes[..len]);
    write_u32(image, at + 8, virtual_size);
    write_u32(image, at + 12, rva);
    write_u32(image, at + 16, raw_size);
    write_u32(image, at + 20, raw_ptr);
}

/// Append `bytes` 4-byte aligned and return their RVA
fn place(content: &mut Vec<u8>, bytes: &[u8]) -> u32 {
    pad4(content);
    let rva = SECTION_RVA + content.len() as u32;
    content.extend_from_slice(bytes);
    rva
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn align(value: usize, to: usize) -> usize {
    value.div_ceil(to) * to
}

fn cstr(text: &str) -> Vec<u8> {
    let mut out = text.as_bytes().to_vec();
    out.push(0);
    out
}

fn utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn write_u16(image: &mut [u8], at: usize, value: u16) {
    image[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(image: &mut [u8], at: usize, value: u32) {
    image[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
