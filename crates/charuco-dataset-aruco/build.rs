//! Generates `builtins.rs` from `data/*_CODES.json`.

use serde::Deserialize;
use std::error::Error;
use std::fmt::Write as _;
use std::path::Path;
use std::{env, fs};

#[derive(Deserialize)]
struct DictionaryFile {
    name: String,
    marker_size: usize,
    min_distance: u8,
    max_correction_bits: u8,
    codes: Vec<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR")?;
    let data_dir = Path::new(&manifest_dir).join("data");
    println!("cargo:rerun-if-changed={}", data_dir.display());

    let mut files: Vec<_> = fs::read_dir(&data_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("_CODES.json"))
        })
        .collect();
    files.sort();

    let mut out = String::new();
    let mut names = Vec::new();
    for path in &files {
        println!("cargo:rerun-if-changed={}", path.display());
        let dict: DictionaryFile = serde_json::from_str(&fs::read_to_string(path)?)?;
        if dict.marker_size * dict.marker_size > 64 {
            return Err(format!("{}: marker_size {} too large", dict.name, dict.marker_size).into());
        }

        writeln!(
            out,
            "pub const {name}_CODES: [u64; {len}] = {codes:?};",
            name = dict.name,
            len = dict.codes.len(),
            codes = dict.codes
        )?;
        writeln!(
            out,
            "pub const {name}: Dictionary = Dictionary {{ name: \"{name}\", marker_size: {size}, \
             max_correction_bits: {corr}, min_distance: {dist}, codes: &{name}_CODES }};",
            name = dict.name,
            size = dict.marker_size,
            corr = dict.max_correction_bits,
            dist = dict.min_distance
        )?;
        names.push(dict.name);
    }

    writeln!(out, "/// Every embedded dictionary, sorted by name.")?;
    writeln!(out, "pub const ALL: &[Dictionary] = &[{}];", names.join(", "))?;

    let out_path = Path::new(&env::var("OUT_DIR")?).join("builtins.rs");
    fs::write(out_path, out)?;
    Ok(())
}
