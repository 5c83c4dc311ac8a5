use std::io::Write;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // For each .rdesc file in our tests/data directory, create one test function
    // that reconstructs that report descriptor through an emulated device
    let datadir: PathBuf = [concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data")].iter().collect();
    let out_dir = std::env::var_os("OUT_DIR").unwrap();
    let dest_path = PathBuf::from(&out_dir).join("test-report-descriptors.rs");
    let mut file = std::fs::File::create(dest_path)?;

    println!("cargo:rerun-if-changed=tests/data");

    // The data files are not part of the published crate
    let Ok(entries) = std::fs::read_dir(&datadir) else {
        return Ok(());
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "rdesc"))
        .collect();
    paths.sort();

    for path in paths {
        let filename = path.file_name().unwrap().to_str().unwrap().to_string();
        let funcname = filename.replace([':', '.', '-'], "_");
        writeln!(
            file,
            "
#[test]
#[allow(non_snake_case)]
fn roundtrip_{funcname}() {{
    let bytes = common::read_rdesc({path:?});
    common::assert_roundtrip(&bytes, \"{filename}\");
}}
"
        )?;
    }

    Ok(())
}
