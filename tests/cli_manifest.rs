use imgpress::cli::manifest_format_warning;
use std::path::Path;

#[test]
fn csv_manifests_need_no_warning() {
    assert_eq!(manifest_format_warning(Path::new("in/products.csv")), None);
    assert_eq!(manifest_format_warning(Path::new("in/PRODUCTS.CSV")), None);
}

#[test]
fn other_manifest_paths_are_flagged() {
    let msg = manifest_format_warning(Path::new("in/products.txt")).unwrap();
    assert!(msg.contains("not a .csv file"), "{msg}");
    assert!(msg.contains("products.txt"), "{msg}");

    let msg = manifest_format_warning(Path::new("in/products")).unwrap();
    assert!(msg.contains("no extension"), "{msg}");
}
