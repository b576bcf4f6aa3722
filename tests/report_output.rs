use imgpress::{
    config::Config,
    manifest::Manifest,
    report::{FailureReason, FailureStage, ItemOutcome, JobReport, write_annotated_manifest},
};

fn sample_report() -> JobReport {
    JobReport::finalize(
        "job".into(),
        "t0".into(),
        "t1".into(),
        false,
        vec![
            ItemOutcome::success(0, "https://a/1.jpg", "mem://k/0".into(), 1000, 400),
            ItemOutcome::failure(
                1,
                "nope",
                FailureStage::Parse,
                FailureReason::InvalidUrl,
                "relative URL without a base",
            ),
            ItemOutcome::success(2, "https://a/2.png", "mem://k/2".into(), 500, 250),
        ],
    )
}

#[test]
fn finalize_counts_and_sums() {
    let report = sample_report();
    assert_eq!(report.total_items, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.original_bytes, 1500);
    assert_eq!(report.compressed_bytes, 650);
}

#[test]
fn report_json_tags_outcomes() {
    let json = serde_json::to_value(sample_report()).unwrap();
    assert_eq!(json["outcomes"][0]["result"]["kind"], "Success");
    assert_eq!(json["outcomes"][1]["result"]["kind"], "Failure");
    assert_eq!(json["outcomes"][1]["result"]["reason"], "InvalidUrl");

    let back: JobReport = serde_json::from_value(json).unwrap();
    assert_eq!(back.outcomes, sample_report().outcomes);
}

#[test]
fn annotated_manifest_appends_columns_in_row_order() {
    let raw = "id,url\n1,https://a/1.jpg\n2,nope\n3,https://a/2.png\n";
    let manifest = Manifest::parse(raw, &Config::default()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.out.csv");

    write_annotated_manifest(&manifest, &sample_report(), &path).unwrap();

    let mut rdr = csv::Reader::from_path(&path).unwrap();
    let headers: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(headers, vec!["id", "url", "output_url", "error"]);

    let rows: Vec<csv::StringRecord> = rdr.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[0][2], "mem://k/0");
    assert_eq!(&rows[0][3], "");
    assert_eq!(&rows[1][2], "");
    assert!(rows[1][3].starts_with("Parse/InvalidUrl"), "{}", &rows[1][3]);
    assert_eq!(&rows[2][0], "3");
}
