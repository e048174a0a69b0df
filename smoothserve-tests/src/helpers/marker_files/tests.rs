use super::*;
use tempfile::TempDir;

#[test]
fn test_count_marker_lines() {
    let temp_dir = TempDir::new().unwrap();
    let helper = MarkerFileHelper::new(temp_dir.path());

    assert_eq!(helper.count_marker_lines("missing"), 0);
    std::fs::write(helper.marker_path("multiline"), "a 1\nb 2\nc 3\n").unwrap();
    assert_eq!(helper.count_marker_lines("multiline"), 3);
}

#[test]
fn test_launches_are_parsed() {
    let temp_dir = TempDir::new().unwrap();
    let helper = MarkerFileHelper::new(temp_dir.path());

    std::fs::write(helper.marker_path("web"), "-port=9000 101\n-port=9001 102\ngarbage\n").unwrap();
    assert_eq!(
        helper.launches("web"),
        vec![("-port=9000".to_string(), 101), ("-port=9001".to_string(), 102)]
    );
}

#[tokio::test]
async fn test_backend_script_records_launch() {
    let temp_dir = TempDir::new().unwrap();
    let helper = MarkerFileHelper::new(temp_dir.path());
    let script = helper.write_exiting_script("once", 0).unwrap();

    let status = tokio::process::Command::new(&script)
        .arg("-port=9100")
        .status()
        .await
        .unwrap();
    assert!(status.success());

    assert!(helper.wait_for_marker_lines("once", 1, Duration::from_secs(2)).await);
    let launches = helper.launches("once");
    assert_eq!(launches[0].0, "-port=9100");
}
