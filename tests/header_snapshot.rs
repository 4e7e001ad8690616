//! Header snapshots through serde, as used by diagnostics tooling

use rootio::header::{K_BEGIN, ROOT_VERSION};
use rootio::{File, Header};
use tempfile::NamedTempFile;

#[test]
fn test_header_json_snapshot() {
    let tmp = NamedTempFile::new().unwrap();
    File::create(tmp.path()).unwrap().close().unwrap();
    let f = File::open(tmp.path()).unwrap();

    let json = serde_json::to_value(f.header()).unwrap();
    assert_eq!(json["version"], ROOT_VERSION);
    assert_eq!(json["begin"], K_BEGIN);
    assert_eq!(json["units"], 4);
    assert_eq!(json["compression"], 1);
    assert_eq!(json["nfree"], 1);
    assert_eq!(json["end"], f.header().end);
    assert_eq!(json["uuid"].as_array().unwrap().len(), 18);

    let back: Header = serde_json::from_value(json).unwrap();
    assert_eq!(&back, f.header());
}

#[test]
fn test_header_json_bytes_agree() {
    let mut header = Header::new();
    header.end = 4096;
    header.seek_info = 3000;
    header.nbytes_info = 500;

    let text = serde_json::to_string(&header).unwrap();
    let back: Header = serde_json::from_str(&text).unwrap();
    assert_eq!(back.to_bytes().unwrap(), header.to_bytes().unwrap());
}
